//! genai-backed [`LanguageModel`].

use crate::error::AgentError;
use crate::provider::{
    LanguageModel, ModelRequest, ModelStream, ResponseFormat, StepResponse, StreamChunk,
};
use crate::types::{
    AssistantContent, AssistantPart, CoreMessage, FinishReason, ToolCallRequest, Usage,
};
use async_trait::async_trait;
use futures::StreamExt;
use genai::chat::{
    ChatMessage, ChatOptions, ChatRequest, ChatStreamEvent, ContentPart, MessageContent,
    ToolResponse,
};
use genai::Client;
use std::collections::HashSet;

/// A language model driven through a [`genai::Client`].
pub struct GenaiLanguageModel {
    client: Client,
    model: String,
    provider: String,
    chat_options: ChatOptions,
}

impl GenaiLanguageModel {
    /// Create a model for the given genai model id.
    pub fn new(client: Client, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            provider: "genai".to_string(),
            chat_options: ChatOptions::default()
                .with_capture_usage(true)
                .with_capture_tool_calls(true),
        }
    }

    /// Override the provider label used for attribution.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Override the chat options sent with each request.
    #[must_use]
    pub fn with_chat_options(mut self, options: ChatOptions) -> Self {
        self.chat_options = options;
        self
    }

    fn build_request(&self, request: &ModelRequest) -> ChatRequest {
        let mut chat_messages: Vec<ChatMessage> = Vec::new();
        if let Some(ref system) = request.system {
            chat_messages.push(ChatMessage::system(system));
        }
        if let Some(ref format) = request.response_format {
            chat_messages.push(ChatMessage::system(json_instruction(format)));
        }
        for message in &request.messages {
            chat_messages.extend(to_chat_messages(message));
        }

        let tools: Vec<genai::chat::Tool> = request
            .tools
            .iter()
            .map(|t| {
                genai::chat::Tool::new(&t.id)
                    .with_description(&t.description)
                    .with_schema(t.parameters.clone())
            })
            .collect();

        let mut chat_request = ChatRequest::new(chat_messages);
        if !tools.is_empty() {
            chat_request = chat_request.with_tools(tools);
        }
        chat_request
    }
}

/// Instruction injected when the caller asked for JSON output.
fn json_instruction(format: &ResponseFormat) -> String {
    match format {
        ResponseFormat::JsonObject => {
            "Respond with a single valid JSON object and nothing else.".to_string()
        }
        ResponseFormat::JsonSchema(schema) => format!(
            "Respond with a single valid JSON object matching this JSON schema and nothing else:\n{schema}"
        ),
    }
}

/// Convert one core message into genai chat messages. Tool messages expand
/// to one message per tool result.
fn to_chat_messages(message: &CoreMessage) -> Vec<ChatMessage> {
    match message {
        CoreMessage::System { content } => vec![ChatMessage::system(content)],
        CoreMessage::User { content } => vec![ChatMessage::user(content)],
        CoreMessage::Assistant { content } => match content {
            AssistantContent::Text(text) => vec![ChatMessage::assistant(text)],
            AssistantContent::Parts(parts) => {
                let text: String = parts
                    .iter()
                    .filter_map(|p| match p {
                        AssistantPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                let calls: Vec<genai::chat::ToolCall> = parts
                    .iter()
                    .filter_map(|p| match p {
                        AssistantPart::ToolCall {
                            tool_call_id,
                            tool_name,
                            args,
                        } => Some(genai::chat::ToolCall {
                            call_id: tool_call_id.clone(),
                            fn_name: tool_name.clone(),
                            fn_arguments: args.clone(),
                        }),
                        _ => None,
                    })
                    .collect();
                if calls.is_empty() {
                    vec![ChatMessage::assistant(text)]
                } else {
                    let mut content = MessageContent::from(text.as_str());
                    for call in calls {
                        content.push(ContentPart::ToolCall(call));
                    }
                    vec![ChatMessage::assistant(content)]
                }
            }
        },
        CoreMessage::Tool { content } => content
            .iter()
            .map(|result| {
                ChatMessage::from(ToolResponse {
                    call_id: result.tool_call_id.clone(),
                    content: result.result.to_string(),
                })
            })
            .collect(),
    }
}

fn convert_usage(usage: &genai::chat::Usage) -> Usage {
    Usage {
        prompt_tokens: usage.prompt_tokens.map(|v| v.max(0) as u32),
        completion_tokens: usage.completion_tokens.map(|v| v.max(0) as u32),
        total_tokens: usage.total_tokens.map(|v| v.max(0) as u32),
    }
}

#[async_trait]
impl LanguageModel for GenaiLanguageModel {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: ModelRequest) -> Result<StepResponse, AgentError> {
        let chat_request = self.build_request(&request);
        let response = self
            .client
            .exec_chat(&self.model, chat_request, Some(&self.chat_options))
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        let text = response
            .first_text()
            .map(|s| s.to_string())
            .unwrap_or_default();
        let tool_calls: Vec<ToolCallRequest> = response
            .tool_calls()
            .into_iter()
            .map(|tc| ToolCallRequest::new(&tc.call_id, &tc.fn_name, tc.fn_arguments.clone()))
            .collect();
        let finish_reason = if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };

        Ok(StepResponse {
            text,
            tool_calls,
            usage: Some(convert_usage(&response.usage)),
            finish_reason,
        })
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, AgentError> {
        let chat_request = self.build_request(&request);
        let options = self.chat_options.clone();
        let response = self
            .client
            .exec_chat_stream(&self.model, chat_request, Some(&options))
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        let mut inner = response.stream;
        let stream = async_stream::stream! {
            let mut started: HashSet<String> = HashSet::new();
            while let Some(event) = inner.next().await {
                match event {
                    Ok(ChatStreamEvent::Chunk(chunk)) => {
                        if !chunk.content.is_empty() {
                            yield Ok(StreamChunk::TextDelta {
                                delta: chunk.content,
                            });
                        }
                    }
                    Ok(ChatStreamEvent::ToolCallChunk(tool_chunk)) => {
                        let call = tool_chunk.tool_call;
                        if !call.fn_name.is_empty() && !started.contains(&call.call_id) {
                            started.insert(call.call_id.clone());
                            yield Ok(StreamChunk::ToolCallStart {
                                id: call.call_id,
                                name: call.fn_name,
                            });
                        } else {
                            let args = call.fn_arguments.to_string();
                            if args != "null" && !args.is_empty() {
                                yield Ok(StreamChunk::ToolCallDelta {
                                    id: call.call_id,
                                    args_delta: args,
                                });
                            }
                        }
                    }
                    Ok(ChatStreamEvent::End(end)) => {
                        let tool_calls: Vec<ToolCallRequest> = end
                            .captured_tool_calls()
                            .map(|calls| {
                                calls
                                    .into_iter()
                                    .map(|tc| {
                                        ToolCallRequest::new(
                                            &tc.call_id,
                                            &tc.fn_name,
                                            tc.fn_arguments.clone(),
                                        )
                                    })
                                    .collect()
                            })
                            .unwrap_or_default();
                        let usage = end.captured_usage.as_ref().map(convert_usage);
                        yield Ok(StreamChunk::Finish { tool_calls, usage });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        yield Err(AgentError::Provider(e.to_string()));
                        return;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
