//! Backend seams: language models and embedding models.
//!
//! The orchestrator is written against [`LanguageModel`] and
//! [`EmbeddingModel`] so any backend can be plugged in; a genai-backed
//! implementation ships in [`crate::genai`].

use crate::error::AgentError;
use crate::tool::ToolDescriptor;
use crate::types::{CoreMessage, FinishReason, ToolCallRequest, Usage};
use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

/// How the model should treat the offered tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ToolChoice {
    /// The model decides.
    #[default]
    Auto,
    /// Never call tools.
    None,
    /// A tool call is required.
    Required,
}

/// Requested output shape for object generation.
#[derive(Debug, Clone)]
pub enum ResponseFormat {
    /// Any JSON object.
    JsonObject,
    /// A JSON object matching the given JSON schema.
    JsonSchema(Value),
}

/// One inference request. The orchestrator builds one per step of the loop.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    /// System prompt, sent ahead of `messages`.
    pub system: Option<String>,
    pub messages: Vec<CoreMessage>,
    pub tools: Vec<ToolDescriptor>,
    pub tool_choice: ToolChoice,
    /// Advisory retry budget, interpreted by the backend.
    pub max_retries: Option<u32>,
    /// When set, the backend is asked for JSON output.
    pub response_format: Option<ResponseFormat>,
}

/// The model's answer to a single request.
#[derive(Debug, Clone)]
pub struct StepResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<Usage>,
    pub finish_reason: FinishReason,
}

/// A chunk of a streaming inference.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    TextDelta { delta: String },
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, args_delta: String },
    /// Terminal chunk carrying whatever the backend captured whole.
    Finish {
        tool_calls: Vec<ToolCallRequest>,
        usage: Option<Usage>,
    },
}

/// A boxed stream of inference chunks.
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, AgentError>> + Send>>;

/// A text-generation backend, invoked once per step of the tool loop.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name (e.g. "openai", "anthropic", "mock").
    fn provider(&self) -> &str;

    /// Model identifier.
    fn model_id(&self) -> &str;

    /// Run one inference and wait for the full response.
    async fn complete(&self, request: ModelRequest) -> Result<StepResponse, AgentError>;

    /// Run one inference and stream the response.
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, AgentError>;
}

/// A text-embedding backend.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Model identifier.
    fn model_id(&self) -> &str;

    /// Embed each value; one vector per input, in input order.
    async fn embed(&self, values: Vec<String>) -> Result<Vec<Vec<f32>>, AgentError>;
}

/// Partial tool call being assembled during streaming.
#[derive(Debug, Clone)]
struct PartialToolCall {
    name: String,
    arguments: String,
}

/// Accumulates [`StreamChunk`]s into a [`StepResponse`].
#[derive(Debug, Default)]
pub struct StreamCollector {
    text: String,
    tool_calls: Vec<(String, PartialToolCall)>,
    usage: Option<Usage>,
}

impl StreamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk into the collector.
    pub fn process(&mut self, chunk: &StreamChunk) {
        match chunk {
            StreamChunk::TextDelta { delta } => self.text.push_str(delta),
            StreamChunk::ToolCallStart { id, name } => {
                if !self.tool_calls.iter().any(|(call_id, _)| call_id == id) {
                    self.tool_calls.push((
                        id.clone(),
                        PartialToolCall {
                            name: name.clone(),
                            arguments: String::new(),
                        },
                    ));
                }
            }
            StreamChunk::ToolCallDelta { id, args_delta } => {
                if let Some((_, partial)) =
                    self.tool_calls.iter_mut().find(|(call_id, _)| call_id == id)
                {
                    partial.arguments.push_str(args_delta);
                }
            }
            StreamChunk::Finish { tool_calls, usage } => {
                for call in tool_calls {
                    let entry = self
                        .tool_calls
                        .iter_mut()
                        .find(|(call_id, _)| call_id == &call.id);
                    match entry {
                        Some((_, partial)) => {
                            partial.name = call.name.clone();
                            partial.arguments = call.args.to_string();
                        }
                        None => self.tool_calls.push((
                            call.id.clone(),
                            PartialToolCall {
                                name: call.name.clone(),
                                arguments: call.args.to_string(),
                            },
                        )),
                    }
                }
                self.usage = *usage;
            }
        }
    }

    /// Current accumulated text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Finish collecting and produce the step response.
    pub fn finish(self) -> StepResponse {
        let tool_calls: Vec<ToolCallRequest> = self
            .tool_calls
            .into_iter()
            .map(|(id, partial)| {
                let args: Value = serde_json::from_str(&partial.arguments).unwrap_or(Value::Null);
                ToolCallRequest::new(id, partial.name, args)
            })
            .collect();

        let finish_reason = if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };

        StepResponse {
            text: self.text,
            tool_calls,
            usage: self.usage,
            finish_reason,
        }
    }
}
