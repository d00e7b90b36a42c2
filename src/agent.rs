//! Agent orchestration: the per-call pipeline tying context retrieval,
//! persistence, tool binding and the model loop together.
//!
//! Every operation shares the same shape:
//!
//! ```text
//! build args → save input (pending) → model loop → per step: save + meter
//!            → on success commit, on failure roll back (exactly once)
//! ```

use crate::context::{fetch_context_messages, ContextArgs, ContextOptions};
use crate::convert::{new_messages_in_step, object_result_step, prompt_or_messages};
use crate::error::AgentError;
use crate::persistence::{
    complete_message, save_messages, save_step, SaveMessagesArgs, SaveStepArgs, StorageOptions,
};
use crate::provider::{
    EmbeddingModel, LanguageModel, ModelRequest, ResponseFormat, StepResponse, StreamChunk,
    StreamCollector, ToolChoice,
};
use crate::storage::{CreateThreadArgs, MessageStore};
use crate::tool::{bind_tools, resolve_tools, BoundTool, Scope, ToolCtx, ToolDescriptor, ToolMap};
use crate::types::{CoreMessage, Step, ThreadDoc, ToolResultPart, Usage};
use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Per-step token accounting callback.
#[async_trait]
pub trait UsageHandler: Send + Sync {
    /// Called once per completed step that reported usage. Errors propagate
    /// and fail the call.
    async fn on_usage(&self, report: &UsageReport) -> Result<(), AgentError>;
}

/// One step's usage with attribution.
#[derive(Debug, Clone)]
pub struct UsageReport {
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
    pub agent_name: String,
    pub provider: String,
    pub model: String,
    pub usage: Usage,
}

/// Per-call arguments shared by all four generation operations.
#[derive(Clone, Default)]
pub struct CallArgs {
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
    /// A bare user prompt. Mutually exclusive with `messages`.
    pub prompt: Option<String>,
    /// Full input messages. Mutually exclusive with `prompt`.
    pub messages: Option<Vec<CoreMessage>>,
    /// Generate against an already-saved prompt instead of new input.
    pub prompt_message_id: Option<String>,
    /// System prompt override.
    pub system: Option<String>,
    pub max_steps: Option<usize>,
    /// Call-site tool override (highest priority, never merged).
    pub tools: Option<ToolMap>,
    /// Thread-default tools (set by [`ThreadHandle`]).
    pub thread_tools: Option<ToolMap>,
    pub context_options: Option<ContextOptions>,
    pub storage_options: Option<StorageOptions>,
    /// Capability scope of the calling host function.
    pub scope: Scope,
    /// Host-provided abort signal, forwarded into the model loop.
    pub abort: Option<CancellationToken>,
}

/// Result of a completed text generation.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// The final step's text.
    pub text: String,
    pub steps: Vec<Step>,
    /// Id of the prompt message this generation ran under, when one was
    /// saved or supplied.
    pub message_id: Option<String>,
    /// Usage summed over all steps.
    pub total_usage: Usage,
}

/// Result of a completed object generation.
#[derive(Debug, Clone)]
pub struct ObjectResult {
    pub object: Value,
    pub message_id: Option<String>,
    pub usage: Option<Usage>,
}

/// Events emitted by the streaming operations.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AgentEvent {
    TextDelta {
        delta: String,
    },
    ToolCallStart {
        id: String,
        name: String,
    },
    ToolCallDelta {
        id: String,
        args_delta: String,
    },
    ToolCallDone {
        id: String,
        name: String,
        result: Value,
    },
    StepFinish {
        step: Step,
    },
    Finish {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    /// Raw text delta of a streaming object generation.
    ObjectDelta {
        delta: String,
    },
    ObjectFinish {
        object: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    Error {
        message: String,
    },
}

/// A boxed stream of agent events.
pub type EventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

/// Immutable agent configuration plus its collaborators. Cloning shares
/// the collaborators; safe to share across calls.
#[derive(Clone)]
pub struct Agent {
    name: String,
    chat: Arc<dyn LanguageModel>,
    embedder: Option<Arc<dyn EmbeddingModel>>,
    store: Arc<dyn MessageStore>,
    instructions: Option<String>,
    tools: Option<ToolMap>,
    context_options: ContextOptions,
    storage_options: StorageOptions,
    max_steps: usize,
    max_retries: Option<u32>,
    usage_handler: Option<Arc<dyn UsageHandler>>,
}

impl Agent {
    /// Create an agent over a chat model and a message store.
    pub fn new(
        name: impl Into<String>,
        chat: Arc<dyn LanguageModel>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            name: name.into(),
            chat,
            embedder: None,
            store,
            instructions: None,
            tools: None,
            context_options: ContextOptions::default(),
            storage_options: StorageOptions::default(),
            max_steps: 10,
            max_retries: None,
            usage_handler: None,
        }
    }

    /// Set the embedding model used for message vectors and vector search.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingModel>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Set the default system prompt.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Set the agent-default tools.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolMap) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Set the default context options.
    #[must_use]
    pub fn with_context_options(mut self, options: ContextOptions) -> Self {
        self.context_options = options;
        self
    }

    /// Set the default storage options.
    #[must_use]
    pub fn with_storage_options(mut self, options: StorageOptions) -> Self {
        self.storage_options = options;
        self
    }

    /// Set the default step budget of the tool loop.
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set the advisory retry budget forwarded to the model backend.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the per-step usage handler.
    #[must_use]
    pub fn with_usage_handler(mut self, handler: Arc<dyn UsageHandler>) -> Self {
        self.usage_handler = Some(handler);
        self
    }

    /// The agent name used for message attribution.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn store_handle(&self) -> Arc<dyn MessageStore> {
        self.store.clone()
    }

    pub(crate) fn embedder_handle(&self) -> Option<Arc<dyn EmbeddingModel>> {
        self.embedder.clone()
    }

    /// Create a thread and return a handle bound to it.
    pub async fn create_thread(
        &self,
        args: CreateThreadArgs,
    ) -> Result<(ThreadDoc, ThreadHandle), AgentError> {
        let user_id = args.user_id.clone();
        let thread = self.store.create_thread(args).await?;
        let handle = self.thread(&thread.id, user_id);
        Ok((thread, handle))
    }

    /// A handle with `(thread_id, user_id)` pre-applied to every operation.
    pub fn thread(&self, thread_id: impl Into<String>, user_id: Option<String>) -> ThreadHandle {
        ThreadHandle {
            agent: self.clone(),
            thread_id: thread_id.into(),
            user_id,
        }
    }

    // ========================================================================
    // Preamble
    // ========================================================================

    /// Merge options, fetch context, save the input prompt as pending, and
    /// bind tools — shared by all four operations.
    async fn save_messages_and_fetch_context(
        &self,
        args: &CallArgs,
    ) -> Result<PreparedCall, AgentError> {
        let context_options =
            ContextOptions::merged(&self.context_options, args.context_options.as_ref());
        let storage_options =
            StorageOptions::merged(&self.storage_options, args.storage_options.as_ref());

        if args.prompt_message_id.is_some() && (args.prompt.is_some() || args.messages.is_some()) {
            return Err(AgentError::InvalidArgument(
                "prompt_message_id excludes prompt and messages".into(),
            ));
        }
        let input = prompt_or_messages(args.prompt.clone(), args.messages.clone())?;

        let context_docs = fetch_context_messages(
            self.store.as_ref(),
            self.embedder.as_deref(),
            &ContextArgs {
                user_id: args.user_id.clone(),
                thread_id: args.thread_id.clone(),
                messages: input.clone(),
                up_to_and_including_message_id: args.prompt_message_id.clone(),
                scope: args.scope,
            },
            &context_options,
        )
        .await?;

        let mut message_id = args.prompt_message_id.clone();
        if let Some(ref thread_id) = args.thread_id {
            if !input.is_empty() && storage_options.save_any_input_messages != Some(false) {
                let to_save = if storage_options.save_all_input_messages == Some(true) {
                    input.clone()
                } else {
                    vec![input.last().cloned().unwrap_or_else(|| {
                        CoreMessage::user(String::new())
                    })]
                };
                let saved = save_messages(
                    self.store.as_ref(),
                    self.embedder.as_deref(),
                    SaveMessagesArgs {
                        thread_id: thread_id.clone(),
                        user_id: args.user_id.clone(),
                        agent_name: Some(self.name.clone()),
                        messages: to_save,
                        pending: true,
                        fail_pending_steps: true,
                        ..Default::default()
                    },
                )
                .await?;
                message_id = Some(saved.last_message_id);
            }
        }

        let mut messages: Vec<CoreMessage> =
            context_docs.into_iter().map(|d| d.message).collect();
        messages.extend(input);

        let ctx = ToolCtx {
            scope: args.scope,
            user_id: args.user_id.clone(),
            thread_id: args.thread_id.clone(),
            message_id: message_id.clone(),
        };
        let resolved = resolve_tools(
            args.tools.as_ref(),
            args.thread_tools.as_ref(),
            self.tools.as_ref(),
        );
        let bound = resolved.map(|t| bind_tools(t, ctx)).unwrap_or_default();
        let descriptors: Vec<ToolDescriptor> = bound.values().map(|t| t.descriptor()).collect();

        Ok(PreparedCall {
            user_id: args.user_id.clone(),
            thread_id: args.thread_id.clone(),
            message_id,
            system: args.system.clone().or_else(|| self.instructions.clone()),
            messages,
            storage_options,
            max_steps: args.max_steps.unwrap_or(self.max_steps).max(1),
            bound_tools: bound,
            descriptors,
            abort: args.abort.clone(),
        })
    }

    fn model_request(&self, prepared: &PreparedCall, format: Option<ResponseFormat>) -> ModelRequest {
        ModelRequest {
            system: prepared.system.clone(),
            messages: prepared.messages.clone(),
            tools: if format.is_some() {
                Vec::new()
            } else {
                prepared.descriptors.clone()
            },
            tool_choice: ToolChoice::Auto,
            max_retries: self.max_retries,
            response_format: format,
        }
    }

    /// Roll back the prompt message, once.
    async fn rollback(&self, prepared: &PreparedCall, completed: &mut bool, error: &AgentError) {
        if *completed {
            return;
        }
        *completed = true;
        let Some(ref message_id) = prepared.message_id else {
            return;
        };
        warn!(message_id = %message_id, error = %error, "rolling back failed generation");
        if let Err(rollback_err) =
            complete_message(self.store.as_ref(), message_id, Err(&error.to_string())).await
        {
            warn!(error = %rollback_err, "rollback itself failed");
        }
    }

    /// Execute the tool calls of one response, in order.
    async fn run_tool_calls(
        &self,
        prepared: &PreparedCall,
        response: &StepResponse,
    ) -> Result<Vec<ToolResultPart>, AgentError> {
        let mut results = Vec::with_capacity(response.tool_calls.len());
        for call in &response.tool_calls {
            let result = match prepared.bound_tools.get(&call.name) {
                Some(tool) => tool.invoke(call.args.clone()).await?,
                None => json!({"error": format!("tool {} not found", call.name)}),
            };
            results.push(ToolResultPart {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                result,
            });
        }
        Ok(results)
    }

    /// Persist a completed step and fire the usage handler.
    async fn finish_step(&self, prepared: &PreparedCall, step: &Step) -> Result<(), AgentError> {
        if let (Some(thread_id), Some(message_id)) =
            (prepared.thread_id.as_ref(), prepared.message_id.as_ref())
        {
            if prepared.storage_options.save_output_messages != Some(false) {
                save_step(
                    self.store.as_ref(),
                    self.embedder.as_deref(),
                    SaveStepArgs {
                        thread_id: thread_id.clone(),
                        user_id: prepared.user_id.clone(),
                        agent_name: Some(self.name.clone()),
                        prompt_message_id: message_id.clone(),
                        step: step.clone(),
                    },
                )
                .await?;
            }
        }
        if let (Some(usage), Some(handler)) = (step.usage, self.usage_handler.as_ref()) {
            handler
                .on_usage(&UsageReport {
                    user_id: prepared.user_id.clone(),
                    thread_id: prepared.thread_id.clone(),
                    agent_name: self.name.clone(),
                    provider: step.provider.clone(),
                    model: step.model.clone(),
                    usage,
                })
                .await?;
        }
        Ok(())
    }

    fn make_step(&self, response: StepResponse, tool_results: Vec<ToolResultPart>) -> Step {
        Step {
            text: response.text,
            reasoning: None,
            tool_calls: response.tool_calls,
            tool_results,
            usage: response.usage,
            finish_reason: response.finish_reason,
            provider: self.chat.provider().to_string(),
            model: self.chat.model_id().to_string(),
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Generate text, looping over tool calls up to the step budget.
    pub async fn generate_text(&self, args: CallArgs) -> Result<GenerationResult, AgentError> {
        let prepared = self.save_messages_and_fetch_context(&args).await?;
        let mut completed = false;
        let outcome: Result<GenerationResult, AgentError> = async {
            let result = self.generate_text_inner(&prepared).await?;
            if let Some(ref message_id) = prepared.message_id {
                complete_message(self.store.as_ref(), message_id, Ok(())).await?;
            }
            Ok(result)
        }
        .await;
        match outcome {
            Ok(result) => Ok(result),
            Err(error) => {
                self.rollback(&prepared, &mut completed, &error).await;
                Err(error)
            }
        }
    }

    async fn generate_text_inner(
        &self,
        prepared: &PreparedCall,
    ) -> Result<GenerationResult, AgentError> {
        let mut conversation = prepared.messages.clone();
        let mut steps: Vec<Step> = Vec::new();
        let mut total_usage = Usage::default();

        for _ in 0..prepared.max_steps {
            let request = ModelRequest {
                messages: conversation.clone(),
                ..self.model_request(prepared, None)
            };
            let response = run_cancellable(prepared.abort.as_ref(), self.chat.complete(request))
                .await?;

            let tool_results = self.run_tool_calls(prepared, &response).await?;
            let step = self.make_step(response, tool_results);
            self.finish_step(prepared, &step).await?;
            accumulate(&mut total_usage, step.usage);

            let done = step.tool_calls.is_empty();
            if !done {
                conversation.extend(new_messages_in_step(&step));
            }
            steps.push(step);
            if done {
                break;
            }
        }

        let text = steps.last().map(|s| s.text.clone()).unwrap_or_default();
        Ok(GenerationResult {
            text,
            steps,
            message_id: prepared.message_id.clone(),
            total_usage,
        })
    }

    /// Generate text, streaming events as they happen.
    ///
    /// Failure after the prompt was saved rolls it back (once) and ends the
    /// stream with an [`AgentEvent::Error`]. Persistence stays per-step;
    /// deltas are never persisted.
    pub fn stream_text(&self, args: CallArgs) -> EventStream {
        let agent = self.clone();
        Box::pin(stream! {
            let prepared = match agent.save_messages_and_fetch_context(&args).await {
                Ok(prepared) => prepared,
                Err(error) => {
                    yield AgentEvent::Error { message: error.to_string() };
                    return;
                }
            };

            let mut completed = false;
            let mut conversation = prepared.messages.clone();
            let mut final_text = String::new();

            for _ in 0..prepared.max_steps {
                let request = ModelRequest {
                    messages: conversation.clone(),
                    ..agent.model_request(&prepared, None)
                };
                let chunks = match run_cancellable(
                    prepared.abort.as_ref(),
                    agent.chat.stream(request),
                )
                .await
                {
                    Ok(chunks) => chunks,
                    Err(error) => {
                        agent.rollback(&prepared, &mut completed, &error).await;
                        yield AgentEvent::Error { message: error.to_string() };
                        return;
                    }
                };

                let mut collector = StreamCollector::new();
                let mut chunks = chunks;
                let mut stream_error: Option<AgentError> = None;
                while let Some(chunk) = chunks.next().await {
                    match chunk {
                        Ok(chunk) => {
                            collector.process(&chunk);
                            match chunk {
                                StreamChunk::TextDelta { delta } => {
                                    yield AgentEvent::TextDelta { delta };
                                }
                                StreamChunk::ToolCallStart { id, name } => {
                                    yield AgentEvent::ToolCallStart { id, name };
                                }
                                StreamChunk::ToolCallDelta { id, args_delta } => {
                                    yield AgentEvent::ToolCallDelta { id, args_delta };
                                }
                                StreamChunk::Finish { .. } => {}
                            }
                        }
                        Err(error) => {
                            stream_error = Some(error);
                            break;
                        }
                    }
                }
                if let Some(error) = stream_error {
                    agent.rollback(&prepared, &mut completed, &error).await;
                    yield AgentEvent::Error { message: error.to_string() };
                    return;
                }

                let response = collector.finish();
                let step_result: Result<Step, AgentError> = async {
                    let tool_results = agent.run_tool_calls(&prepared, &response).await?;
                    let step = agent.make_step(response, tool_results);
                    agent.finish_step(&prepared, &step).await?;
                    Ok(step)
                }
                .await;
                let step = match step_result {
                    Ok(step) => step,
                    Err(error) => {
                        agent.rollback(&prepared, &mut completed, &error).await;
                        yield AgentEvent::Error { message: error.to_string() };
                        return;
                    }
                };

                for result in &step.tool_results {
                    yield AgentEvent::ToolCallDone {
                        id: result.tool_call_id.clone(),
                        name: result.tool_name.clone(),
                        result: result.result.clone(),
                    };
                }

                let done = step.tool_calls.is_empty();
                final_text = step.text.clone();
                if !done {
                    conversation.extend(new_messages_in_step(&step));
                }
                yield AgentEvent::StepFinish { step };
                if done {
                    break;
                }
            }

            if let Some(ref message_id) = prepared.message_id {
                if let Err(error) =
                    complete_message(agent.store.as_ref(), message_id, Ok(())).await
                {
                    agent.rollback(&prepared, &mut completed, &error).await;
                    yield AgentEvent::Error { message: error.to_string() };
                    return;
                }
            }
            yield AgentEvent::Finish {
                text: final_text,
                message_id: prepared.message_id.clone(),
            };
        })
    }

    /// Generate a JSON object matching `schema`.
    pub async fn generate_object(
        &self,
        args: CallArgs,
        schema: Value,
    ) -> Result<ObjectResult, AgentError> {
        let prepared = self.save_messages_and_fetch_context(&args).await?;
        let mut completed = false;
        let outcome: Result<ObjectResult, AgentError> = async {
            let result = self.generate_object_inner(&prepared, schema).await?;
            if let Some(ref message_id) = prepared.message_id {
                complete_message(self.store.as_ref(), message_id, Ok(())).await?;
            }
            Ok(result)
        }
        .await;
        match outcome {
            Ok(result) => Ok(result),
            Err(error) => {
                self.rollback(&prepared, &mut completed, &error).await;
                Err(error)
            }
        }
    }

    async fn generate_object_inner(
        &self,
        prepared: &PreparedCall,
        schema: Value,
    ) -> Result<ObjectResult, AgentError> {
        let request = self.model_request(prepared, Some(ResponseFormat::JsonSchema(schema)));
        let response =
            run_cancellable(prepared.abort.as_ref(), self.chat.complete(request)).await?;

        let object: Value = serde_json::from_str(&response.text).map_err(|e| {
            AgentError::Provider(format!("model returned invalid JSON: {e}"))
        })?;

        let step = object_result_step(
            &object,
            response.usage,
            self.chat.provider(),
            self.chat.model_id(),
        );
        self.finish_step(prepared, &step).await?;

        Ok(ObjectResult {
            object,
            message_id: prepared.message_id.clone(),
            usage: response.usage,
        })
    }

    /// Generate a JSON object, streaming the raw deltas.
    pub fn stream_object(&self, args: CallArgs, schema: Value) -> EventStream {
        let agent = self.clone();
        Box::pin(stream! {
            let prepared = match agent.save_messages_and_fetch_context(&args).await {
                Ok(prepared) => prepared,
                Err(error) => {
                    yield AgentEvent::Error { message: error.to_string() };
                    return;
                }
            };

            let mut completed = false;
            let request = agent.model_request(&prepared, Some(ResponseFormat::JsonSchema(schema)));
            let chunks = match run_cancellable(prepared.abort.as_ref(), agent.chat.stream(request))
                .await
            {
                Ok(chunks) => chunks,
                Err(error) => {
                    agent.rollback(&prepared, &mut completed, &error).await;
                    yield AgentEvent::Error { message: error.to_string() };
                    return;
                }
            };

            let mut collector = StreamCollector::new();
            let mut chunks = chunks;
            let mut stream_error: Option<AgentError> = None;
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(chunk) => {
                        collector.process(&chunk);
                        if let StreamChunk::TextDelta { delta } = chunk {
                            yield AgentEvent::ObjectDelta { delta };
                        }
                    }
                    Err(error) => {
                        stream_error = Some(error);
                        break;
                    }
                }
            }
            if let Some(error) = stream_error {
                agent.rollback(&prepared, &mut completed, &error).await;
                yield AgentEvent::Error { message: error.to_string() };
                return;
            }

            let response = collector.finish();
            let outcome: Result<ObjectResult, AgentError> = async {
                let object: Value = serde_json::from_str(&response.text).map_err(|e| {
                    AgentError::Provider(format!("model returned invalid JSON: {e}"))
                })?;
                let step = object_result_step(
                    &object,
                    response.usage,
                    agent.chat.provider(),
                    agent.chat.model_id(),
                );
                agent.finish_step(&prepared, &step).await?;
                if let Some(ref message_id) = prepared.message_id {
                    complete_message(agent.store.as_ref(), message_id, Ok(())).await?;
                }
                Ok(ObjectResult {
                    object,
                    message_id: prepared.message_id.clone(),
                    usage: response.usage,
                })
            }
            .await;

            match outcome {
                Ok(result) => {
                    yield AgentEvent::ObjectFinish {
                        object: result.object,
                        message_id: result.message_id,
                    };
                }
                Err(error) => {
                    agent.rollback(&prepared, &mut completed, &error).await;
                    yield AgentEvent::Error { message: error.to_string() };
                }
            }
        })
    }
}

/// Everything the preamble resolved for one call.
struct PreparedCall {
    user_id: Option<String>,
    thread_id: Option<String>,
    message_id: Option<String>,
    system: Option<String>,
    messages: Vec<CoreMessage>,
    storage_options: StorageOptions,
    max_steps: usize,
    bound_tools: HashMap<String, BoundTool>,
    descriptors: Vec<ToolDescriptor>,
    abort: Option<CancellationToken>,
}

/// Await `future`, aborting early when the token fires.
async fn run_cancellable<T>(
    abort: Option<&CancellationToken>,
    future: impl std::future::Future<Output = Result<T, AgentError>>,
) -> Result<T, AgentError> {
    match abort {
        Some(token) => {
            tokio::select! {
                _ = token.cancelled() => Err(AgentError::Provider("generation cancelled".into())),
                result = future => result,
            }
        }
        None => future.await,
    }
}

fn accumulate(total: &mut Usage, step: Option<Usage>) {
    let Some(step) = step else { return };
    total.prompt_tokens = add_opt(total.prompt_tokens, step.prompt_tokens);
    total.completion_tokens = add_opt(total.completion_tokens, step.completion_tokens);
    total.total_tokens = add_opt(total.total_tokens, step.total_tokens);
}

fn add_opt(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    }
}

/// A thread-bound view of an agent: the four operations with
/// `(thread_id, user_id)` pre-applied. No extra state.
#[derive(Clone)]
pub struct ThreadHandle {
    agent: Agent,
    thread_id: String,
    user_id: Option<String>,
}

impl ThreadHandle {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    fn bind(&self, mut args: CallArgs) -> CallArgs {
        args.thread_id = Some(self.thread_id.clone());
        args.user_id = args.user_id.or_else(|| self.user_id.clone());
        args
    }

    pub async fn generate_text(&self, args: CallArgs) -> Result<GenerationResult, AgentError> {
        self.agent.generate_text(self.bind(args)).await
    }

    pub fn stream_text(&self, args: CallArgs) -> EventStream {
        self.agent.stream_text(self.bind(args))
    }

    pub async fn generate_object(
        &self,
        args: CallArgs,
        schema: Value,
    ) -> Result<ObjectResult, AgentError> {
        self.agent.generate_object(self.bind(args), schema).await
    }

    pub fn stream_object(&self, args: CallArgs, schema: Value) -> EventStream {
        self.agent.stream_object(self.bind(args), schema)
    }
}
