//! Agent orchestration core: conversational threads with durable message
//! history, retrieval-augmented context, and tool-use loops over a
//! pluggable LLM backend.
//!
//! Every generation call is a multi-step transaction against an unreliable
//! remote model. The crate composes four concerns into one per-call
//! protocol:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Agent / ThreadHandle                                │
//! │  generate_text · stream_text · generate_object ·     │
//! │  stream_object                                       │
//! └──────────────────────────────────────────────────────┘
//!            │ fetch context        │ save pending prompt
//!            ▼                      ▼
//! ┌──────────────────┐   ┌──────────────────────────────┐
//! │  context         │   │  persistence over a          │
//! │  recent window + │   │  MessageStore: save steps,   │
//! │  hybrid search   │   │  commit or roll back         │
//! └──────────────────┘   └──────────────────────────────┘
//!            │ bound tools, ctx injected
//!            ▼
//! ┌──────────────────────────────────────────────────────┐
//! │  LanguageModel / EmbeddingModel (genai adapter ships)│
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! The prompt message is written `pending` before the model runs, child
//! step messages accrue under its `(order, step_order)` group as the loop
//! progresses, and the prompt is committed when the generation succeeds or
//! rolled back (exactly once) when it fails.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use weft_agent::{Agent, CallArgs, GenaiLanguageModel, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let model = Arc::new(GenaiLanguageModel::new(genai::Client::default(), "gpt-4o-mini"));
//! let agent = Agent::new("support", model, store)
//!     .with_instructions("You are a helpful assistant.");
//!
//! let (thread, handle) = agent.create_thread(Default::default()).await?;
//! let result = handle
//!     .generate_text(CallArgs {
//!         prompt: Some("Hi!".into()),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("{}", result.text);
//! ```

pub mod actions;
pub mod agent;
pub mod context;
pub mod convert;
pub mod embeddings;
pub mod error;
pub mod genai;
pub mod persistence;
pub mod provider;
pub mod storage;
pub mod tool;
pub mod types;

// Error exports
pub use error::{AgentError, StoreError};

// Type exports
pub use types::{
    AssistantContent, AssistantPart, CoreMessage, FinishReason, MessageDoc, MessageStatus, Role,
    Step, ThreadDoc, ToolCallRequest, ToolResultPart, Usage,
};

// Agent exports
pub use agent::{
    Agent, AgentEvent, CallArgs, EventStream, GenerationResult, ObjectResult, ThreadHandle,
    UsageHandler, UsageReport,
};

// Context exports
pub use context::{fetch_context_messages, filter_orphaned_tool_messages, ContextOptions, SearchOptions};

// Persistence exports
pub use persistence::{
    complete_message, create_thread, save_messages, save_step, SaveMessagesArgs, SaveStepArgs,
    SavedMessages, StorageOptions,
};

// Storage exports
pub use storage::{
    AddMessagesArgs, AddStepArgs, CreateThreadArgs, ListMessagesArgs, MemoryStore, MessagePage,
    MessageRange, MessageStore, SearchMessagesArgs, SortOrder, StepRecord,
};

// Tool exports
pub use tool::{
    bind_tools, resolve_tools, tool_map, BoundTool, Scope, Tool, ToolCtx, ToolDescriptor,
    ToolError, ToolMap,
};

// Provider exports
pub use provider::{
    EmbeddingModel, LanguageModel, ModelRequest, ModelStream, ResponseFormat, StepResponse,
    StreamChunk, StreamCollector, ToolChoice,
};

// Embedding exports
pub use embeddings::{generate_embeddings, MessageEmbeddings, ACCEPTED_DIMENSIONS};

// Mapper exports
pub use convert::{
    deserialize_message, new_messages_in_step, object_result_step, prompt_or_messages,
    serialize_message, serialize_step, to_ui_messages, ToolInvocationState, UiMessage, UiPart,
    UiRole,
};

// genai adapter export
pub use crate::genai::GenaiLanguageModel;
