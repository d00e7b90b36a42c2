//! Persistence operations: saving prompts and steps, committing and
//! rolling back.
//!
//! Embeddings are generated before any mutation is issued, so a message
//! that should be searchable is never stored without its vector. Each
//! operation is a single storage mutation.

use crate::convert::{new_messages_in_step, serialize_step};
use crate::embeddings::generate_embeddings;
use crate::error::AgentError;
use crate::provider::EmbeddingModel;
use crate::storage::{AddMessagesArgs, AddStepArgs, CreateThreadArgs, MessageStore, StepRecord};
use crate::types::{CoreMessage, MessageDoc, Step, ThreadDoc};
use serde_json::Value;

/// Which messages of a call get persisted. Unset fields use the defaults
/// noted per field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StorageOptions {
    /// Persist input messages at all. Default true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_any_input_messages: Option<bool>,
    /// Persist every input message instead of only the prompt (the last
    /// one). Default false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_all_input_messages: Option<bool>,
    /// Persist generated step messages. Default true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_output_messages: Option<bool>,
}

impl StorageOptions {
    /// Merge call-site options over defaults; fields override wholesale.
    pub fn merged(defaults: &Self, call_site: Option<&Self>) -> Self {
        let Some(over) = call_site else {
            return *defaults;
        };
        Self {
            save_any_input_messages: over
                .save_any_input_messages
                .or(defaults.save_any_input_messages),
            save_all_input_messages: over
                .save_all_input_messages
                .or(defaults.save_all_input_messages),
            save_output_messages: over.save_output_messages.or(defaults.save_output_messages),
        }
    }
}

/// Arguments for [`save_messages`].
#[derive(Debug, Clone)]
pub struct SaveMessagesArgs {
    pub thread_id: String,
    pub user_id: Option<String>,
    pub agent_name: Option<String>,
    /// When set, the messages join this message's `order` group.
    pub prompt_message_id: Option<String>,
    pub messages: Vec<CoreMessage>,
    /// Per-message metadata, aligned with `messages`.
    pub metadata: Option<Vec<Value>>,
    /// Write as `pending` (committed or rolled back later).
    pub pending: bool,
    /// Displace the thread's prior pending messages first.
    pub fail_pending_steps: bool,
    pub provider: Option<String>,
    pub model: Option<String>,
}

impl Default for SaveMessagesArgs {
    fn default() -> Self {
        Self {
            thread_id: String::new(),
            user_id: None,
            agent_name: None,
            prompt_message_id: None,
            messages: Vec::new(),
            metadata: None,
            pending: false,
            fail_pending_steps: false,
            provider: None,
            model: None,
        }
    }
}

/// Ids of a saved batch.
#[derive(Debug, Clone)]
pub struct SavedMessages {
    pub message_ids: Vec<String>,
    /// The prompt id: the last message saved.
    pub last_message_id: String,
}

/// Create a thread.
pub async fn create_thread(
    store: &dyn MessageStore,
    args: CreateThreadArgs,
) -> Result<ThreadDoc, AgentError> {
    Ok(store.create_thread(args).await?)
}

/// Save input messages in one mutation, generating embeddings first.
pub async fn save_messages(
    store: &dyn MessageStore,
    embedder: Option<&dyn EmbeddingModel>,
    args: SaveMessagesArgs,
) -> Result<SavedMessages, AgentError> {
    if args.messages.is_empty() {
        return Err(AgentError::InvalidArgument(
            "save_messages needs at least one message".into(),
        ));
    }

    let embeddings = match embedder {
        Some(embedder) => generate_embeddings(embedder, &args.messages).await?,
        None => None,
    };

    let docs = store
        .add_messages(AddMessagesArgs {
            thread_id: args.thread_id,
            user_id: args.user_id,
            agent_name: args.agent_name,
            prompt_message_id: args.prompt_message_id,
            embeddings,
            messages: args.messages,
            metadata: args.metadata,
            pending: args.pending,
            fail_pending_steps: args.fail_pending_steps,
            provider: args.provider,
            model: args.model,
        })
        .await?;

    let message_ids: Vec<String> = docs.iter().map(|d| d.id.clone()).collect();
    let last_message_id = message_ids
        .last()
        .cloned()
        .ok_or_else(|| AgentError::Storage(crate::error::StoreError::Backend(
            "backend returned no docs for a non-empty batch".into(),
        )))?;

    Ok(SavedMessages {
        message_ids,
        last_message_id,
    })
}

/// Arguments for [`save_step`].
#[derive(Debug, Clone)]
pub struct SaveStepArgs {
    pub thread_id: String,
    pub user_id: Option<String>,
    pub agent_name: Option<String>,
    /// The prompt the step belongs to.
    pub prompt_message_id: String,
    pub step: Step,
}

/// Persist one completed step: its new messages, their embeddings and the
/// serialized step, as one mutation under the prompt's `order` group.
///
/// Never displaces pending messages — the step's own prompt is pending
/// while the generation runs.
pub async fn save_step(
    store: &dyn MessageStore,
    embedder: Option<&dyn EmbeddingModel>,
    args: SaveStepArgs,
) -> Result<Vec<MessageDoc>, AgentError> {
    let messages = new_messages_in_step(&args.step);
    let embeddings = match embedder {
        Some(embedder) => generate_embeddings(embedder, &messages).await?,
        None => None,
    };

    let docs = store
        .add_step(AddStepArgs {
            thread_id: args.thread_id,
            user_id: args.user_id,
            agent_name: args.agent_name,
            prompt_message_id: args.prompt_message_id,
            step: StepRecord {
                step: serialize_step(&args.step),
                messages,
                embeddings,
            },
            fail_pending_steps: false,
            provider: Some(args.step.provider.clone()),
            model: Some(args.step.model.clone()),
        })
        .await?;
    Ok(docs)
}

/// Finalize a prompt message: commit on success, roll back with the error
/// string on failure.
pub async fn complete_message(
    store: &dyn MessageStore,
    message_id: &str,
    outcome: Result<(), &str>,
) -> Result<(), AgentError> {
    match outcome {
        Ok(()) => Ok(store.commit_message(message_id).await?),
        Err(error) => Ok(store.rollback_message(message_id, error).await?),
    }
}
