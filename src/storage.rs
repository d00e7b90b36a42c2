//! Storage backend contract.
//!
//! The backend is treated as a linearizable key-indexed message store:
//! every mutation here is atomic from the orchestrator's perspective, and
//! commit/rollback transition the whole `order` group of the targeted
//! message so a transaction never half-completes.

use crate::embeddings::MessageEmbeddings;
use crate::error::StoreError;
use crate::types::{CoreMessage, MessageDoc, MessageStatus, ThreadDoc};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod memory;

pub use memory::MemoryStore;

/// Sort order for message listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Arguments for `create_thread`.
#[derive(Debug, Clone, Default)]
pub struct CreateThreadArgs {
    pub user_id: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
}

/// Arguments for `list_messages_by_thread`.
#[derive(Debug, Clone)]
pub struct ListMessagesArgs {
    pub thread_id: String,
    /// Drop tool messages from the page.
    pub exclude_tool_messages: bool,
    /// Maximum number of messages to return (clamped to 1..=500).
    pub limit: usize,
    /// Truncate the listing at this message, inclusive.
    pub up_to_and_including_message_id: Option<String>,
    pub order: SortOrder,
    /// Keep only these statuses. Empty means no status filter.
    pub statuses: Vec<MessageStatus>,
}

impl Default for ListMessagesArgs {
    fn default() -> Self {
        Self {
            thread_id: String::new(),
            exclude_tool_messages: false,
            limit: 100,
            up_to_and_including_message_id: None,
            order: SortOrder::Asc,
            statuses: vec![MessageStatus::Success],
        }
    }
}

/// One page of a message listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    pub page: Vec<MessageDoc>,
    pub is_done: bool,
}

/// Neighborhood expansion applied around each search hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRange {
    pub before: usize,
    pub after: usize,
}

impl Default for MessageRange {
    fn default() -> Self {
        Self {
            before: 2,
            after: 1,
        }
    }
}

/// Arguments for `search_messages`.
#[derive(Debug, Clone)]
pub struct SearchMessagesArgs {
    pub user_id: Option<String>,
    /// When set, restrict the search to this thread.
    pub thread_id: Option<String>,
    /// Only consider messages strictly before this message.
    pub before_message_id: Option<String>,
    /// Query text for the text index.
    pub text: String,
    pub limit: usize,
    /// Applied after `limit`, so the result count can exceed it.
    pub message_range: MessageRange,
    /// Query vector for the vector index.
    pub vector: Option<Vec<f32>>,
    pub vector_model: Option<String>,
    pub text_search: bool,
    pub vector_search: bool,
}

/// Arguments for `add_messages`.
#[derive(Debug, Clone)]
pub struct AddMessagesArgs {
    pub thread_id: String,
    pub user_id: Option<String>,
    pub agent_name: Option<String>,
    /// When set, the new messages join this message's `order` group instead
    /// of opening a new one.
    pub prompt_message_id: Option<String>,
    /// Vectors aligned with `messages`.
    pub embeddings: Option<MessageEmbeddings>,
    pub messages: Vec<CoreMessage>,
    /// Per-message metadata, aligned with `messages`.
    pub metadata: Option<Vec<Value>>,
    /// Write the new messages as `pending` instead of `success`.
    pub pending: bool,
    /// Transition the thread's prior pending messages to `failed` first.
    pub fail_pending_steps: bool,
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// The atomic payload of `add_step`: the serialized step, the new messages
/// it produced, and their embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Value,
    pub messages: Vec<CoreMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<MessageEmbeddings>,
}

/// Arguments for `add_step`.
#[derive(Debug, Clone)]
pub struct AddStepArgs {
    pub thread_id: String,
    pub user_id: Option<String>,
    pub agent_name: Option<String>,
    /// The prompt whose `order` group the step messages join.
    pub prompt_message_id: String,
    pub step: StepRecord,
    /// Always false from the orchestrator: a step in progress must not
    /// displace its own prompt.
    pub fail_pending_steps: bool,
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// The storage contract (names stable across implementations).
///
/// `add_messages` assigns `order`/`step_order`; commit and rollback only
/// ever transition `pending` rows and are no-ops otherwise, so a prompt
/// displaced by a newer generation cannot be resurrected.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Create a thread. Every call makes a fresh id.
    async fn create_thread(&self, args: CreateThreadArgs) -> Result<ThreadDoc, StoreError>;

    /// List a thread's messages ordered by `(order, step_order)`.
    async fn list_messages_by_thread(
        &self,
        args: ListMessagesArgs,
    ) -> Result<MessagePage, StoreError>;

    /// Hybrid text/vector search over committed messages.
    async fn search_messages(
        &self,
        args: SearchMessagesArgs,
    ) -> Result<Vec<MessageDoc>, StoreError>;

    /// Append messages, assigning their position. Returns the created docs
    /// in input order.
    async fn add_messages(&self, args: AddMessagesArgs) -> Result<Vec<MessageDoc>, StoreError>;

    /// Append a completed step under its prompt's `order` group.
    async fn add_step(&self, args: AddStepArgs) -> Result<Vec<MessageDoc>, StoreError>;

    /// Transition the message's pending `order` group to `success`.
    async fn commit_message(&self, message_id: &str) -> Result<(), StoreError>;

    /// Transition the message's pending `order` group to `failed`,
    /// recording `error` on the targeted message.
    async fn rollback_message(&self, message_id: &str, error: &str) -> Result<(), StoreError>;
}
