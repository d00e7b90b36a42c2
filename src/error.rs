//! Error taxonomy for the orchestration core.

use thiserror::Error;

/// Errors surfaced by agent operations.
///
/// `InvalidArgument`, `Unsupported` and `Misuse` are raised before any
/// persistence happens. `Provider` and `Storage` errors raised after the
/// prompt message was saved trigger a rollback of that message before the
/// error is returned to the caller.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Conflicting or missing call arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation needs a capability the calling scope does not have.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// An API was driven in a way its contract forbids.
    #[error("misuse: {0}")]
    Misuse(String),

    /// The LLM or embedding backend failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// A storage mutation or query failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Thread not found.
    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    /// Message not found.
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// A state transition the backend refuses (e.g. committing a message
    /// that is not pending).
    #[error("invalid transition for message {message_id}: {detail}")]
    InvalidTransition { message_id: String, detail: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Convenience alias used across the crate.
pub type Result<T, E = AgentError> = std::result::Result<T, E>;
