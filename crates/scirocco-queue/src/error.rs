//! Error types for the queue engine and its stores.

use scirocco_types::{MessageId, MessageStatus};
use thiserror::Error;

use crate::validation::ValidationErrors;

/// Infrastructure failures raised by a [`MessageStore`](crate::MessageStore).
///
/// Stores never report domain conditions (unknown id, wrong status) as
/// errors; those come back as `None` / `false` so the engine can classify them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt message record: {0}")]
    Corrupt(String),

    #[error("message store lock poisoned")]
    LockPoisoned,
}

/// Errors returned by [`QueueEngine`](crate::QueueEngine) operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The request was rejected before anything was persisted.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// No message has this id.
    #[error("message not found: {0}")]
    NotFound(MessageId),

    /// The message exists but its status does not allow the operation.
    #[error("message {id} cannot transition out of status '{current}'")]
    InvalidStateTransition {
        id: MessageId,
        current: MessageStatus,
    },

    /// The retry delay would schedule the message past the last storable
    /// instant. The message is left in `processing`.
    #[error("retry delay of {retry_delay:?} puts message {id} out of range")]
    RetryOutOfRange {
        id: MessageId,
        retry_delay: std::time::Duration,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
