//! Storage boundary for the queue engine.
//!
//! The engine never touches a database directly; it goes through
//! [`MessageStore`]. Both implementations make `atomic_claim` and
//! `update_status` a single indivisible step, which is the only coordination
//! the engine needs between concurrent requests.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use scirocco_types::{Message, MessageId, MessageStatus};

use crate::error::StoreError;

/// Audit timestamp stamped by a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampField {
    Processing,
    Processed,
    Error,
}

impl TimestampField {
    pub(crate) fn column(self) -> &'static str {
        match self {
            Self::Processing => "processing_time",
            Self::Processed => "processed_time",
            Self::Error => "error_time",
        }
    }
}

/// A guarded status transition.
///
/// Applied only if the message is currently in `expected`. `update_time` is
/// always set to `now`; `stamp`, when present, is set to `now` as well.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub id: MessageId,
    pub expected: MessageStatus,
    pub next: MessageStatus,
    pub now: DateTime<Utc>,
    pub stamp: Option<TimestampField>,
    /// New earliest claim instant, used when a message is sent back for retry.
    pub reschedule_at: Option<DateTime<Utc>>,
}

/// Durable keyed storage of messages.
pub trait MessageStore: Send + Sync {
    /// Stores a new message and returns its id.
    fn insert(&self, message: &Message) -> Result<MessageId, StoreError>;

    /// Looks a message up by id.
    fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, StoreError>;

    /// Claims the oldest eligible message addressed to `recipient`.
    ///
    /// Eligible means `pending` or `scheduled` with an effective scheduled time
    /// at or before `now`. Candidates are ordered by effective scheduled time,
    /// then creation time, then id. The winner moves to `processing` with
    /// `tries + 1` and `processing_time = update_time = now`, in the same
    /// indivisible step that selected it.
    fn atomic_claim(
        &self,
        recipient: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Message>, StoreError>;

    /// Applies `update` if its status precondition holds.
    ///
    /// Returns `false` when the message is missing or not in
    /// `update.expected`; nothing is written in that case.
    fn update_status(&self, update: &StatusUpdate) -> Result<bool, StoreError>;

    /// Moves every `processing` message claimed at or before
    /// `claimed_before` back to `pending`, stamping `update_time = now`.
    fn release_expired(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Removes every message. For tests and administrative resets only.
    fn clear(&self) -> Result<(), StoreError>;
}
