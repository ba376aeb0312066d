//! The queue engine: push, pull, fetch, ack, nack and lease expiry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scirocco_types::{is_storable_timestamp, Message, MessageId, MessageStatus};

use crate::clock::Clock;
use crate::error::QueueError;
use crate::store::{MessageStore, StatusUpdate, TimestampField};
use crate::validation::{validate_new_message, NewMessage, ValidationErrors, FIELD_FROM};

/// Retry and lease settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    /// Claims allowed before a nack sends the message to `error`.
    pub max_tries: u32,
    /// Delay before a nacked message becomes claimable again.
    pub retry_delay: Duration,
    /// How long a claim lasts before the message returns to `pending`.
    /// `None` keeps claimed messages in `processing` until acked or nacked.
    pub lease_timeout: Option<Duration>,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_tries: 5,
            retry_delay: Duration::from_secs(10),
            lease_timeout: None,
        }
    }
}

/// `now + delay`, or `None` when the result has no storable form.
fn offset_forward(now: DateTime<Utc>, delay: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .filter(is_storable_timestamp)
}

/// `now - delay`, or `None` when the result has no storable form.
fn offset_back(now: DateTime<Utc>, delay: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_sub_signed(delay))
        .filter(is_storable_timestamp)
}

/// Orchestrates message operations over a [`MessageStore`].
///
/// The engine keeps no mutable state of its own; it is cheap to clone and
/// safe to share across threads.
#[derive(Clone)]
pub struct QueueEngine {
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
    policy: QueuePolicy,
}

impl std::fmt::Debug for QueueEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEngine")
            .field("clock", &self.clock)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl QueueEngine {
    pub fn new(store: Arc<dyn MessageStore>, clock: Arc<dyn Clock>, policy: QueuePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Validates and stores a new message.
    ///
    /// # Errors
    ///
    /// `QueueError::Validation` when any field is invalid; nothing is stored
    /// in that case.
    pub fn push(&self, request: NewMessage) -> Result<Message, QueueError> {
        let now = self.clock.now();
        let message = validate_new_message(&request, now)?;
        self.store.insert(&message)?;

        tracing::info!(
            id = %message.id,
            from = %message.from,
            to = %message.to,
            status = %message.status,
            payload_kind = message.payload.kind().as_str(),
            "message pushed"
        );
        Ok(message)
    }

    /// Claims the next eligible message for `recipient`.
    ///
    /// Returns `Ok(None)` when nothing is eligible.
    pub fn pull(&self, recipient: &str) -> Result<Option<Message>, QueueError> {
        let recipient = recipient.trim();
        if recipient.is_empty() {
            let mut errors = ValidationErrors::new();
            errors.add(FIELD_FROM, "from is required");
            return Err(errors.into());
        }

        let now = self.clock.now();
        let claimed = self.store.atomic_claim(recipient, now)?;
        match &claimed {
            Some(message) => tracing::info!(
                id = %message.id,
                recipient,
                tries = message.tries,
                "message claimed"
            ),
            None => tracing::debug!(recipient, "no eligible message"),
        }
        Ok(claimed)
    }

    /// Returns the current state of a message.
    pub fn fetch(&self, id: &MessageId) -> Result<Message, QueueError> {
        self.store
            .find_by_id(id)?
            .ok_or(QueueError::NotFound(*id))
    }

    /// Marks a claimed message as processed.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidStateTransition` unless the
    /// message is `processing`.
    pub fn ack(&self, id: &MessageId) -> Result<Message, QueueError> {
        let update = StatusUpdate {
            id: *id,
            expected: MessageStatus::Processing,
            next: MessageStatus::Processed,
            now: self.clock.now(),
            stamp: Some(TimestampField::Processed),
            reschedule_at: None,
        };
        let message = self.transition(update)?;
        tracing::info!(id = %message.id, tries = message.tries, "message acknowledged");
        Ok(message)
    }

    /// Reports that a claimed message could not be handled.
    ///
    /// Below the retry budget the message goes back to `pending`, claimable
    /// again after the retry delay. Once `tries` reaches `max_tries` it moves
    /// to `error`.
    pub fn nack(&self, id: &MessageId) -> Result<Message, QueueError> {
        let current = self.fetch(id)?;
        if current.status != MessageStatus::Processing {
            return Err(QueueError::InvalidStateTransition {
                id: *id,
                current: current.status,
            });
        }

        let now = self.clock.now();
        let update = if current.tries >= self.policy.max_tries {
            StatusUpdate {
                id: *id,
                expected: MessageStatus::Processing,
                next: MessageStatus::Error,
                now,
                stamp: Some(TimestampField::Error),
                reschedule_at: None,
            }
        } else {
            let retry_at = offset_forward(now, self.policy.retry_delay).ok_or(
                QueueError::RetryOutOfRange {
                    id: *id,
                    retry_delay: self.policy.retry_delay,
                },
            )?;
            StatusUpdate {
                id: *id,
                expected: MessageStatus::Processing,
                next: MessageStatus::Pending,
                now,
                stamp: None,
                reschedule_at: Some(retry_at),
            }
        };

        let message = self.transition(update)?;
        if message.status == MessageStatus::Error {
            tracing::warn!(
                id = %message.id,
                tries = message.tries,
                max_tries = self.policy.max_tries,
                "message exhausted its retries"
            );
        } else {
            tracing::info!(
                id = %message.id,
                tries = message.tries,
                retry_at = ?message.scheduled_time,
                "message scheduled for retry"
            );
        }
        Ok(message)
    }

    /// Returns expired claims to `pending`. No-op without a lease timeout.
    pub fn release_expired(&self) -> Result<usize, QueueError> {
        let Some(timeout) = self.policy.lease_timeout else {
            return Ok(0);
        };
        let now = self.clock.now();
        // No claim can be older than the earliest storable instant.
        let Some(cutoff) = offset_back(now, timeout) else {
            return Ok(0);
        };
        let released = self.store.release_expired(cutoff, now)?;
        if released > 0 {
            tracing::info!(released, "released expired claims");
        }
        Ok(released)
    }

    /// Applies a guarded update and returns the resulting message.
    fn transition(&self, update: StatusUpdate) -> Result<Message, QueueError> {
        let id = update.id;
        if self.store.update_status(&update)? {
            return self.fetch(&id);
        }
        match self.store.find_by_id(&id)? {
            None => Err(QueueError::NotFound(id)),
            Some(message) => {
                tracing::debug!(
                    %id,
                    current = %message.status,
                    next = %update.next,
                    "rejected status transition"
                );
                Err(QueueError::InvalidStateTransition {
                    id,
                    current: message.status,
                })
            }
        }
    }
}
