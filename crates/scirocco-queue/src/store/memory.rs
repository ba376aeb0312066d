//! In-memory reference store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use scirocco_types::{Message, MessageId, MessageStatus};

use super::{MessageStore, StatusUpdate, TimestampField};
use crate::error::StoreError;

/// Message store backed by a `HashMap` behind one mutex.
///
/// Every operation, claim included, runs entirely inside the lock, so
/// selection and mutation can never interleave with another caller.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: Mutex<HashMap<MessageId, Message>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<MessageId, Message>>, StoreError> {
        self.messages.lock().map_err(|_| {
            tracing::error!("memory store lock poisoned");
            StoreError::LockPoisoned
        })
    }

    /// Number of stored messages.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.is_empty())
    }
}

impl MessageStore for MemoryStore {
    fn insert(&self, message: &Message) -> Result<MessageId, StoreError> {
        let mut messages = self.lock()?;
        if messages.contains_key(&message.id) {
            return Err(StoreError::Corrupt(format!(
                "duplicate message id {}",
                message.id
            )));
        }
        messages.insert(message.id, message.clone());
        Ok(message.id)
    }

    fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        Ok(self.lock()?.get(id).cloned())
    }

    fn atomic_claim(
        &self,
        recipient: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Message>, StoreError> {
        let mut messages = self.lock()?;

        let candidate = messages
            .values()
            .filter(|m| m.to == recipient && m.is_claimable_at(now))
            .min_by_key(|m| (m.available_at(), m.created_time, m.id))
            .map(|m| m.id);

        let Some(id) = candidate else {
            return Ok(None);
        };
        let Some(message) = messages.get_mut(&id) else {
            return Ok(None);
        };

        message.status = MessageStatus::Processing;
        message.tries += 1;
        message.processing_time = Some(now);
        message.update_time = now;
        Ok(Some(message.clone()))
    }

    fn update_status(&self, update: &StatusUpdate) -> Result<bool, StoreError> {
        let mut messages = self.lock()?;
        let Some(message) = messages.get_mut(&update.id) else {
            return Ok(false);
        };
        if message.status != update.expected {
            return Ok(false);
        }

        message.status = update.next;
        message.update_time = update.now;
        match update.stamp {
            Some(TimestampField::Processing) => message.processing_time = Some(update.now),
            Some(TimestampField::Processed) => message.processed_time = Some(update.now),
            Some(TimestampField::Error) => message.error_time = Some(update.now),
            None => {}
        }
        if let Some(at) = update.reschedule_at {
            message.scheduled_time = Some(at);
        }
        Ok(true)
    }

    fn release_expired(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut messages = self.lock()?;
        let mut released = 0;
        for message in messages.values_mut() {
            let expired = message.status == MessageStatus::Processing
                && message
                    .processing_time
                    .is_some_and(|claimed| claimed <= claimed_before);
            if expired {
                message.status = MessageStatus::Pending;
                message.update_time = now;
                released += 1;
            }
        }
        Ok(released)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.lock()?.clear();
        Ok(())
    }
}
