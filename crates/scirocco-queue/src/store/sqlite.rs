//! SQLite-backed message store.
//!
//! Every mutating call runs inside a `BEGIN IMMEDIATE` transaction, which
//! takes SQLite's write lock before the first read. The claim is one
//! `UPDATE … WHERE id = (SELECT …) RETURNING …` statement inside that
//! transaction, so no other writer can observe or claim the row in between.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use scirocco_db::DbPool;
use scirocco_types::{
    format_timestamp, parse_timestamp, Message, MessageId, MessageStatus, Payload, PayloadKind,
};

use super::{MessageStore, StatusUpdate};
use crate::error::StoreError;

const MESSAGE_COLUMNS: &str = "id, sender, recipient, status, tries, payload_kind, payload,
    created_time, update_time, scheduled_time, processing_time, processed_time, error_time";

/// Message store over a pooled SQLite database.
///
/// The pool must have had [`scirocco_db::run_migrations`] applied.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn timestamp_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(|e| conversion_error(idx, e))
}

fn optional_timestamp_at(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_timestamp(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn map_row_to_message(row: &Row) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let id: MessageId = id.parse().map_err(|e| conversion_error(0, e))?;

    let status: String = row.get(3)?;
    let status: MessageStatus = status.parse().map_err(|e| conversion_error(3, e))?;

    let kind: String = row.get(5)?;
    let kind: PayloadKind = kind.parse().map_err(|e| conversion_error(5, e))?;
    let body: String = row.get(6)?;
    let payload = Payload::decode(kind, &body).map_err(|e| conversion_error(6, e))?;

    Ok(Message {
        id,
        from: row.get(1)?,
        to: row.get(2)?,
        status,
        tries: row.get(4)?,
        payload,
        created_time: timestamp_at(row, 7)?,
        update_time: timestamp_at(row, 8)?,
        scheduled_time: optional_timestamp_at(row, 9)?,
        processing_time: optional_timestamp_at(row, 10)?,
        processed_time: optional_timestamp_at(row, 11)?,
        error_time: optional_timestamp_at(row, 12)?,
    })
}

fn format_optional(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.as_ref().map(format_timestamp)
}

impl MessageStore for SqliteStore {
    fn insert(&self, message: &Message) -> Result<MessageId, StoreError> {
        let conn = self.pool.get()?;
        let body = message.payload.encode()?;

        conn.execute(
            "INSERT INTO messages (
                id, sender, recipient, status, tries, payload_kind, payload,
                created_time, update_time, scheduled_time, available_time,
                processing_time, processed_time, error_time
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                message.id.to_hex(),
                message.from,
                message.to,
                message.status.as_str(),
                message.tries,
                message.payload.kind().as_str(),
                body,
                format_timestamp(&message.created_time),
                format_timestamp(&message.update_time),
                format_optional(message.scheduled_time),
                format_timestamp(&message.available_at()),
                format_optional(message.processing_time),
                format_optional(message.processed_time),
                format_optional(message.error_time),
            ],
        )?;
        Ok(message.id)
    }

    fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        let conn = self.pool.get()?;
        let message = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id.to_hex()],
                map_row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    fn atomic_claim(
        &self,
        recipient: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Message>, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let claimed = tx
            .query_row(
                &format!(
                    "UPDATE messages
                     SET status = 'processing',
                         tries = tries + 1,
                         processing_time = ?2,
                         update_time = ?2
                     WHERE id = (
                         SELECT id FROM messages
                         WHERE recipient = ?1
                           AND status IN ('pending', 'scheduled')
                           AND available_time <= ?2
                         ORDER BY available_time ASC, created_time ASC, id ASC
                         LIMIT 1
                     )
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                params![recipient, format_timestamp(&now)],
                map_row_to_message,
            )
            .optional()?;

        tx.commit()?;
        Ok(claimed)
    }

    fn update_status(&self, update: &StatusUpdate) -> Result<bool, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // The stamped column comes from a closed enum, never from input.
        let stamp = update
            .stamp
            .map(|field| format!(", {} = ?2", field.column()))
            .unwrap_or_default();
        let sql = format!(
            "UPDATE messages
             SET status = ?1,
                 update_time = ?2{stamp},
                 scheduled_time = COALESCE(?3, scheduled_time),
                 available_time = COALESCE(?3, available_time)
             WHERE id = ?4 AND status = ?5"
        );

        let count = tx.execute(
            &sql,
            params![
                update.next.as_str(),
                format_timestamp(&update.now),
                format_optional(update.reschedule_at),
                update.id.to_hex(),
                update.expected.as_str(),
            ],
        )?;

        tx.commit()?;
        Ok(count == 1)
    }

    fn release_expired(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let count = tx.execute(
            "UPDATE messages
             SET status = 'pending', update_time = ?2
             WHERE status = 'processing'
               AND processing_time IS NOT NULL
               AND processing_time <= ?1",
            params![format_timestamp(&claimed_before), format_timestamp(&now)],
        )?;
        tx.commit()?;
        Ok(count)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let deleted = conn.execute("DELETE FROM messages", [])?;
        tracing::debug!(deleted, "cleared message store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests as suite;
    use scirocco_db::{create_pool, run_migrations, DbRuntimeSettings};
    use std::sync::Arc;

    fn file_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queue.db");
        let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default())
            .expect("pool should build");
        run_migrations(&pool.get().unwrap()).expect("migrations should run");
        (dir, SqliteStore::new(pool))
    }

    #[test]
    fn conformance() {
        let (_dir, store) = file_store();
        suite::run_all(&store);
    }

    #[test]
    fn conformance_in_memory() {
        let settings = DbRuntimeSettings {
            pool_max_size: 1,
            ..DbRuntimeSettings::default()
        };
        let pool = create_pool(":memory:", settings).unwrap();
        run_migrations(&pool.get().unwrap()).unwrap();
        suite::run_all(&SqliteStore::new(pool));
    }

    #[test]
    fn concurrent_claims_are_exclusive() {
        let (_dir, store) = file_store();
        suite::concurrent_claims_are_exclusive(Arc::new(store));
    }

    #[test]
    fn corrupt_rows_surface_as_errors() {
        let (_dir, store) = file_store();
        let m = suite::message("p", "r", suite::t0());
        store.insert(&m).unwrap();
        store
            .pool()
            .get()
            .unwrap()
            .execute(
                "UPDATE messages SET payload = '{not json' WHERE id = ?1",
                [m.id.to_hex()],
            )
            .unwrap();

        let err = store.find_by_id(&m.id).unwrap_err();
        assert!(matches!(err, StoreError::Database(_)), "got {err:?}");
    }

    #[test]
    fn available_time_tracks_schedule() {
        let (_dir, store) = file_store();
        let mut m = suite::message("p", "r", suite::t0());
        m.scheduled_time = Some(suite::t0() + chrono::Duration::minutes(1));
        store.insert(&m).unwrap();

        let available: String = store
            .pool()
            .get()
            .unwrap()
            .query_row(
                "SELECT available_time FROM messages WHERE id = ?1",
                [m.id.to_hex()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(available, "2024-06-01T08:01:00.000000Z");
    }
}
