//! Versioned schema migrations compiled into the binary.
//!
//! Each entry in [`MIGRATIONS`] has a unique, increasing version. Applied
//! versions are recorded in `_scirocco_migrations`; a migration's SQL and its
//! record are committed together or not at all.

use std::collections::BTreeSet;

use rusqlite::{params, Connection};
use thiserror::Error;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "messages",
    sql: include_str!("migrations/0001_messages.sql"),
}];

const TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS _scirocco_migrations (
    version INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);";

#[derive(Debug, Error)]
pub enum MigrationError {
    /// The tracking table could not be created or read.
    #[error("failed to read migration state: {0}")]
    State(#[source] rusqlite::Error),

    /// A migration's SQL or its tracking record failed; nothing was kept.
    #[error("migration {version} ({name}) failed: {source}")]
    Failed {
        version: u32,
        name: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

/// Brings the schema up to date and returns how many migrations this call
/// applied.
///
/// # Errors
///
/// Returns `MigrationError` if the tracking table is unusable or a migration
/// fails. Migrations applied before the failure stay applied.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply(conn, MIGRATIONS)
}

fn applied_versions(conn: &Connection) -> rusqlite::Result<BTreeSet<u32>> {
    conn.execute_batch(TRACKING_TABLE)?;
    let mut stmt = conn.prepare("SELECT version FROM _scirocco_migrations")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<BTreeSet<u32>>>()?;
    Ok(versions)
}

fn apply(conn: &Connection, migrations: &[Migration]) -> Result<usize, MigrationError> {
    let done = applied_versions(conn).map_err(MigrationError::State)?;

    let mut count = 0;
    for migration in migrations.iter().filter(|m| !done.contains(&m.version)) {
        let fail = |source: rusqlite::Error| MigrationError::Failed {
            version: migration.version,
            name: migration.name,
            source,
        };

        let tx = conn.unchecked_transaction().map_err(fail)?;
        tx.execute_batch(migration.sql).map_err(fail)?;
        tx.execute(
            "INSERT INTO _scirocco_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )
        .map_err(fail)?;
        tx.commit().map_err(fail)?;

        tracing::info!(
            version = migration.version,
            name = migration.name,
            "applied migration"
        );
        count += 1;
    }

    if count == 0 {
        tracing::debug!(current = ?done.last(), "schema up to date");
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn versions_are_unique_and_increasing() {
        assert!(MIGRATIONS.windows(2).all(|w| w[0].version < w[1].version));
    }

    #[test]
    fn fresh_database_gets_every_migration_once() {
        let conn = memory();
        assert_eq!(run_migrations(&conn).unwrap(), MIGRATIONS.len());
        assert_eq!(run_migrations(&conn).unwrap(), 0);

        let recorded: Vec<(u32, String)> = conn
            .prepare("SELECT version, name FROM _scirocco_migrations ORDER BY version")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(recorded, vec![(1, "messages".to_string())]);
    }

    #[test]
    fn messages_table_enforces_status_values() {
        let conn = memory();
        run_migrations(&conn).unwrap();

        let insert = |status: &str| {
            conn.execute(
                "INSERT INTO messages (
                    id, sender, recipient, status, tries, payload_kind, payload,
                    created_time, update_time, available_time
                ) VALUES (?1, 'f', 't', ?2, 0, 'json', '{}', 'x', 'x', 'x')",
                params![format!("id-{status}"), status],
            )
        };
        assert!(insert("pending").is_ok());
        assert!(insert("bogus").is_err());
    }

    #[test]
    fn failed_migration_leaves_no_trace() {
        let conn = memory();
        let broken = [
            Migration {
                version: 1,
                name: "ok",
                sql: "CREATE TABLE first_probe (id INTEGER);",
            },
            Migration {
                version: 2,
                name: "broken",
                sql: "CREATE TABLE second_probe (id INTEGER); SELECT * FROM missing_table;",
            },
        ];

        match apply(&conn, &broken) {
            Err(MigrationError::Failed { version, name, .. }) => {
                assert_eq!((version, name), (2, "broken"));
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let tables: BTreeSet<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert!(tables.contains("first_probe"));
        assert!(!tables.contains("second_probe"));
        assert_eq!(applied_versions(&conn).unwrap(), BTreeSet::from([1]));
    }
}
