//! Database layer for the Scirocco message queue.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization
//! and embedded SQL migrations. The `messages` table consumed by the queue
//! store is created through the versioned migrations in this crate.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: a single-node queue needs no external database
//!   process. WAL lets pulls and fetches read while one writer claims.
//! - **`r2d2` connection pool**: bounded connection reuse shared by the HTTP
//!   handlers and the lease reaper.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, so the schema ships with the code that queries it.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
