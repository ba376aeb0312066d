//! Queue engine for the Scirocco message broker.
//!
//! Producers push messages addressed to a recipient; consumers pull the
//! oldest eligible message addressed to them, which claims it, and later
//! acknowledge or reject it. Storage sits behind [`MessageStore`], with an
//! in-memory implementation for tests and a SQLite one for deployment.

pub mod clock;
pub mod engine;
pub mod error;
pub mod store;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{QueueEngine, QueuePolicy};
pub use error::{QueueError, StoreError};
pub use store::{MemoryStore, MessageStore, SqliteStore, StatusUpdate, TimestampField};
pub use validation::{validate_new_message, NewMessage, SystemFields, ValidationErrors};
