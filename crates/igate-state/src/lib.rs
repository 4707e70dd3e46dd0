//! Persistence for the igate gateway
//!
//! The gateway's durable state (provisioning cache, mapping table,
//! relay-link statistics, telemetry sequence counter, telemetry log) is
//! stored as named JSON records behind the [`store::RecordStore`] trait.
//! Two implementations:
//!
//! - [`store::MemoryStore`] - in-memory, for tests and ephemeral runs
//! - [`sqlite::SqliteStore`] - SQLite via sqlx, the default on disk
//!
//! No semantics live here: last write wins, and bulk tables are replaced
//! wholesale.

pub mod error;
pub mod sqlite;
pub mod store;

pub use error::{Result, StateError};
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, RecordStore};
