//! AuditGraph relational source.
//!
//! Read-only access to the system of record: a SQLite implementation used
//! by the CLI and an in-memory snapshot used by tests and JSON exports.

pub mod migrations;
pub mod pool;
pub mod snapshot;
pub mod sqlite;

pub use pool::{DbError, DbPool, DbResult};
pub use snapshot::{Snapshot, SnapshotSource};
pub use sqlite::SqliteSource;
