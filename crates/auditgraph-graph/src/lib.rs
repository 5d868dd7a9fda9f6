//! # AuditGraph Graph
//!
//! The graph side of the sync engine: the store contract with its Neo4j and
//! in-memory implementations, the idempotent event handlers, the worker
//! pool, and the backfill and reconciliation passes.

pub mod client;
pub mod memory;
pub mod ops;
pub mod schema;
pub mod store;
pub mod sync;

pub use client::Neo4jGraph;
pub use memory::{GraphSnapshot, MemoryGraph};
pub use ops::{Cardinality, GraphOp, NodeRef};
pub use store::{GraphCounts, GraphStore};
pub use sync::{
    backfill::{run_backfill, BackfillReport},
    handlers::plan,
    reconcile::{run_reconcile, ReconcileOptions, ReconcileReport},
    worker::{PoolConfig, PoolStats, SyncWorker, WorkerPool},
};
