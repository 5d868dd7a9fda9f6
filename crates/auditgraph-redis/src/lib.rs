//! AuditGraph Redis queue.
//!
//! Durable, at-least-once job queue on Redis implementing the
//! [`EventQueue`](auditgraph_core::EventQueue) contract.

pub mod client;
pub mod keys;
pub mod queue;

pub use client::{init_pool, RedisError, RedisPool, RedisResult};
pub use queue::RedisQueue;
