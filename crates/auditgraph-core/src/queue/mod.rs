//! Durable queue contract between producers and sync workers.
//!
//! Delivery is at-least-once. A job whose dedup key is still waiting,
//! delayed or active is never added twice. Failed jobs are retried with
//! exponential backoff and parked in `failed` once attempts run out.

pub mod memory;
pub mod policy;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryQueue;
pub use policy::RetryPolicy;

/// Queue error types.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    NotFound(String),
}

/// `last_error` of a job parked after stalling on every attempt.
pub const STALLED_ERROR: &str = "job stalled: worker stopped before acknowledging";

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// A submission to the queue. `id` is the dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub id: String,
    pub name: String,
    pub data: serde_json::Value,
}

/// A job as held by the queue.
///
/// The Redis stall script rewrites the fields after `data` in place, so
/// their order is part of the stored format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub data: serde_json::Value,
    pub attempts_made: u32,
    pub enqueued_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn from_new(job: NewJob) -> Self {
        Self {
            id: job.id,
            name: job.name,
            data: job.data,
            attempts_made: 0,
            enqueued_at: Utc::now(),
            last_error: None,
            failed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A job with the same key is already waiting, delayed or active.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Retrying { attempt: u32, delay: Duration },
    Dead { attempts: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub failed: usize,
}

impl QueueCounts {
    /// Nothing left that a worker could still pick up.
    pub fn is_idle(&self) -> bool {
        self.waiting == 0 && self.active == 0 && self.delayed == 0
    }
}

/// The queue broker contract.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Persist a job unless one with the same id is pending or in flight.
    async fn enqueue(&self, job: NewJob) -> QueueResult<EnqueueOutcome>;

    /// Take the next ready job, waiting up to `wait` for one to appear.
    async fn reserve(&self, wait: Duration) -> QueueResult<Option<Job>>;

    /// Acknowledge a processed job; it is removed from the queue.
    async fn complete(&self, job: &Job) -> QueueResult<()>;

    /// Record a failed attempt and schedule a retry or park the job.
    async fn fail(&self, job: &Job, error: &str) -> QueueResult<FailOutcome>;

    /// Move jobs reserved longer than `visibility_timeout` back to waiting.
    ///
    /// Each stall counts as an attempt; a job that runs out of attempts this
    /// way is parked with [`STALLED_ERROR`].
    async fn recover_stalled(&self, visibility_timeout: Duration) -> QueueResult<usize>;

    async fn counts(&self) -> QueueResult<QueueCounts>;

    /// Parked jobs, oldest failure first.
    async fn failed(&self, limit: usize) -> QueueResult<Vec<Job>>;

    /// Operator action: requeue a parked job with its attempt count reset.
    async fn retry_failed(&self, job_id: &str) -> QueueResult<bool>;

    /// Operator action: discard a parked job.
    async fn remove_failed(&self, job_id: &str) -> QueueResult<bool>;
}
