//! Destination for events synthesized by batch jobs.
//!
//! Backfill and reconciliation emit through this trait so they can feed the
//! live queue (via [`GraphEventProducer`]) or apply straight to the graph.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::event::SyncEvent;
use crate::producer::GraphEventProducer;

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: SyncEvent) -> Result<()>;
}

#[async_trait]
impl EventSink for GraphEventProducer {
    /// Batch jobs stop on a dropped event instead of silently skipping it;
    /// a re-run picks up from scratch.
    async fn emit(&self, event: SyncEvent) -> Result<()> {
        let event_type = event.event_type();
        self.submit(event)
            .await
            .map(|_| ())
            .ok_or_else(|| anyhow!("Event '{}' was not enqueued", event_type))
    }
}
