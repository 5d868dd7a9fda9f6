//! Sync worker and the pool that feeds it from the queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use auditgraph_core::config::{QueueConfig, WorkerConfig};
use auditgraph_core::queue::{EventQueue, FailOutcome, Job};
use auditgraph_core::{EventEnvelope, EventSink, SyncEvent};

use super::handlers::plan;
use crate::store::GraphStore;

/// Applies events to the graph. Holds no state between events.
#[derive(Clone)]
pub struct SyncWorker {
    graph: Arc<dyn GraphStore>,
}

impl SyncWorker {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    /// Apply one event in a single graph transaction.
    pub async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        self.apply(&envelope.event).await.with_context(|| {
            format!(
                "Failed to apply {} event {}",
                envelope.event_type(),
                envelope.event_id
            )
        })?;
        debug!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type(),
            "Event applied"
        );
        Ok(())
    }

    async fn apply(&self, event: &SyncEvent) -> Result<()> {
        self.graph.apply(&plan(event)).await
    }
}

/// Direct-apply path for batch jobs: events skip the queue.
#[async_trait]
impl EventSink for SyncWorker {
    async fn emit(&self, event: SyncEvent) -> Result<()> {
        let event_type = event.event_type();
        self.apply(&event)
            .await
            .with_context(|| format!("Failed to apply {} event", event_type))
    }
}

/// Pool tuning.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub concurrency: usize,
    /// How long one reserve call waits; also bounds shutdown latency.
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
    pub stall_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
            visibility_timeout: Duration::from_secs(30),
            stall_check_interval: Duration::from_secs(15),
        }
    }
}

impl PoolConfig {
    pub fn from_config(worker: &WorkerConfig, queue: &QueueConfig) -> Self {
        Self {
            concurrency: worker.concurrency.max(1),
            poll_interval: Duration::from_millis(worker.poll_interval_ms),
            visibility_timeout: queue.visibility_timeout(),
            stall_check_interval: Duration::from_secs(worker.stall_check_secs.max(1)),
        }
    }
}

/// Job outcome counters.
#[derive(Debug, Default)]
pub struct PoolStats {
    completed: AtomicUsize,
    retried: AtomicUsize,
    dead: AtomicUsize,
    restarts: AtomicUsize,
}

impl PoolStats {
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn dead(&self) -> usize {
        self.dead.load(Ordering::Relaxed)
    }

    /// Consumer loops restarted after a panic.
    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::Relaxed)
    }
}

/// Concurrent consumers of one queue.
#[derive(Clone)]
pub struct WorkerPool {
    queue: Arc<dyn EventQueue>,
    worker: SyncWorker,
    config: PoolConfig,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn EventQueue>, worker: SyncWorker, config: PoolConfig) -> Self {
        Self {
            queue,
            worker,
            config,
            stats: Arc::new(PoolStats::default()),
        }
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Run until `shutdown` turns true. Jobs already reserved are finished
    /// before the loops exit.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            concurrency = self.config.concurrency,
            "Starting sync worker pool"
        );

        let mut handles = Vec::with_capacity(self.config.concurrency + 1);
        for slot in 0..self.config.concurrency {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move { pool.supervise(slot, shutdown).await }));
        }
        {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move { pool.recover_stalled_loop(shutdown).await }));
        }

        for result in futures::future::join_all(handles).await {
            result.context("Worker task panicked")?;
        }

        info!(
            completed = self.stats.completed(),
            retried = self.stats.retried(),
            dead = self.stats.dead(),
            "Sync worker pool stopped"
        );
        Ok(())
    }

    /// Process ready jobs on the current task until none is left.
    ///
    /// Jobs whose retry delay has not elapsed yet stay in the queue.
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while let Some(job) = self
            .queue
            .reserve(Duration::ZERO)
            .await
            .context("Failed to reserve job")?
        {
            self.process(job).await;
            processed += 1;
        }
        Ok(processed)
    }

    /// Keep one consumer loop alive; a panicking loop is logged and
    /// restarted. Its reserved job comes back through stall recovery.
    async fn supervise(&self, slot: usize, shutdown: watch::Receiver<bool>) {
        loop {
            let pool = self.clone();
            let rx = shutdown.clone();
            match tokio::spawn(async move { pool.consume(slot, rx).await }).await {
                Ok(()) => return,
                Err(e) if e.is_panic() => {
                    self.stats.restarts.fetch_add(1, Ordering::Relaxed);
                    error!(slot, error = %e, "Worker loop panicked, restarting");
                    if *shutdown.borrow() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(slot, error = %e, "Worker loop cancelled");
                    return;
                }
            }
        }
    }

    async fn consume(&self, slot: usize, shutdown: watch::Receiver<bool>) {
        debug!(slot, "Worker loop started");
        while !*shutdown.borrow() {
            match self.queue.reserve(self.config.poll_interval).await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => {}
                Err(e) => {
                    warn!(slot, error = %e, "Failed to reserve job");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
        debug!(slot, "Worker loop stopped");
    }

    async fn recover_stalled_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.stall_check_interval);
        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.queue.recover_stalled(self.config.visibility_timeout).await {
                        warn!(error = %e, "Stalled job recovery failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn process(&self, job: Job) {
        let result = match EventEnvelope::from_job(&job) {
            Ok(envelope) => self.worker.handle(&envelope).await,
            Err(e) => Err(anyhow::Error::new(e).context(format!("Malformed job {}", job.id))),
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.queue.complete(&job).await {
                    // Redelivery is harmless: the handler is idempotent.
                    warn!(job_id = %job.id, error = %e, "Failed to acknowledge job");
                }
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => self.record_failure(&job, &err).await,
        }
    }

    async fn record_failure(&self, job: &Job, err: &anyhow::Error) {
        let message = format!("{:#}", err);
        match self.queue.fail(job, &message).await {
            Ok(FailOutcome::Retrying { attempt, delay }) => {
                self.stats.retried.fetch_add(1, Ordering::Relaxed);
                warn!(
                    job_id = %job.id,
                    event_type = %job.name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Sync failed, retrying"
                );
            }
            Ok(FailOutcome::Dead { attempts }) => {
                self.stats.dead.fetch_add(1, Ordering::Relaxed);
                error!(
                    job_id = %job.id,
                    event_type = %job.name,
                    attempts,
                    error = %message,
                    "Sync failed permanently, job parked"
                );
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to record job failure");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditgraph_core::event::model::{AssignAuditor, LinkEvidenceToControl};
    use auditgraph_core::model::{NodeLabel, RelType};
    use auditgraph_core::queue::{MemoryQueue, NewJob, RetryPolicy};
    use auditgraph_core::GraphEventProducer;
    use serde_json::json;

    use crate::memory::MemoryGraph;
    use crate::ops::NodeRef;

    fn assign_auditor() -> SyncEvent {
        SyncEvent::AssignAuditor(AssignAuditor {
            project_id: "P1".to_string(),
            auditor_id: "U1".to_string(),
        })
    }

    fn setup(policy: RetryPolicy) -> (Arc<MemoryQueue>, Arc<MemoryGraph>, WorkerPool) {
        let queue = Arc::new(MemoryQueue::new(policy));
        let graph = Arc::new(MemoryGraph::new());
        let pool = WorkerPool::new(
            queue.clone(),
            SyncWorker::new(graph.clone()),
            PoolConfig {
                concurrency: 2,
                poll_interval: Duration::from_millis(10),
                visibility_timeout: Duration::from_secs(30),
                stall_check_interval: Duration::from_millis(50),
            },
        );
        (queue, graph, pool)
    }

    #[tokio::test]
    async fn test_duplicate_submissions_converge_to_one_edge() {
        let (queue, graph, pool) = setup(RetryPolicy::default());
        let producer = GraphEventProducer::new(queue.clone());

        let first = producer.submit(assign_auditor()).await;
        let second = producer.submit(assign_auditor()).await;
        assert_ne!(first, second);

        assert_eq!(pool.drain().await.unwrap(), 2);
        let snapshot = graph.snapshot();
        let edges = snapshot.edges_between(
            &NodeRef::new(NodeLabel::User, "U1"),
            RelType::AuditedBy,
            &NodeRef::new(NodeLabel::Project, "P1"),
        );
        assert_eq!(edges.len(), 1);
        assert_eq!(pool.stats().completed(), 2);
    }

    #[tokio::test]
    async fn test_same_dedup_key_is_delivered_once() {
        let (queue, graph, pool) = setup(RetryPolicy::default());
        let job = EventEnvelope::new(assign_auditor()).to_job().unwrap();
        queue.enqueue(job.clone()).await.unwrap();
        queue.enqueue(job).await.unwrap();

        assert_eq!(pool.drain().await.unwrap(), 1);
        assert_eq!(graph.snapshot().relationships.len(), 1);
    }

    #[tokio::test]
    async fn test_graph_outage_retries_then_succeeds() {
        let (queue, graph, pool) = setup(RetryPolicy {
            max_attempts: 5,
            backoff_base: Duration::from_millis(50),
        });
        let producer = GraphEventProducer::new(queue.clone());
        producer.submit(assign_auditor()).await.unwrap();

        graph.set_available(false);
        assert_eq!(pool.drain().await.unwrap(), 1);
        assert_eq!(pool.stats().retried(), 1);
        assert_eq!(queue.counts().await.unwrap().delayed, 1);

        graph.set_available(true);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(pool.drain().await.unwrap(), 1);
        assert_eq!(pool.stats().completed(), 1);
        assert!(queue.counts().await.unwrap().is_idle());
        assert_eq!(graph.snapshot().relationships.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_job_is_parked_after_attempts() {
        let (queue, _graph, pool) = setup(RetryPolicy {
            max_attempts: 1,
            backoff_base: Duration::from_millis(1),
        });
        queue
            .enqueue(NewJob {
                id: "bad".to_string(),
                name: "assign_auditor".to_string(),
                data: json!({
                    "eventId": "3a0e6c56-9b6f-4d0e-8f52-7f9a4c1d2e3b",
                    "payload": { "projectId": 7 },
                    "timestamp": "2026-01-01T00:00:00Z"
                }),
            })
            .await
            .unwrap();

        pool.drain().await.unwrap();
        assert_eq!(pool.stats().dead(), 1);
        let parked = queue.failed(10).await.unwrap();
        assert_eq!(parked.len(), 1);
        assert!(parked[0].last_error.as_deref().unwrap_or_default().contains("Malformed job bad"));
    }

    #[tokio::test]
    async fn test_pool_processes_until_shutdown() {
        let (queue, graph, pool) = setup(RetryPolicy::default());
        let producer = GraphEventProducer::new(queue.clone());
        for i in 0..10 {
            producer
                .submit(SyncEvent::LinkEvidenceToControl(LinkEvidenceToControl {
                    evidence_id: format!("E{}", i),
                    control_id: "C1".to_string(),
                }))
                .await
                .unwrap();
        }

        let (tx, rx) = watch::channel(false);
        let runner = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.run(rx).await })
        };
        for _ in 0..200 {
            if queue.counts().await.unwrap().is_idle() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        runner.await.unwrap().unwrap();

        assert_eq!(pool.stats().completed(), 10);
        assert_eq!(graph.snapshot().relationships.len(), 10);
    }

    #[tokio::test]
    async fn test_direct_sink_applies_immediately() {
        let graph = Arc::new(MemoryGraph::new());
        let worker = SyncWorker::new(graph.clone());
        worker.emit(assign_auditor()).await.unwrap();
        assert_eq!(graph.snapshot().relationships.len(), 1);
    }

    /// Panics on the first batch, then delegates.
    struct PanicOnce {
        inner: MemoryGraph,
        panicked: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl GraphStore for PanicOnce {
        async fn apply(&self, ops: &[crate::ops::GraphOp]) -> Result<()> {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("graph driver bug");
            }
            self.inner.apply(ops).await
        }

        async fn query_ids_not_in(
            &self,
            label: NodeLabel,
            valid_ids: &std::collections::HashSet<String>,
        ) -> Result<Vec<String>> {
            self.inner.query_ids_not_in(label, valid_ids).await
        }

        async fn counts(&self) -> Result<crate::store::GraphCounts> {
            self.inner.counts().await
        }
    }

    #[tokio::test]
    async fn test_panicking_loop_is_restarted_and_job_recovered() {
        let queue = Arc::new(MemoryQueue::new(RetryPolicy::default()));
        let graph = Arc::new(PanicOnce {
            inner: MemoryGraph::new(),
            panicked: std::sync::atomic::AtomicBool::new(false),
        });
        let pool = WorkerPool::new(
            queue.clone(),
            SyncWorker::new(graph.clone()),
            PoolConfig {
                concurrency: 1,
                poll_interval: Duration::from_millis(10),
                visibility_timeout: Duration::from_millis(50),
                stall_check_interval: Duration::from_millis(20),
            },
        );
        GraphEventProducer::new(queue.clone())
            .submit(assign_auditor())
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let runner = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.run(rx).await })
        };
        for _ in 0..200 {
            if pool.stats().completed() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        runner.await.unwrap().unwrap();

        assert_eq!(pool.stats().restarts(), 1);
        assert_eq!(pool.stats().completed(), 1);
        assert_eq!(graph.inner.snapshot().relationships.len(), 1);
        assert!(queue.counts().await.unwrap().is_idle());
    }
}
