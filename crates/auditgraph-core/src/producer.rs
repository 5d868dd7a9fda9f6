//! Non-blocking event producer.
//!
//! Called from code paths that just committed a relational write. The
//! producer never returns an error and never panics: enqueue failures are
//! logged and the graph catches up at the next reconciliation pass.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::event::model::*;
use crate::event::{EventEnvelope, SyncEvent};
use crate::model::{NodeLabel, PropertyValue};
use crate::queue::{EnqueueOutcome, EventQueue};

/// Upper bound on how long `submit` waits for the broker.
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

/// Enqueues graph sync events on an injected queue handle.
#[derive(Clone)]
pub struct GraphEventProducer {
    queue: Arc<dyn EventQueue>,
    enqueue_timeout: Duration,
}

impl GraphEventProducer {
    pub fn new(queue: Arc<dyn EventQueue>) -> Self {
        Self {
            queue,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, enqueue_timeout: Duration) -> Self {
        self.enqueue_timeout = enqueue_timeout;
        self
    }

    /// Enqueue an event under a fresh `eventId`.
    ///
    /// Returns the event id when the queue accepted (or already held) the
    /// job, `None` when the event was dropped.
    pub async fn submit(&self, event: SyncEvent) -> Option<Uuid> {
        let envelope = EventEnvelope::new(event);
        let event_id = envelope.event_id;
        let event_type = envelope.event_type();

        let job = match envelope.to_job() {
            Ok(job) => job,
            Err(e) => {
                warn!(%event_id, %event_type, error = %e, "Failed to serialize graph event, dropping");
                return None;
            }
        };

        match tokio::time::timeout(self.enqueue_timeout, self.queue.enqueue(job)).await {
            Ok(Ok(EnqueueOutcome::Enqueued)) => {
                debug!(%event_id, %event_type, "Enqueued graph event");
                Some(event_id)
            }
            Ok(Ok(EnqueueOutcome::Duplicate)) => {
                debug!(%event_id, %event_type, "Graph event already queued");
                Some(event_id)
            }
            Ok(Err(e)) => {
                warn!(%event_id, %event_type, error = %e, "Failed to enqueue graph event (graph will lag until reconciliation)");
                None
            }
            Err(_) => {
                warn!(
                    %event_id,
                    %event_type,
                    timeout_ms = self.enqueue_timeout.as_millis() as u64,
                    "Timed out enqueueing graph event (graph will lag until reconciliation)"
                );
                None
            }
        }
    }

    /// Fire-and-forget variant of [`submit`](Self::submit).
    ///
    /// Spawns the enqueue on the current Tokio runtime and returns at once,
    /// so the caller never waits on the broker.
    pub fn dispatch(&self, event: SyncEvent) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let producer = self.clone();
                handle.spawn(async move {
                    producer.submit(event).await;
                });
            }
            Err(_) => {
                warn!(event_type = %event.event_type(), "No async runtime available, graph event dropped");
            }
        }
    }

    pub async fn assign_auditor(&self, project_id: &str, auditor_id: &str) -> Option<Uuid> {
        self.submit(SyncEvent::AssignAuditor(AssignAuditor {
            project_id: project_id.to_string(),
            auditor_id: auditor_id.to_string(),
        }))
        .await
    }

    pub async fn assign_reviewer(&self, project_id: &str, reviewer_id: &str) -> Option<Uuid> {
        self.submit(SyncEvent::AssignReviewer(AssignReviewer {
            project_id: project_id.to_string(),
            reviewer_id: reviewer_id.to_string(),
        }))
        .await
    }

    pub async fn assign_manager(&self, user_id: &str, manager_id: &str) -> Option<Uuid> {
        self.submit(SyncEvent::AssignManager(AssignManager {
            user_id: user_id.to_string(),
            manager_id: manager_id.to_string(),
        }))
        .await
    }

    pub async fn link_evidence_to_control(&self, evidence_id: &str, control_id: &str) -> Option<Uuid> {
        self.submit(SyncEvent::LinkEvidenceToControl(LinkEvidenceToControl {
            evidence_id: evidence_id.to_string(),
            control_id: control_id.to_string(),
        }))
        .await
    }

    pub async fn link_evidence_uploader(&self, evidence_id: &str, user_id: &str, role: &str) -> Option<Uuid> {
        self.submit(SyncEvent::LinkEvidenceUploader(LinkEvidenceUploader {
            evidence_id: evidence_id.to_string(),
            user_id: user_id.to_string(),
            role: role.to_string(),
        }))
        .await
    }

    pub async fn link_evidence_to_project(&self, evidence_id: &str, project_id: &str) -> Option<Uuid> {
        self.submit(SyncEvent::LinkEvidenceToProject(LinkEvidenceToProject {
            evidence_id: evidence_id.to_string(),
            project_id: project_id.to_string(),
        }))
        .await
    }

    pub async fn link_evidence_to_tag(&self, evidence_id: &str, tag_id: &str) -> Option<Uuid> {
        self.submit(SyncEvent::LinkEvidenceToTag(LinkEvidenceToTag {
            evidence_id: evidence_id.to_string(),
            tag_id: tag_id.to_string(),
        }))
        .await
    }

    pub async fn link_control_to_standard(&self, control_id: &str, standard_id: &str) -> Option<Uuid> {
        self.submit(SyncEvent::LinkControlToStandard(LinkControlToStandard {
            control_id: control_id.to_string(),
            standard_id: standard_id.to_string(),
        }))
        .await
    }

    pub async fn link_control_to_tag(&self, control_id: &str, tag_id: &str) -> Option<Uuid> {
        self.submit(SyncEvent::LinkControlToTag(LinkControlToTag {
            control_id: control_id.to_string(),
            tag_id: tag_id.to_string(),
        }))
        .await
    }

    pub async fn link_similar_controls(&self, control_id1: &str, control_id2: &str) -> Option<Uuid> {
        self.submit(SyncEvent::LinkSimilarControls(LinkSimilarControls {
            control_id1: control_id1.to_string(),
            control_id2: control_id2.to_string(),
        }))
        .await
    }

    pub async fn link_controls_via_tag(&self, control_id1: &str, control_id2: &str, tag_id: &str) -> Option<Uuid> {
        self.submit(SyncEvent::LinkControlsViaTag(LinkControlsViaTag {
            control_id1: control_id1.to_string(),
            control_id2: control_id2.to_string(),
            tag_id: tag_id.to_string(),
        }))
        .await
    }

    pub async fn link_evidence_across_standards(
        &self,
        evidence_id1: &str,
        evidence_id2: &str,
        customer_id: &str,
        standard_id: &str,
    ) -> Option<Uuid> {
        self.submit(SyncEvent::LinkEvidenceAcrossStandards(LinkEvidenceAcrossStandards {
            evidence_id1: evidence_id1.to_string(),
            evidence_id2: evidence_id2.to_string(),
            customer_id: customer_id.to_string(),
            standard_id: standard_id.to_string(),
        }))
        .await
    }

    pub async fn create_audit_request(&self, auditor_id: &str, project_id: &str, status: &str) -> Option<Uuid> {
        self.submit(SyncEvent::CreateAuditRequest(CreateAuditRequest {
            auditor_id: auditor_id.to_string(),
            project_id: project_id.to_string(),
            status: status.to_string(),
        }))
        .await
    }

    pub async fn report_issue(
        &self,
        customer_id: &str,
        manager_id: &str,
        issue_details: Option<IssueDetails>,
    ) -> Option<Uuid> {
        self.submit(SyncEvent::ReportIssue(ReportIssue {
            customer_id: customer_id.to_string(),
            manager_id: manager_id.to_string(),
            issue_details,
        }))
        .await
    }

    pub async fn link_compliance_to_customer(&self, compliance_id: &str, customer_id: &str) -> Option<Uuid> {
        self.submit(SyncEvent::LinkComplianceToCustomer(LinkComplianceToCustomer {
            compliance_id: compliance_id.to_string(),
            customer_id: customer_id.to_string(),
        }))
        .await
    }

    pub async fn update_node_property(
        &self,
        label: NodeLabel,
        id: &str,
        property: &str,
        value: PropertyValue,
    ) -> Option<Uuid> {
        self.submit(SyncEvent::UpdateNodeProperty(UpdateNodeProperty {
            label,
            id: id.to_string(),
            property: property.to_string(),
            value,
        }))
        .await
    }

    pub async fn create_standard(&self, id: &str, name: &str) -> Option<Uuid> {
        self.submit(SyncEvent::StandardCreated(StandardCreated {
            id: id.to_string(),
            name: name.to_string(),
        }))
        .await
    }

    pub async fn delete_standard(&self, id: &str) -> Option<Uuid> {
        self.submit(SyncEvent::StandardDeleted(EntityRef { id: id.to_string() }))
            .await
    }

    pub async fn delete_user(&self, id: &str) -> Option<Uuid> {
        self.submit(SyncEvent::UserDeleted(EntityRef { id: id.to_string() }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{
        FailOutcome, Job, MemoryQueue, NewJob, QueueCounts, QueueError, QueueResult,
    };
    use async_trait::async_trait;

    /// A broker that is down.
    struct UnavailableQueue;

    #[async_trait]
    impl EventQueue for UnavailableQueue {
        async fn enqueue(&self, _job: NewJob) -> QueueResult<EnqueueOutcome> {
            Err(QueueError::Backend("connection refused".to_string()))
        }
        async fn reserve(&self, _wait: Duration) -> QueueResult<Option<Job>> {
            Err(QueueError::Backend("connection refused".to_string()))
        }
        async fn complete(&self, _job: &Job) -> QueueResult<()> {
            Ok(())
        }
        async fn fail(&self, _job: &Job, _error: &str) -> QueueResult<FailOutcome> {
            Ok(FailOutcome::Dead { attempts: 1 })
        }
        async fn recover_stalled(&self, _timeout: Duration) -> QueueResult<usize> {
            Ok(0)
        }
        async fn counts(&self) -> QueueResult<QueueCounts> {
            Ok(QueueCounts::default())
        }
        async fn failed(&self, _limit: usize) -> QueueResult<Vec<Job>> {
            Ok(Vec::new())
        }
        async fn retry_failed(&self, _job_id: &str) -> QueueResult<bool> {
            Ok(false)
        }
        async fn remove_failed(&self, _job_id: &str) -> QueueResult<bool> {
            Ok(false)
        }
    }

    /// A broker that never answers.
    struct HangingQueue;

    #[async_trait]
    impl EventQueue for HangingQueue {
        async fn enqueue(&self, _job: NewJob) -> QueueResult<EnqueueOutcome> {
            std::future::pending().await
        }
        async fn reserve(&self, _wait: Duration) -> QueueResult<Option<Job>> {
            std::future::pending().await
        }
        async fn complete(&self, _job: &Job) -> QueueResult<()> {
            Ok(())
        }
        async fn fail(&self, _job: &Job, _error: &str) -> QueueResult<FailOutcome> {
            Ok(FailOutcome::Dead { attempts: 1 })
        }
        async fn recover_stalled(&self, _timeout: Duration) -> QueueResult<usize> {
            Ok(0)
        }
        async fn counts(&self) -> QueueResult<QueueCounts> {
            Ok(QueueCounts::default())
        }
        async fn failed(&self, _limit: usize) -> QueueResult<Vec<Job>> {
            Ok(Vec::new())
        }
        async fn retry_failed(&self, _job_id: &str) -> QueueResult<bool> {
            Ok(false)
        }
        async fn remove_failed(&self, _job_id: &str) -> QueueResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_submit_enqueues_job_named_after_event_type() {
        let queue = Arc::new(MemoryQueue::default());
        let producer = GraphEventProducer::new(queue.clone());

        let event_id = producer.assign_auditor("P1", "U1").await.unwrap();

        let job = queue.reserve(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(job.id, event_id.to_string());
        assert_eq!(job.name, "assign_auditor");
    }

    #[tokio::test]
    async fn test_identical_submissions_get_distinct_ids() {
        let queue = Arc::new(MemoryQueue::default());
        let producer = GraphEventProducer::new(queue.clone());

        let a = producer.assign_auditor("P1", "U1").await.unwrap();
        let b = producer.assign_auditor("P1", "U1").await.unwrap();

        assert_ne!(a, b);
        assert_eq!(queue.counts().await.unwrap().waiting, 2);
    }

    #[tokio::test]
    async fn test_unavailable_queue_does_not_surface_error() {
        let producer = GraphEventProducer::new(Arc::new(UnavailableQueue));
        assert!(producer.link_evidence_to_control("E1", "C1").await.is_none());
    }

    #[tokio::test]
    async fn test_hanging_queue_is_bounded_by_timeout() {
        let producer = GraphEventProducer::new(Arc::new(HangingQueue))
            .with_timeout(Duration::from_millis(20));
        let started = std::time::Instant::now();
        assert!(producer.delete_standard("S1").await.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_dispatch_returns_immediately() {
        let producer = GraphEventProducer::new(Arc::new(HangingQueue));
        let started = std::time::Instant::now();
        producer.dispatch(SyncEvent::UserDeleted(EntityRef { id: "U1".to_string() }));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_dispatch_outside_runtime_is_dropped_quietly() {
        let producer = GraphEventProducer::new(Arc::new(MemoryQueue::default()));
        producer.dispatch(SyncEvent::UserDeleted(EntityRef { id: "U1".to_string() }));
    }
}
