//! Relational to graph synchronization.
//!
//! Live events flow producer → queue → [`worker::WorkerPool`] →
//! [`handlers::plan`]. The batch passes ([`backfill`], [`reconcile`]) read the
//! relational source directly and emit the same events through an
//! [`EventSink`](auditgraph_core::EventSink).

pub mod backfill;
pub mod handlers;
pub mod reconcile;
pub mod worker;

use tokio::sync::watch;

/// Batch jobs check this between tables, never mid-row.
pub(crate) fn cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    use auditgraph_core::source::{
        ControlRow, EvidenceRow, IssueRow, ProjectRow, StandardRow, TagRow, UserRow,
    };
    use auditgraph_core::{EventSink, SyncEvent};
    use auditgraph_db::Snapshot;

    fn s(v: &str) -> String {
        v.to_string()
    }

    fn user(id: &str, role: &str, manager: Option<&str>, customer: Option<&str>) -> UserRow {
        UserRow {
            id: s(id),
            name: format!("User {}", id),
            email: format!("{}@example.com", id.to_lowercase()),
            role: s(role),
            manager_id: manager.map(s),
            linked_customer_id: customer.map(s),
        }
    }

    /// A small but complete audit dataset.
    pub fn snapshot() -> Snapshot {
        Snapshot {
            users: vec![
                user("M1", "manager", None, None),
                user("U1", "auditor", Some("M1"), None),
                user("U2", "auditor", Some("M1"), None),
                user("K1", "customer", Some("M1"), None),
                user("K2", "customer", None, None),
                user("Q1", "compliance", None, Some("K1")),
                // Linked customer on a non-compliance user is not an oversight link.
                user("U3", "auditor", None, Some("K2")),
            ],
            projects: vec![
                ProjectRow {
                    id: s("P1"),
                    name: s("Acme ISO audit"),
                    customer_id: Some(s("K1")),
                    auditor_id: Some(s("U1")),
                    reviewer_id: Some(s("U2")),
                },
                ProjectRow {
                    id: s("P2"),
                    name: s("Globex SOC 2"),
                    customer_id: Some(s("K2")),
                    auditor_id: Some(s("U2")),
                    reviewer_id: None,
                },
            ],
            standards: vec![
                StandardRow { id: s("S1"), name: s("ISO 27001") },
                StandardRow { id: s("S2"), name: s("SOC 2") },
            ],
            controls: vec![
                ControlRow {
                    id: s("C1"),
                    code: s("A.9.1"),
                    title: s("Access control policy"),
                    description: Some(s("Documented access policy")),
                    category: Some(s("Access")),
                    standard_id: Some(s("S1")),
                    tag_ids: vec![s("T1")],
                    keywords: vec![s("iam"), s("access")],
                },
                ControlRow {
                    id: s("C2"),
                    code: s("CC6.1"),
                    title: s("Logical access"),
                    description: None,
                    category: None,
                    standard_id: Some(s("S2")),
                    tag_ids: vec![s("T1"), s("T2")],
                    keywords: vec![],
                },
            ],
            evidence: vec![
                EvidenceRow {
                    id: s("E1"),
                    file_name: s("policy.pdf"),
                    project_id: Some(s("P1")),
                    uploaded_by_id: Some(s("K1")),
                    control_ids: vec![s("C1")],
                    tag_ids: vec![s("T1")],
                },
                EvidenceRow {
                    id: s("E2"),
                    file_name: s("access-review.xlsx"),
                    project_id: Some(s("P2")),
                    uploaded_by_id: Some(s("U2")),
                    control_ids: vec![s("C1"), s("C2")],
                    tag_ids: vec![],
                },
                EvidenceRow {
                    id: s("E3"),
                    file_name: s("orphan.txt"),
                    project_id: None,
                    // Uploader row no longer exists.
                    uploaded_by_id: Some(s("GONE")),
                    control_ids: vec![],
                    tag_ids: vec![s("T2")],
                },
            ],
            tags: vec![
                TagRow { id: s("T1"), name: s("Policy") },
                TagRow { id: s("T2"), name: s("Access") },
            ],
            issues: vec![
                IssueRow {
                    id: s("I1"),
                    customer_id: s("K1"),
                    title: s("Late upload"),
                    status: s("open"),
                },
                IssueRow {
                    id: s("I2"),
                    customer_id: s("K1"),
                    title: s("Wrong format"),
                    status: s("resolved"),
                },
                IssueRow {
                    id: s("I3"),
                    customer_id: s("K2"),
                    title: s("No manager"),
                    status: s("open"),
                },
            ],
        }
    }

    /// Sink that records events instead of applying them.
    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<SyncEvent>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<SyncEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn emit(&self, event: SyncEvent) -> Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }
}
