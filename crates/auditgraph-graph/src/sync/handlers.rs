//! Event handlers.
//!
//! Creates nodes and relationships:
//! - (:User)-[:AUDITED_BY]->(:Project), (:User)-[:REVIEWS]->(:Project)
//! - (:User)-[:MANAGED_BY]->(:User), (:User)-[:OVERSEES]->(:User)
//! - (:Project)-[:OWNED_BY]->(:User)
//! - (:User)-[:UPLOADED {role}]->(:Evidence)
//! - (:Evidence)-[:BELONGS_TO]->(:Project), (:Control)-[:BELONGS_TO]->(:Standard)
//! - (:Evidence)-[:PROVES]->(:Control)
//! - (:Evidence|Control)-[:HAS_TAG]->(:Tag)
//! - (:Control)-[:SIMILAR_TO]->(:Control), (:Control)-[:RELATED_VIA {tagId}]->(:Control)
//! - (:Evidence)-[:RELATES_TO {standardId, customerId}]->(:Evidence)
//! - (:User)-[:REQUESTED {status}]->(:Project)
//! - (:User)-[:HAS_ISSUE {issueId, details}]->(:User)
//!
//! Each handler states the full current truth for its slice, so replaying
//! or reordering events converges on the same graph.

use auditgraph_core::event::model::{ControlUpdated, EvidenceUploaded, UserUpsert};
use auditgraph_core::model::{props, NodeLabel, Properties, PropertyValue, RelType};
use auditgraph_core::SyncEvent;

use crate::ops::{Cardinality, GraphOp, NodeRef};

fn user(id: &str) -> NodeRef {
    NodeRef::new(NodeLabel::User, id)
}

fn project(id: &str) -> NodeRef {
    NodeRef::new(NodeLabel::Project, id)
}

fn standard(id: &str) -> NodeRef {
    NodeRef::new(NodeLabel::Standard, id)
}

fn control(id: &str) -> NodeRef {
    NodeRef::new(NodeLabel::Control, id)
}

fn evidence(id: &str) -> NodeRef {
    NodeRef::new(NodeLabel::Evidence, id)
}

fn tag(id: &str) -> NodeRef {
    NodeRef::new(NodeLabel::Tag, id)
}

fn user_props(u: &UserUpsert) -> Properties {
    props([
        ("name", (&u.name).into()),
        ("email", (&u.email).into()),
        ("role", u.role.clone().into()),
    ])
}

fn control_ops(c: &ControlUpdated) -> Vec<GraphOp> {
    let mut ops = vec![GraphOp::merge_node(
        NodeLabel::Control,
        &c.id,
        props([
            ("code", (&c.code).into()),
            ("title", (&c.title).into()),
            ("description", c.description.clone().into()),
            ("category", c.category.clone().into()),
        ]),
    )];
    if let Some(standard_id) = &c.standard_id {
        ops.push(control_to_standard(&c.id, standard_id));
    }
    ops
}

fn evidence_ops(e: &EvidenceUploaded) -> Vec<GraphOp> {
    let mut ops = vec![GraphOp::merge_node(
        NodeLabel::Evidence,
        &e.id,
        props([("fileName", (&e.file_name).into())]),
    )];
    if let Some(project_id) = &e.project_id {
        ops.push(evidence_to_project(&e.id, project_id));
    }
    ops.extend(
        e.control_ids
            .iter()
            .map(|c| GraphOp::link(evidence(&e.id), RelType::Proves, control(c))),
    );
    ops.extend(
        e.tag_ids
            .iter()
            .map(|t| GraphOp::link(evidence(&e.id), RelType::HasTag, tag(t))),
    );
    ops
}

fn control_to_standard(control_id: &str, standard_id: &str) -> GraphOp {
    GraphOp::link(control(control_id), RelType::BelongsTo, standard(standard_id))
        .with_cardinality(Cardinality::OnePerSource)
}

fn evidence_to_project(evidence_id: &str, project_id: &str) -> GraphOp {
    GraphOp::link(evidence(evidence_id), RelType::BelongsTo, project(project_id))
        .with_cardinality(Cardinality::OnePerSource)
}

/// The graph mutation implied by `event`, as one transactional batch.
pub fn plan(event: &SyncEvent) -> Vec<GraphOp> {
    match event {
        SyncEvent::AssignAuditor(e) => vec![
            GraphOp::link(user(&e.auditor_id), RelType::AuditedBy, project(&e.project_id))
                .with_cardinality(Cardinality::OnePerTarget),
        ],
        SyncEvent::AssignReviewer(e) => vec![
            GraphOp::link(user(&e.reviewer_id), RelType::Reviews, project(&e.project_id))
                .with_cardinality(Cardinality::OnePerTarget),
        ],
        SyncEvent::AssignManager(e) => vec![
            GraphOp::link(user(&e.user_id), RelType::ManagedBy, user(&e.manager_id))
                .with_cardinality(Cardinality::OnePerSource),
        ],
        SyncEvent::LinkEvidenceToControl(e) => vec![GraphOp::link(
            evidence(&e.evidence_id),
            RelType::Proves,
            control(&e.control_id),
        )],
        SyncEvent::LinkEvidenceUploader(e) => vec![
            GraphOp::link(user(&e.user_id), RelType::Uploaded, evidence(&e.evidence_id))
                .with_props(props([("role", (&e.role).into())]))
                .with_cardinality(Cardinality::OnePerTarget),
        ],
        SyncEvent::LinkEvidenceToProject(e) => {
            vec![evidence_to_project(&e.evidence_id, &e.project_id)]
        }
        SyncEvent::LinkEvidenceToTag(e) => vec![GraphOp::link(
            evidence(&e.evidence_id),
            RelType::HasTag,
            tag(&e.tag_id),
        )],
        SyncEvent::LinkControlToStandard(e) => {
            vec![control_to_standard(&e.control_id, &e.standard_id)]
        }
        SyncEvent::LinkControlToTag(e) => vec![GraphOp::link(
            control(&e.control_id),
            RelType::HasTag,
            tag(&e.tag_id),
        )],
        SyncEvent::LinkSimilarControls(e) => vec![GraphOp::link(
            control(&e.control_id1),
            RelType::SimilarTo,
            control(&e.control_id2),
        )],
        SyncEvent::LinkControlsViaTag(e) => vec![GraphOp::link(
            control(&e.control_id1),
            RelType::RelatedVia,
            control(&e.control_id2),
        )
        .with_key(props([("tagId", (&e.tag_id).into())]))],
        SyncEvent::LinkEvidenceAcrossStandards(e) => vec![GraphOp::link(
            evidence(&e.evidence_id1),
            RelType::RelatesTo,
            evidence(&e.evidence_id2),
        )
        .with_key(props([("standardId", (&e.standard_id).into())]))
        .with_props(props([("customerId", (&e.customer_id).into())]))],
        SyncEvent::CreateAuditRequest(e) => vec![GraphOp::link(
            user(&e.auditor_id),
            RelType::Requested,
            project(&e.project_id),
        )
        .with_props(props([("status", (&e.status).into())]))],
        SyncEvent::ReportIssue(e) => {
            let mut op = GraphOp::link(user(&e.customer_id), RelType::HasIssue, user(&e.manager_id));
            if let Some(details) = &e.issue_details {
                // Details are a nested object; graph properties are scalar.
                let json = serde_json::to_string(details).map(PropertyValue::from).ok();
                op = op
                    .with_key(props([("issueId", (&details.id).into())]))
                    .with_props(props([("details", json.into())]));
            }
            vec![op]
        }
        SyncEvent::LinkComplianceToCustomer(e) => vec![
            GraphOp::link(user(&e.compliance_id), RelType::Oversees, user(&e.customer_id))
                .with_cardinality(Cardinality::OnePerSource),
        ],
        SyncEvent::UpdateNodeProperty(e) => vec![GraphOp::set_property(
            e.label,
            &e.id,
            &e.property,
            e.value.clone(),
        )],
        SyncEvent::StandardCreated(e) => vec![GraphOp::merge_node(
            NodeLabel::Standard,
            &e.id,
            props([("name", (&e.name).into())]),
        )],
        SyncEvent::StandardDeleted(e) => vec![
            GraphOp::DetachDeleteDependents {
                dependent: NodeLabel::Control,
                rel: RelType::BelongsTo,
                owner: standard(&e.id),
            },
            GraphOp::detach_delete(NodeLabel::Standard, &e.id),
        ],
        SyncEvent::UserCreated(u) | SyncEvent::UserUpdated(u) => {
            vec![GraphOp::merge_node(NodeLabel::User, &u.id, user_props(u))]
        }
        SyncEvent::UserDeleted(e) => vec![GraphOp::detach_delete(NodeLabel::User, &e.id)],
        SyncEvent::ControlUpdated(c) => control_ops(c),
        SyncEvent::ProjectUpdated(p) => {
            let mut ops = vec![GraphOp::merge_node(
                NodeLabel::Project,
                &p.id,
                props([("name", (&p.name).into())]),
            )];
            if let Some(customer_id) = &p.customer_id {
                ops.push(
                    GraphOp::link(project(&p.id), RelType::OwnedBy, user(customer_id))
                        .with_cardinality(Cardinality::OnePerSource),
                );
            }
            ops
        }
        SyncEvent::EvidenceUploaded(e) => evidence_ops(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditgraph_core::event::model::*;
    use auditgraph_core::EventType;
    use serde_json::json;

    use crate::memory::MemoryGraph;
    use crate::store::GraphStore;

    fn s(v: &str) -> String {
        v.to_string()
    }

    /// One representative event per type.
    fn sample_events() -> Vec<SyncEvent> {
        vec![
            SyncEvent::AssignAuditor(AssignAuditor { project_id: s("P1"), auditor_id: s("U1") }),
            SyncEvent::AssignReviewer(AssignReviewer { project_id: s("P1"), reviewer_id: s("U2") }),
            SyncEvent::AssignManager(AssignManager { user_id: s("U1"), manager_id: s("M1") }),
            SyncEvent::LinkEvidenceToControl(LinkEvidenceToControl { evidence_id: s("E1"), control_id: s("C1") }),
            SyncEvent::LinkEvidenceUploader(LinkEvidenceUploader {
                evidence_id: s("E1"),
                user_id: s("U1"),
                role: s("auditor"),
            }),
            SyncEvent::LinkEvidenceToProject(LinkEvidenceToProject { evidence_id: s("E1"), project_id: s("P1") }),
            SyncEvent::LinkEvidenceToTag(LinkEvidenceToTag { evidence_id: s("E1"), tag_id: s("T1") }),
            SyncEvent::LinkControlToStandard(LinkControlToStandard { control_id: s("C1"), standard_id: s("S1") }),
            SyncEvent::LinkControlToTag(LinkControlToTag { control_id: s("C1"), tag_id: s("T1") }),
            SyncEvent::LinkSimilarControls(LinkSimilarControls { control_id1: s("C1"), control_id2: s("C2") }),
            SyncEvent::LinkControlsViaTag(LinkControlsViaTag {
                control_id1: s("C1"),
                control_id2: s("C2"),
                tag_id: s("T1"),
            }),
            SyncEvent::LinkEvidenceAcrossStandards(LinkEvidenceAcrossStandards {
                evidence_id1: s("E1"),
                evidence_id2: s("E2"),
                customer_id: s("K1"),
                standard_id: s("S1"),
            }),
            SyncEvent::CreateAuditRequest(CreateAuditRequest {
                auditor_id: s("U1"),
                project_id: s("P1"),
                status: s("open"),
            }),
            SyncEvent::ReportIssue(ReportIssue {
                customer_id: s("K1"),
                manager_id: s("M1"),
                issue_details: Some(IssueDetails { id: s("I1"), title: s("Late"), status: s("open") }),
            }),
            SyncEvent::LinkComplianceToCustomer(LinkComplianceToCustomer {
                compliance_id: s("Q1"),
                customer_id: s("K1"),
            }),
            SyncEvent::UpdateNodeProperty(UpdateNodeProperty {
                label: NodeLabel::Evidence,
                id: s("E1"),
                property: s("fileName"),
                value: "policy-v2.pdf".into(),
            }),
            SyncEvent::StandardCreated(StandardCreated { id: s("S1"), name: s("ISO 27001") }),
            SyncEvent::StandardDeleted(EntityRef { id: s("S9") }),
            SyncEvent::UserCreated(UserUpsert {
                id: s("U1"),
                name: s("Ana"),
                email: s("ana@example.com"),
                role: Some(s("auditor")),
            }),
            SyncEvent::UserUpdated(UserUpsert {
                id: s("U2"),
                name: s("Bo"),
                email: s("bo@example.com"),
                role: None,
            }),
            SyncEvent::UserDeleted(EntityRef { id: s("U9") }),
            SyncEvent::ControlUpdated(ControlUpdated {
                id: s("C1"),
                code: s("A.9.1"),
                title: s("Access policy"),
                description: None,
                category: Some(s("Access")),
                standard_id: Some(s("S1")),
            }),
            SyncEvent::ProjectUpdated(ProjectUpdated {
                id: s("P1"),
                name: s("Acme"),
                customer_id: Some(s("K1")),
            }),
            SyncEvent::EvidenceUploaded(EvidenceUploaded {
                id: s("E1"),
                file_name: s("policy.pdf"),
                project_id: Some(s("P1")),
                control_ids: vec![s("C1")],
                tag_ids: vec![s("T1")],
            }),
        ]
    }

    #[test]
    fn test_samples_cover_every_event_type() {
        let covered: Vec<EventType> = sample_events().iter().map(SyncEvent::event_type).collect();
        for t in EventType::ALL {
            assert!(covered.contains(&t), "no sample for {}", t);
        }
    }

    #[tokio::test]
    async fn test_every_handler_is_idempotent() {
        for event in sample_events() {
            let once = MemoryGraph::new();
            once.apply(&plan(&event)).await.unwrap();

            let thrice = MemoryGraph::new();
            for _ in 0..3 {
                thrice.apply(&plan(&event)).await.unwrap();
            }
            assert_eq!(once.snapshot(), thrice.snapshot(), "{} is not idempotent", event.event_type());
        }
    }

    #[tokio::test]
    async fn test_assign_auditor_twice_yields_one_edge() {
        let graph = MemoryGraph::new();
        let event = SyncEvent::decode("assign_auditor", json!({ "projectId": "P1", "auditorId": "U1" })).unwrap();
        graph.apply(&plan(&event)).await.unwrap();
        graph.apply(&plan(&event)).await.unwrap();

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.edges_between(&user("U1"), RelType::AuditedBy, &project("P1")).len(), 1);
        assert_eq!(snapshot.relationships.len(), 1);
    }

    #[tokio::test]
    async fn test_reviewer_reassignment_replaces_edge() {
        let graph = MemoryGraph::new();
        for reviewer in ["U1", "U2"] {
            let event = SyncEvent::AssignReviewer(AssignReviewer {
                project_id: s("P1"),
                reviewer_id: s(reviewer),
            });
            graph.apply(&plan(&event)).await.unwrap();
        }
        let snapshot = graph.snapshot();
        assert_eq!(snapshot.edges_of(&project("P1"), RelType::Reviews).len(), 1);
        assert_eq!(snapshot.edges_between(&user("U2"), RelType::Reviews, &project("P1")).len(), 1);
    }

    #[tokio::test]
    async fn test_uploader_role_is_overwritten() {
        let graph = MemoryGraph::new();
        for role in ["auditor", "customer"] {
            let event = SyncEvent::LinkEvidenceUploader(LinkEvidenceUploader {
                evidence_id: s("E1"),
                user_id: s("U1"),
                role: s(role),
            });
            graph.apply(&plan(&event)).await.unwrap();
        }
        let snapshot = graph.snapshot();
        let edges = snapshot.edges_between(&user("U1"), RelType::Uploaded, &evidence("E1"));
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].get("role"), Some(&PropertyValue::from("customer")));
    }

    #[tokio::test]
    async fn test_standard_deleted_cascades_to_its_controls() {
        let graph = MemoryGraph::new();
        let setup = [
            SyncEvent::LinkControlToStandard(LinkControlToStandard { control_id: s("C1"), standard_id: s("S1") }),
            SyncEvent::LinkControlToStandard(LinkControlToStandard { control_id: s("C2"), standard_id: s("S2") }),
            SyncEvent::LinkEvidenceToControl(LinkEvidenceToControl { evidence_id: s("E1"), control_id: s("C1") }),
        ];
        for event in &setup {
            graph.apply(&plan(event)).await.unwrap();
        }
        graph
            .apply(&plan(&SyncEvent::StandardDeleted(EntityRef { id: s("S1") })))
            .await
            .unwrap();

        let snapshot = graph.snapshot();
        assert!(snapshot.node(NodeLabel::Standard, "S1").is_none());
        assert!(snapshot.node(NodeLabel::Control, "C1").is_none());
        assert!(snapshot.node(NodeLabel::Control, "C2").is_some());
        assert!(snapshot.node(NodeLabel::Evidence, "E1").is_some());
        assert!(snapshot.dangling_relationships().is_empty());
        assert_eq!(snapshot.relationships.len(), 1);
    }

    #[tokio::test]
    async fn test_issues_for_same_pair_are_kept_apart() {
        let graph = MemoryGraph::new();
        for id in ["I1", "I2"] {
            let event = SyncEvent::ReportIssue(ReportIssue {
                customer_id: s("K1"),
                manager_id: s("M1"),
                issue_details: Some(IssueDetails { id: s(id), title: s("t"), status: s("open") }),
            });
            graph.apply(&plan(&event)).await.unwrap();
        }
        let snapshot = graph.snapshot();
        let edges = snapshot.edges_between(&user("K1"), RelType::HasIssue, &user("M1"));
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|e| e.get("details").and_then(PropertyValue::as_str).is_some()));
    }

    #[tokio::test]
    async fn test_update_node_property_upserts() {
        let graph = MemoryGraph::new();
        let event = SyncEvent::decode(
            "update_node_property",
            json!({ "label": "Tag", "id": "T1", "property": "name", "value": "Policy" }),
        )
        .unwrap();
        graph.apply(&plan(&event)).await.unwrap();
        let snapshot = graph.snapshot();
        assert_eq!(
            snapshot.node(NodeLabel::Tag, "T1").and_then(|n| n.get("name")),
            Some(&PropertyValue::from("Policy"))
        );
    }
}
