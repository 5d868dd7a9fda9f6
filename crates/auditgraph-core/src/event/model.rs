//! Event types and their strictly-typed payloads.
//!
//! Field names are camelCase on the wire (`projectId`, `controlId1`, ...).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{CoreError, CoreResult};
use crate::model::{NodeLabel, PropertyValue};

/// Scalar properties that `update_node_property` may overwrite.
pub const UPDATABLE_PROPERTIES: &[&str] = &[
    "fileName",
    "code",
    "title",
    "name",
    "description",
    "category",
    "email",
    "role",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignAuditor {
    pub project_id: String,
    pub auditor_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignReviewer {
    pub project_id: String,
    pub reviewer_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignManager {
    pub user_id: String,
    pub manager_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkEvidenceToControl {
    pub evidence_id: String,
    pub control_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkEvidenceUploader {
    pub evidence_id: String,
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkEvidenceToProject {
    pub evidence_id: String,
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkEvidenceToTag {
    pub evidence_id: String,
    pub tag_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkControlToStandard {
    pub control_id: String,
    pub standard_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkControlToTag {
    pub control_id: String,
    pub tag_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSimilarControls {
    pub control_id1: String,
    pub control_id2: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkControlsViaTag {
    pub control_id1: String,
    pub control_id2: String,
    pub tag_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkEvidenceAcrossStandards {
    pub evidence_id1: String,
    pub evidence_id2: String,
    pub customer_id: String,
    pub standard_id: String,
}

fn default_request_status() -> String {
    "open".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAuditRequest {
    pub auditor_id: String,
    pub project_id: String,
    #[serde(default = "default_request_status")]
    pub status: String,
}

/// Issue summary carried on a `HAS_ISSUE` relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueDetails {
    pub id: String,
    pub title: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportIssue {
    pub customer_id: String,
    pub manager_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_details: Option<IssueDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkComplianceToCustomer {
    pub compliance_id: String,
    pub customer_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNodeProperty {
    pub label: NodeLabel,
    pub id: String,
    pub property: String,
    pub value: PropertyValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardCreated {
    pub id: String,
    pub name: String,
}

/// Payload of events that only carry an entity id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpsert {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlUpdated {
    pub id: String,
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub standard_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdated {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceUploaded {
    pub id: String,
    pub file_name: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub control_ids: Vec<String>,
    #[serde(default)]
    pub tag_ids: Vec<String>,
}

/// Every mutation the graph projection understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SyncEvent {
    AssignAuditor(AssignAuditor),
    AssignReviewer(AssignReviewer),
    AssignManager(AssignManager),
    LinkEvidenceToControl(LinkEvidenceToControl),
    LinkEvidenceUploader(LinkEvidenceUploader),
    LinkEvidenceToProject(LinkEvidenceToProject),
    LinkEvidenceToTag(LinkEvidenceToTag),
    LinkControlToStandard(LinkControlToStandard),
    LinkControlToTag(LinkControlToTag),
    LinkSimilarControls(LinkSimilarControls),
    LinkControlsViaTag(LinkControlsViaTag),
    LinkEvidenceAcrossStandards(LinkEvidenceAcrossStandards),
    CreateAuditRequest(CreateAuditRequest),
    ReportIssue(ReportIssue),
    LinkComplianceToCustomer(LinkComplianceToCustomer),
    UpdateNodeProperty(UpdateNodeProperty),
    StandardCreated(StandardCreated),
    StandardDeleted(EntityRef),
    UserCreated(UserUpsert),
    UserUpdated(UserUpsert),
    UserDeleted(EntityRef),
    ControlUpdated(ControlUpdated),
    ProjectUpdated(ProjectUpdated),
    EvidenceUploaded(EvidenceUploaded),
}

/// Discriminant of [`SyncEvent`], also the queue job name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    AssignAuditor,
    AssignReviewer,
    AssignManager,
    LinkEvidenceToControl,
    LinkEvidenceUploader,
    LinkEvidenceToProject,
    LinkEvidenceToTag,
    LinkControlToStandard,
    LinkControlToTag,
    LinkSimilarControls,
    LinkControlsViaTag,
    LinkEvidenceAcrossStandards,
    CreateAuditRequest,
    ReportIssue,
    LinkComplianceToCustomer,
    UpdateNodeProperty,
    StandardCreated,
    StandardDeleted,
    UserCreated,
    UserUpdated,
    UserDeleted,
    ControlUpdated,
    ProjectUpdated,
    EvidenceUploaded,
}

impl EventType {
    pub const ALL: [EventType; 24] = [
        EventType::AssignAuditor,
        EventType::AssignReviewer,
        EventType::AssignManager,
        EventType::LinkEvidenceToControl,
        EventType::LinkEvidenceUploader,
        EventType::LinkEvidenceToProject,
        EventType::LinkEvidenceToTag,
        EventType::LinkControlToStandard,
        EventType::LinkControlToTag,
        EventType::LinkSimilarControls,
        EventType::LinkControlsViaTag,
        EventType::LinkEvidenceAcrossStandards,
        EventType::CreateAuditRequest,
        EventType::ReportIssue,
        EventType::LinkComplianceToCustomer,
        EventType::UpdateNodeProperty,
        EventType::StandardCreated,
        EventType::StandardDeleted,
        EventType::UserCreated,
        EventType::UserUpdated,
        EventType::UserDeleted,
        EventType::ControlUpdated,
        EventType::ProjectUpdated,
        EventType::EvidenceUploaded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AssignAuditor => "assign_auditor",
            EventType::AssignReviewer => "assign_reviewer",
            EventType::AssignManager => "assign_manager",
            EventType::LinkEvidenceToControl => "link_evidence_to_control",
            EventType::LinkEvidenceUploader => "link_evidence_uploader",
            EventType::LinkEvidenceToProject => "link_evidence_to_project",
            EventType::LinkEvidenceToTag => "link_evidence_to_tag",
            EventType::LinkControlToStandard => "link_control_to_standard",
            EventType::LinkControlToTag => "link_control_to_tag",
            EventType::LinkSimilarControls => "link_similar_controls",
            EventType::LinkControlsViaTag => "link_controls_via_tag",
            EventType::LinkEvidenceAcrossStandards => "link_evidence_across_standards",
            EventType::CreateAuditRequest => "create_audit_request",
            EventType::ReportIssue => "report_issue",
            EventType::LinkComplianceToCustomer => "link_compliance_to_customer",
            EventType::UpdateNodeProperty => "update_node_property",
            EventType::StandardCreated => "standard_created",
            EventType::StandardDeleted => "standard_deleted",
            EventType::UserCreated => "user_created",
            EventType::UserUpdated => "user_updated",
            EventType::UserDeleted => "user_deleted",
            EventType::ControlUpdated => "control_updated",
            EventType::ProjectUpdated => "project_updated",
            EventType::EvidenceUploaded => "evidence_uploaded",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| CoreError::UnknownEventType(s.to_string()))
    }
}

impl SyncEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            SyncEvent::AssignAuditor(_) => EventType::AssignAuditor,
            SyncEvent::AssignReviewer(_) => EventType::AssignReviewer,
            SyncEvent::AssignManager(_) => EventType::AssignManager,
            SyncEvent::LinkEvidenceToControl(_) => EventType::LinkEvidenceToControl,
            SyncEvent::LinkEvidenceUploader(_) => EventType::LinkEvidenceUploader,
            SyncEvent::LinkEvidenceToProject(_) => EventType::LinkEvidenceToProject,
            SyncEvent::LinkEvidenceToTag(_) => EventType::LinkEvidenceToTag,
            SyncEvent::LinkControlToStandard(_) => EventType::LinkControlToStandard,
            SyncEvent::LinkControlToTag(_) => EventType::LinkControlToTag,
            SyncEvent::LinkSimilarControls(_) => EventType::LinkSimilarControls,
            SyncEvent::LinkControlsViaTag(_) => EventType::LinkControlsViaTag,
            SyncEvent::LinkEvidenceAcrossStandards(_) => EventType::LinkEvidenceAcrossStandards,
            SyncEvent::CreateAuditRequest(_) => EventType::CreateAuditRequest,
            SyncEvent::ReportIssue(_) => EventType::ReportIssue,
            SyncEvent::LinkComplianceToCustomer(_) => EventType::LinkComplianceToCustomer,
            SyncEvent::UpdateNodeProperty(_) => EventType::UpdateNodeProperty,
            SyncEvent::StandardCreated(_) => EventType::StandardCreated,
            SyncEvent::StandardDeleted(_) => EventType::StandardDeleted,
            SyncEvent::UserCreated(_) => EventType::UserCreated,
            SyncEvent::UserUpdated(_) => EventType::UserUpdated,
            SyncEvent::UserDeleted(_) => EventType::UserDeleted,
            SyncEvent::ControlUpdated(_) => EventType::ControlUpdated,
            SyncEvent::ProjectUpdated(_) => EventType::ProjectUpdated,
            SyncEvent::EvidenceUploaded(_) => EventType::EvidenceUploaded,
        }
    }

    /// Rebuild an event from a job name and its JSON payload.
    pub fn decode(name: &str, payload: Value) -> CoreResult<Self> {
        let event_type: EventType = name.parse()?;
        let tagged = json!({ "type": event_type.as_str(), "payload": payload });
        let event: SyncEvent = serde_json::from_value(tagged)
            .map_err(|source| CoreError::MalformedPayload { event_type, source })?;
        event.validate()?;
        Ok(event)
    }

    /// The payload half of the wire format.
    pub fn payload(&self) -> CoreResult<Value> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    /// Reject payloads that deserialize but cannot be applied.
    pub fn validate(&self) -> CoreResult<()> {
        if let SyncEvent::UpdateNodeProperty(update) = self {
            if !UPDATABLE_PROPERTIES.contains(&update.property.as_str()) {
                return Err(CoreError::validation(format!(
                    "Property '{}' cannot be updated on {}",
                    update.property, update.label
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names_round_trip() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
        }
        assert!("assign_owner".parse::<EventType>().is_err());
    }

    #[test]
    fn test_decode_assign_auditor_wire_shape() {
        let event = SyncEvent::decode(
            "assign_auditor",
            json!({ "projectId": "P1", "auditorId": "U1" }),
        )
        .unwrap();
        assert_eq!(
            event,
            SyncEvent::AssignAuditor(AssignAuditor {
                project_id: "P1".to_string(),
                auditor_id: "U1".to_string(),
            })
        );
        assert_eq!(event.event_type(), EventType::AssignAuditor);
    }

    #[test]
    fn test_payload_uses_camel_case_numbered_fields() {
        let event = SyncEvent::LinkSimilarControls(LinkSimilarControls {
            control_id1: "C1".to_string(),
            control_id2: "C2".to_string(),
        });
        assert_eq!(
            event.payload().unwrap(),
            json!({ "controlId1": "C1", "controlId2": "C2" })
        );
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        let err = SyncEvent::decode("link_evidence_to_control", json!({ "evidenceId": "E1" }))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::MalformedPayload { event_type: EventType::LinkEvidenceToControl, .. }
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = SyncEvent::decode("drop_database", json!({})).unwrap_err();
        assert!(matches!(err, CoreError::UnknownEventType(name) if name == "drop_database"));
    }

    #[test]
    fn test_audit_request_status_defaults_to_open() {
        let event = SyncEvent::decode(
            "create_audit_request",
            json!({ "auditorId": "U1", "projectId": "P1" }),
        )
        .unwrap();
        match event {
            SyncEvent::CreateAuditRequest(req) => assert_eq!(req.status, "open"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_update_node_property_rejects_unknown_key() {
        let err = SyncEvent::decode(
            "update_node_property",
            json!({ "label": "Evidence", "id": "E1", "property": "password", "value": "x" }),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));

        let ok = SyncEvent::decode(
            "update_node_property",
            json!({ "label": "Evidence", "id": "E1", "property": "fileName", "value": "a.pdf" }),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_standard_deleted_payload() {
        let event = SyncEvent::decode("standard_deleted", json!({ "id": "S1" })).unwrap();
        assert_eq!(event, SyncEvent::StandardDeleted(EntityRef { id: "S1".to_string() }));
    }
}
