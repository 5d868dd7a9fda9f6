//! Full backfill from the relational source.
//!
//! Walks every table in a fixed order and emits the events implied by the
//! current rows. Re-running is always safe: every event is an upsert.

use std::collections::HashMap;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, info};

use auditgraph_core::event::model::{
    AssignAuditor, AssignManager, AssignReviewer, ControlUpdated, EvidenceUploaded, IssueDetails,
    LinkComplianceToCustomer, LinkControlToStandard, LinkControlToTag, LinkEvidenceToControl,
    LinkEvidenceToProject, LinkEvidenceToTag, LinkEvidenceUploader, ProjectUpdated, ReportIssue,
    StandardCreated, UserUpsert,
};
use auditgraph_core::source::{RelationalSource, UserRow};
use auditgraph_core::{EventSink, SyncEvent};

use super::cancelled;

/// Role whose linked customer becomes an `OVERSEES` edge.
const COMPLIANCE_ROLE: &str = "compliance";

/// Rows read and events emitted for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub rows: usize,
    pub events: usize,
}

/// Result of a backfill run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub users: TableStats,
    pub standards: TableStats,
    pub projects: TableStats,
    pub controls: TableStats,
    pub evidence: TableStats,
    pub issues: TableStats,
    /// Free-text control keywords, which have no stable id to link.
    pub skipped_keywords: usize,
    /// Evidence whose uploader row does not exist.
    pub skipped_uploaders: usize,
    /// Issues whose customer has no manager.
    pub skipped_issues: usize,
    pub cancelled: bool,
}

impl BackfillReport {
    pub fn tables(&self) -> [(&'static str, TableStats); 6] {
        [
            ("users", self.users),
            ("standards", self.standards),
            ("projects", self.projects),
            ("controls", self.controls),
            ("evidence", self.evidence),
            ("issues", self.issues),
        ]
    }

    pub fn events(&self) -> usize {
        self.tables().iter().map(|(_, t)| t.events).sum()
    }
}

struct Emitter<'a> {
    sink: &'a dyn EventSink,
}

impl Emitter<'_> {
    async fn emit(&self, stats: &mut TableStats, event: SyncEvent) -> Result<()> {
        self.sink.emit(event).await?;
        stats.events += 1;
        Ok(())
    }
}

/// Emit the events for every row, table by table.
///
/// Cancellation is honoured between tables; a cancelled run returns the
/// partial report with `cancelled` set.
pub async fn run_backfill(
    source: &dyn RelationalSource,
    sink: &dyn EventSink,
    cancel: &watch::Receiver<bool>,
) -> Result<BackfillReport> {
    info!("Starting graph backfill");
    let out = Emitter { sink };
    let mut report = BackfillReport::default();

    if cancelled(cancel) {
        report.cancelled = true;
        return Ok(report);
    }
    let users = source.users().await.context("Failed to read users")?;
    backfill_users(&out, &users, &mut report)
        .await
        .context("Failed to backfill users")?;
    info!(rows = report.users.rows, events = report.users.events, "Users synced");

    if cancelled(cancel) {
        report.cancelled = true;
        return Ok(report);
    }
    let standards = source.standards().await.context("Failed to read standards")?;
    for standard in &standards {
        report.standards.rows += 1;
        out.emit(
            &mut report.standards,
            SyncEvent::StandardCreated(StandardCreated {
                id: standard.id.clone(),
                name: standard.name.clone(),
            }),
        )
        .await
        .context("Failed to backfill standards")?;
    }
    info!(rows = report.standards.rows, events = report.standards.events, "Standards synced");

    if cancelled(cancel) {
        report.cancelled = true;
        return Ok(report);
    }
    let projects = source.projects().await.context("Failed to read projects")?;
    for project in &projects {
        report.projects.rows += 1;
        let stats = &mut report.projects;
        out.emit(
            stats,
            SyncEvent::ProjectUpdated(ProjectUpdated {
                id: project.id.clone(),
                name: project.name.clone(),
                customer_id: project.customer_id.clone(),
            }),
        )
        .await?;
        if let Some(auditor_id) = &project.auditor_id {
            out.emit(
                stats,
                SyncEvent::AssignAuditor(AssignAuditor {
                    project_id: project.id.clone(),
                    auditor_id: auditor_id.clone(),
                }),
            )
            .await?;
        }
        if let Some(reviewer_id) = &project.reviewer_id {
            out.emit(
                stats,
                SyncEvent::AssignReviewer(AssignReviewer {
                    project_id: project.id.clone(),
                    reviewer_id: reviewer_id.clone(),
                }),
            )
            .await?;
        }
    }
    info!(rows = report.projects.rows, events = report.projects.events, "Projects synced");

    if cancelled(cancel) {
        report.cancelled = true;
        return Ok(report);
    }
    let controls = source.controls().await.context("Failed to read controls")?;
    for control in &controls {
        report.controls.rows += 1;
        report.skipped_keywords += control.keywords.len();
        let stats = &mut report.controls;
        out.emit(
            stats,
            SyncEvent::ControlUpdated(ControlUpdated {
                id: control.id.clone(),
                code: control.code.clone(),
                title: control.title.clone(),
                description: control.description.clone(),
                category: control.category.clone(),
                standard_id: None,
            }),
        )
        .await?;
        if let Some(standard_id) = &control.standard_id {
            out.emit(
                stats,
                SyncEvent::LinkControlToStandard(LinkControlToStandard {
                    control_id: control.id.clone(),
                    standard_id: standard_id.clone(),
                }),
            )
            .await?;
        }
        for tag_id in &control.tag_ids {
            out.emit(
                stats,
                SyncEvent::LinkControlToTag(LinkControlToTag {
                    control_id: control.id.clone(),
                    tag_id: tag_id.clone(),
                }),
            )
            .await?;
        }
    }
    if report.skipped_keywords > 0 {
        debug!(keywords = report.skipped_keywords, "Skipped free-text control keywords");
    }
    info!(rows = report.controls.rows, events = report.controls.events, "Controls synced");

    let users_by_id: HashMap<&str, &UserRow> = users.iter().map(|u| (u.id.as_str(), u)).collect();

    if cancelled(cancel) {
        report.cancelled = true;
        return Ok(report);
    }
    let evidence = source.evidence().await.context("Failed to read evidence")?;
    for item in &evidence {
        report.evidence.rows += 1;
        let stats = &mut report.evidence;
        out.emit(
            stats,
            SyncEvent::EvidenceUploaded(EvidenceUploaded {
                id: item.id.clone(),
                file_name: item.file_name.clone(),
                project_id: None,
                control_ids: Vec::new(),
                tag_ids: Vec::new(),
            }),
        )
        .await?;
        if let Some(uploader_id) = &item.uploaded_by_id {
            match users_by_id.get(uploader_id.as_str()) {
                Some(uploader) => {
                    out.emit(
                        stats,
                        SyncEvent::LinkEvidenceUploader(LinkEvidenceUploader {
                            evidence_id: item.id.clone(),
                            user_id: uploader.id.clone(),
                            role: uploader.role.clone(),
                        }),
                    )
                    .await?;
                }
                None => {
                    debug!(evidence_id = %item.id, uploader_id = %uploader_id, "Uploader row missing");
                    report.skipped_uploaders += 1;
                }
            }
        }
        let stats = &mut report.evidence;
        if let Some(project_id) = &item.project_id {
            out.emit(
                stats,
                SyncEvent::LinkEvidenceToProject(LinkEvidenceToProject {
                    evidence_id: item.id.clone(),
                    project_id: project_id.clone(),
                }),
            )
            .await?;
        }
        for control_id in &item.control_ids {
            out.emit(
                stats,
                SyncEvent::LinkEvidenceToControl(LinkEvidenceToControl {
                    evidence_id: item.id.clone(),
                    control_id: control_id.clone(),
                }),
            )
            .await?;
        }
        for tag_id in &item.tag_ids {
            out.emit(
                stats,
                SyncEvent::LinkEvidenceToTag(LinkEvidenceToTag {
                    evidence_id: item.id.clone(),
                    tag_id: tag_id.clone(),
                }),
            )
            .await?;
        }
    }
    info!(rows = report.evidence.rows, events = report.evidence.events, "Evidence synced");

    if cancelled(cancel) {
        report.cancelled = true;
        return Ok(report);
    }
    let issues = source.issues().await.context("Failed to read issues")?;
    for issue in &issues {
        report.issues.rows += 1;
        let manager_id = users_by_id
            .get(issue.customer_id.as_str())
            .and_then(|customer| customer.manager_id.clone());
        let Some(manager_id) = manager_id else {
            report.skipped_issues += 1;
            continue;
        };
        out.emit(
            &mut report.issues,
            SyncEvent::ReportIssue(ReportIssue {
                customer_id: issue.customer_id.clone(),
                manager_id,
                issue_details: Some(IssueDetails {
                    id: issue.id.clone(),
                    title: issue.title.clone(),
                    status: issue.status.clone(),
                }),
            }),
        )
        .await?;
    }
    info!(rows = report.issues.rows, events = report.issues.events, "Issues synced");

    info!(
        events = report.events(),
        skipped_keywords = report.skipped_keywords,
        skipped_uploaders = report.skipped_uploaders,
        skipped_issues = report.skipped_issues,
        "Graph backfill complete"
    );
    Ok(report)
}

async fn backfill_users(out: &Emitter<'_>, users: &[UserRow], report: &mut BackfillReport) -> Result<()> {
    let stats = &mut report.users;
    for user in users {
        stats.rows += 1;
        out.emit(
            stats,
            SyncEvent::UserCreated(UserUpsert {
                id: user.id.clone(),
                name: user.name.clone(),
                email: user.email.clone(),
                role: Some(user.role.clone()),
            }),
        )
        .await?;
        if let Some(manager_id) = &user.manager_id {
            out.emit(
                stats,
                SyncEvent::AssignManager(AssignManager {
                    user_id: user.id.clone(),
                    manager_id: manager_id.clone(),
                }),
            )
            .await?;
        }
        if user.role == COMPLIANCE_ROLE {
            if let Some(customer_id) = &user.linked_customer_id {
                out.emit(
                    stats,
                    SyncEvent::LinkComplianceToCustomer(LinkComplianceToCustomer {
                        compliance_id: user.id.clone(),
                        customer_id: customer_id.clone(),
                    }),
                )
                .await?;
            }
        }
    }
    Ok(())
}
