//! Reconciliation: re-hydrate from the relational source, then prune.
//!
//! Hydration re-emits link and property events for the rows most likely to
//! drift (evidence, controls, tags, projects). Pruning detach-deletes every
//! node whose id has no live row. No state is kept between runs.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use auditgraph_core::event::model::{
    ControlUpdated, LinkControlToStandard, LinkControlToTag, LinkEvidenceToControl,
    LinkEvidenceToProject, LinkEvidenceToTag, LinkEvidenceUploader, UpdateNodeProperty,
};
use auditgraph_core::source::{ControlRow, RelationalSource};
use auditgraph_core::{EventSink, NodeLabel, SyncEvent};

use super::cancelled;
use crate::store::GraphStore;

/// Deletion order: leaves first so that edge removal stays local.
const PRUNE_ORDER: [NodeLabel; 6] = [
    NodeLabel::Evidence,
    NodeLabel::Control,
    NodeLabel::Standard,
    NodeLabel::Project,
    NodeLabel::User,
    NodeLabel::Tag,
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    /// Report stale ids without deleting; hydration is skipped too.
    pub dry_run: bool,
}

/// Events emitted per hydrated table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrateStats {
    pub evidence: usize,
    pub controls: usize,
    pub tags: usize,
    pub projects: usize,
    pub skipped_uploaders: usize,
}

impl HydrateStats {
    pub fn events(&self) -> usize {
        self.evidence + self.controls + self.tags + self.projects
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub hydrated: HydrateStats,
    /// Stale ids per label; deleted unless `dry_run`.
    pub pruned: BTreeMap<NodeLabel, Vec<String>>,
    pub dry_run: bool,
    pub cancelled: bool,
}

impl ReconcileReport {
    pub fn pruned_total(&self) -> usize {
        self.pruned.values().map(Vec::len).sum()
    }
}

/// Run one reconciliation pass.
///
/// Hydration goes through `sink`; pruning writes to `graph` directly.
pub async fn run_reconcile(
    source: &dyn RelationalSource,
    graph: &dyn GraphStore,
    sink: &dyn EventSink,
    options: ReconcileOptions,
    cancel: &watch::Receiver<bool>,
) -> Result<ReconcileReport> {
    info!(dry_run = options.dry_run, "Starting reconciliation");
    let mut report = ReconcileReport {
        dry_run: options.dry_run,
        ..Default::default()
    };

    if !options.dry_run {
        if cancelled(cancel) {
            report.cancelled = true;
            return Ok(report);
        }
        hydrate(source, sink, &mut report.hydrated)
            .await
            .context("Failed to hydrate graph")?;
        info!(
            evidence = report.hydrated.evidence,
            controls = report.hydrated.controls,
            tags = report.hydrated.tags,
            projects = report.hydrated.projects,
            "Hydration complete"
        );
    }

    for label in PRUNE_ORDER {
        if cancelled(cancel) {
            report.cancelled = true;
            return Ok(report);
        }
        let stale = prune_label(source, graph, label, options.dry_run)
            .await
            .with_context(|| format!("Failed to prune {} nodes", label))?;
        if !stale.is_empty() {
            report.pruned.insert(label, stale);
        }
    }

    info!(
        pruned = report.pruned_total(),
        dry_run = options.dry_run,
        "Reconciliation complete"
    );
    Ok(report)
}

async fn prune_label(
    source: &dyn RelationalSource,
    graph: &dyn GraphStore,
    label: NodeLabel,
    dry_run: bool,
) -> Result<Vec<String>> {
    // Snapshot taken right before the query to keep the race with concurrent creates short.
    let valid = source.valid_ids(label).await?;
    let stale = graph.query_ids_not_in(label, &valid).await?;
    for id in &stale {
        if dry_run {
            info!(label = %label, id = %id, "[DRY RUN] Stale node");
            continue;
        }
        warn!(label = %label, id = %id, "Deleting stale node");
        graph.detach_delete_node(label, id).await?;
    }
    Ok(stale)
}

async fn hydrate(
    source: &dyn RelationalSource,
    sink: &dyn EventSink,
    stats: &mut HydrateStats,
) -> Result<()> {
    let users = source.users().await?;
    let roles: HashMap<&str, &str> = users
        .iter()
        .map(|u| (u.id.as_str(), u.role.as_str()))
        .collect();
    let controls = source.controls().await?;
    let controls_by_id: HashMap<&str, &ControlRow> =
        controls.iter().map(|c| (c.id.as_str(), c)).collect();

    for item in source.evidence().await? {
        let mut events = vec![SyncEvent::UpdateNodeProperty(UpdateNodeProperty {
            label: NodeLabel::Evidence,
            id: item.id.clone(),
            property: "fileName".to_string(),
            value: item.file_name.clone().into(),
        })];
        if let Some(uploader_id) = &item.uploaded_by_id {
            match roles.get(uploader_id.as_str()) {
                Some(role) => events.push(SyncEvent::LinkEvidenceUploader(LinkEvidenceUploader {
                    evidence_id: item.id.clone(),
                    user_id: uploader_id.clone(),
                    role: role.to_string(),
                })),
                None => stats.skipped_uploaders += 1,
            }
        }
        if let Some(project_id) = &item.project_id {
            events.push(SyncEvent::LinkEvidenceToProject(LinkEvidenceToProject {
                evidence_id: item.id.clone(),
                project_id: project_id.clone(),
            }));
        }
        for control_id in &item.control_ids {
            events.push(SyncEvent::LinkEvidenceToControl(LinkEvidenceToControl {
                evidence_id: item.id.clone(),
                control_id: control_id.clone(),
            }));
            let standard_id = controls_by_id
                .get(control_id.as_str())
                .and_then(|c| c.standard_id.clone());
            if let Some(standard_id) = standard_id {
                events.push(SyncEvent::LinkControlToStandard(LinkControlToStandard {
                    control_id: control_id.clone(),
                    standard_id,
                }));
            }
        }
        for tag_id in &item.tag_ids {
            events.push(SyncEvent::LinkEvidenceToTag(LinkEvidenceToTag {
                evidence_id: item.id.clone(),
                tag_id: tag_id.clone(),
            }));
        }
        stats.evidence += emit_all(sink, events).await?;
    }

    for control in &controls {
        let mut events = vec![SyncEvent::ControlUpdated(ControlUpdated {
            id: control.id.clone(),
            code: control.code.clone(),
            title: control.title.clone(),
            description: control.description.clone(),
            category: control.category.clone(),
            standard_id: control.standard_id.clone(),
        })];
        for tag_id in &control.tag_ids {
            events.push(SyncEvent::LinkControlToTag(LinkControlToTag {
                control_id: control.id.clone(),
                tag_id: tag_id.clone(),
            }));
        }
        stats.controls += emit_all(sink, events).await?;
    }

    for tag in source.tags().await? {
        stats.tags += emit_all(sink, vec![name_update(NodeLabel::Tag, tag.id, tag.name)]).await?;
    }

    for project in source.projects().await? {
        stats.projects +=
            emit_all(sink, vec![name_update(NodeLabel::Project, project.id, project.name)]).await?;
    }

    Ok(())
}

fn name_update(label: NodeLabel, id: String, name: String) -> SyncEvent {
    SyncEvent::UpdateNodeProperty(UpdateNodeProperty {
        label,
        id,
        property: "name".to_string(),
        value: name.into(),
    })
}

async fn emit_all(sink: &dyn EventSink, events: Vec<SyncEvent>) -> Result<usize> {
    let count = events.len();
    for event in events {
        sink.emit(event).await?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use auditgraph_core::model::{PropertyValue, RelType};
    use auditgraph_db::SnapshotSource;

    use crate::memory::MemoryGraph;
    use crate::ops::NodeRef;
    use crate::sync::backfill::run_backfill;
    use crate::sync::fixtures::{snapshot, RecordingSink};
    use crate::sync::worker::SyncWorker;

    fn not_cancelled() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        rx
    }

    async fn seeded() -> (SnapshotSource, Arc<MemoryGraph>, SyncWorker) {
        let source = SnapshotSource::new(snapshot());
        let graph = Arc::new(MemoryGraph::new());
        let worker = SyncWorker::new(graph.clone());
        run_backfill(&source, &worker, &not_cancelled()).await.unwrap();
        (source, graph, worker)
    }

    #[tokio::test]
    async fn test_hard_deleted_evidence_is_pruned() {
        let (source, graph, worker) = seeded().await;
        let e1 = NodeRef::new(NodeLabel::Evidence, "E1");
        assert!(!graph.snapshot().edges_of(&e1, RelType::Proves).is_empty());

        source.update(|s| s.evidence.retain(|e| e.id != "E1")).unwrap();
        let report = run_reconcile(
            &source,
            graph.as_ref(),
            &worker,
            ReconcileOptions::default(),
            &not_cancelled(),
        )
        .await
        .unwrap();

        assert_eq!(report.pruned.get(&NodeLabel::Evidence), Some(&vec!["E1".to_string()]));
        assert_eq!(report.pruned_total(), 1);
        let snapshot = graph.snapshot();
        assert!(snapshot.node(NodeLabel::Evidence, "E1").is_none());
        assert!(snapshot
            .relationships
            .keys()
            .all(|id| id.from != e1 && id.to != e1));
        assert!(snapshot.dangling_relationships().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_deleting() {
        let (source, graph, _worker) = seeded().await;
        graph
            .merge_node(NodeLabel::User, "GHOST", Default::default())
            .await
            .unwrap();
        let before = graph.snapshot();

        let sink = RecordingSink::default();
        let report = run_reconcile(
            &source,
            graph.as_ref(),
            &sink,
            ReconcileOptions { dry_run: true },
            &not_cancelled(),
        )
        .await
        .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.pruned.get(&NodeLabel::User), Some(&vec!["GHOST".to_string()]));
        assert!(sink.events().is_empty());
        assert_eq!(graph.snapshot(), before);
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let (source, graph, worker) = seeded().await;
        graph
            .merge_node(NodeLabel::Tag, "T-STALE", Default::default())
            .await
            .unwrap();

        let first = run_reconcile(&source, graph.as_ref(), &worker, ReconcileOptions::default(), &not_cancelled())
            .await
            .unwrap();
        assert_eq!(first.pruned.get(&NodeLabel::Tag), Some(&vec!["T-STALE".to_string()]));
        let after_first = graph.snapshot();

        let second = run_reconcile(&source, graph.as_ref(), &worker, ReconcileOptions::default(), &not_cancelled())
            .await
            .unwrap();
        assert!(second.pruned.is_empty());
        assert_eq!(graph.snapshot(), after_first);
    }

    #[tokio::test]
    async fn test_hydration_repairs_lost_updates() {
        let (source, graph, worker) = seeded().await;
        // Renames whose events never reached the worker.
        source
            .update(|s| {
                s.evidence[0].file_name = "policy-v2.pdf".to_string();
                s.tags[0].name = "Policies".to_string();
                s.controls[0].title = "Access control".to_string();
            })
            .unwrap();

        let report = run_reconcile(&source, graph.as_ref(), &worker, ReconcileOptions::default(), &not_cancelled())
            .await
            .unwrap();
        assert_eq!(report.hydrated.skipped_uploaders, 1);
        assert!(report.hydrated.events() > 0);

        let snapshot = graph.snapshot();
        let file_name = snapshot
            .node(NodeLabel::Evidence, "E1")
            .and_then(|p| p.get("fileName"))
            .cloned();
        assert_eq!(file_name, Some(PropertyValue::from("policy-v2.pdf")));
        let tag_name = snapshot.node(NodeLabel::Tag, "T1").and_then(|p| p.get("name")).cloned();
        assert_eq!(tag_name, Some(PropertyValue::from("Policies")));
        let title = snapshot.node(NodeLabel::Control, "C1").and_then(|p| p.get("title")).cloned();
        assert_eq!(title, Some(PropertyValue::from("Access control")));
    }

    #[tokio::test]
    async fn test_deleted_standard_leaves_no_dangling_edges() {
        let (source, graph, worker) = seeded().await;
        source
            .update(|s| {
                s.standards.retain(|st| st.id != "S2");
                s.controls.retain(|c| c.id != "C2");
                for e in &mut s.evidence {
                    e.control_ids.retain(|c| c != "C2");
                }
            })
            .unwrap();

        let report = run_reconcile(&source, graph.as_ref(), &worker, ReconcileOptions::default(), &not_cancelled())
            .await
            .unwrap();

        assert_eq!(report.pruned.get(&NodeLabel::Control), Some(&vec!["C2".to_string()]));
        assert_eq!(report.pruned.get(&NodeLabel::Standard), Some(&vec!["S2".to_string()]));
        let snapshot = graph.snapshot();
        assert!(snapshot.node(NodeLabel::Standard, "S2").is_none());
        assert!(snapshot.dangling_relationships().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_touches_nothing() {
        let (source, graph, worker) = seeded().await;
        graph
            .merge_node(NodeLabel::User, "GHOST", Default::default())
            .await
            .unwrap();
        let before = graph.snapshot();
        let (_tx, rx) = watch::channel(true);

        let report = run_reconcile(&source, graph.as_ref(), &worker, ReconcileOptions::default(), &rx)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(graph.snapshot(), before);
    }
}
