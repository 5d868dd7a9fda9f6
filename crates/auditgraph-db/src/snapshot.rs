//! In-memory relational snapshot.
//!
//! Holds rows directly, either built in code or loaded from a JSON export
//! with the same shape as [`Snapshot`].

use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use auditgraph_core::source::{
    ControlRow, EvidenceRow, IssueRow, ProjectRow, RelationalSource, SourceError, SourceResult,
    StandardRow, TagRow, UserRow,
};

/// Every table the sync engine reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub users: Vec<UserRow>,
    pub projects: Vec<ProjectRow>,
    pub standards: Vec<StandardRow>,
    pub controls: Vec<ControlRow>,
    pub evidence: Vec<EvidenceRow>,
    pub tags: Vec<TagRow>,
    pub issues: Vec<IssueRow>,
}

/// A relational source over a mutable in-memory snapshot.
#[derive(Default)]
pub struct SnapshotSource {
    snapshot: RwLock<Snapshot>,
}

impl SnapshotSource {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    /// Load a JSON export.
    pub fn from_json_file(path: &Path) -> SourceResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SourceError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let snapshot: Snapshot = serde_json::from_str(&raw)
            .map_err(|e| SourceError::Query(format!("{}: {}", path.display(), e)))?;
        Ok(Self::new(snapshot))
    }

    /// Mutate the rows in place (simulates relational writes in tests).
    pub fn update<F>(&self, f: F) -> SourceResult<()>
    where
        F: FnOnce(&mut Snapshot),
    {
        let mut guard = self
            .snapshot
            .write()
            .map_err(|_| SourceError::Unavailable("snapshot lock poisoned".to_string()))?;
        f(&mut guard);
        Ok(())
    }

    fn read<T, F>(&self, f: F) -> SourceResult<T>
    where
        F: FnOnce(&Snapshot) -> T,
    {
        let guard = self
            .snapshot
            .read()
            .map_err(|_| SourceError::Unavailable("snapshot lock poisoned".to_string()))?;
        Ok(f(&guard))
    }
}

#[async_trait]
impl RelationalSource for SnapshotSource {
    async fn users(&self) -> SourceResult<Vec<UserRow>> {
        self.read(|s| s.users.clone())
    }

    async fn projects(&self) -> SourceResult<Vec<ProjectRow>> {
        self.read(|s| s.projects.clone())
    }

    async fn standards(&self) -> SourceResult<Vec<StandardRow>> {
        self.read(|s| s.standards.clone())
    }

    async fn controls(&self) -> SourceResult<Vec<ControlRow>> {
        self.read(|s| s.controls.clone())
    }

    async fn evidence(&self) -> SourceResult<Vec<EvidenceRow>> {
        self.read(|s| s.evidence.clone())
    }

    async fn tags(&self) -> SourceResult<Vec<TagRow>> {
        self.read(|s| s.tags.clone())
    }

    async fn issues(&self) -> SourceResult<Vec<IssueRow>> {
        self.read(|s| s.issues.clone())
    }
}
