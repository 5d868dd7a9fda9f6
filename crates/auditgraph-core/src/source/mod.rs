//! Read-only view of the relational system of record.
//!
//! Backfill and reconciliation read rows through this contract; the sync
//! engine never writes to the relational store.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::NodeLabel;

/// Relational source error types.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Source query failed: {0}")]
    Query(String),

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// Result type for relational source reads.
pub type SourceResult<T> = Result<T, SourceError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub manager_id: Option<String>,
    pub linked_customer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub customer_id: Option<String>,
    pub auditor_id: Option<String>,
    pub reviewer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardRow {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRow {
    pub id: String,
    pub code: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub standard_id: Option<String>,
    /// Tags linked through the tag table.
    pub tag_ids: Vec<String>,
    /// Free-text labels with no stable id; never synced.
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRow {
    pub id: String,
    pub file_name: String,
    pub project_id: Option<String>,
    pub uploaded_by_id: Option<String>,
    pub control_ids: Vec<String>,
    pub tag_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRow {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRow {
    pub id: String,
    pub customer_id: String,
    pub title: String,
    pub status: String,
}

#[async_trait]
pub trait RelationalSource: Send + Sync {
    async fn users(&self) -> SourceResult<Vec<UserRow>>;
    async fn projects(&self) -> SourceResult<Vec<ProjectRow>>;
    async fn standards(&self) -> SourceResult<Vec<StandardRow>>;
    async fn controls(&self) -> SourceResult<Vec<ControlRow>>;
    async fn evidence(&self) -> SourceResult<Vec<EvidenceRow>>;
    async fn tags(&self) -> SourceResult<Vec<TagRow>>;
    async fn issues(&self) -> SourceResult<Vec<IssueRow>>;

    /// Ids of every live row backing nodes of `label`.
    async fn valid_ids(&self, label: NodeLabel) -> SourceResult<HashSet<String>> {
        let ids = match label {
            NodeLabel::User => self.users().await?.into_iter().map(|r| r.id).collect(),
            NodeLabel::Project => self.projects().await?.into_iter().map(|r| r.id).collect(),
            NodeLabel::Standard => self.standards().await?.into_iter().map(|r| r.id).collect(),
            NodeLabel::Control => self.controls().await?.into_iter().map(|r| r.id).collect(),
            NodeLabel::Evidence => self.evidence().await?.into_iter().map(|r| r.id).collect(),
            NodeLabel::Tag => self.tags().await?.into_iter().map(|r| r.id).collect(),
        };
        Ok(ids)
    }
}
