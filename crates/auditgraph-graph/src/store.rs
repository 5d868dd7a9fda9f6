//! GraphStore trait definition.
//!
//! The narrow contract the sync engine needs from a graph database. Neo4j
//! implements it for production, [`MemoryGraph`](crate::MemoryGraph) for
//! tests.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

use auditgraph_core::model::{NodeLabel, Properties, PropertyValue, RelType};

use crate::ops::{GraphOp, NodeRef};

/// Node and relationship counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphCounts {
    pub nodes: usize,
    pub relationships: usize,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Apply every op in one transaction; nothing is applied on error.
    async fn apply(&self, ops: &[GraphOp]) -> Result<()>;

    /// Ids of `label` nodes that are not in `valid_ids`, sorted.
    async fn query_ids_not_in(
        &self,
        label: NodeLabel,
        valid_ids: &HashSet<String>,
    ) -> Result<Vec<String>>;

    async fn counts(&self) -> Result<GraphCounts>;

    async fn merge_node(&self, label: NodeLabel, id: &str, props: Properties) -> Result<()> {
        self.apply(&[GraphOp::merge_node(label, id, props)]).await
    }

    async fn merge_relationship(
        &self,
        from: NodeRef,
        rel: RelType,
        to: NodeRef,
        props: Properties,
    ) -> Result<()> {
        self.apply(&[GraphOp::link(from, rel, to).with_props(props)])
            .await
    }

    async fn set_property(
        &self,
        label: NodeLabel,
        id: &str,
        key: &str,
        value: PropertyValue,
    ) -> Result<()> {
        self.apply(&[GraphOp::set_property(label, id, key, value)])
            .await
    }

    async fn detach_delete_node(&self, label: NodeLabel, id: &str) -> Result<()> {
        self.apply(&[GraphOp::detach_delete(label, id)]).await
    }
}
