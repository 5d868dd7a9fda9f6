//! In-memory graph store.
//!
//! Same merge semantics as the Neo4j store, with whole-batch atomicity: a
//! batch is applied to a copy that replaces the live state only on success.
//! Used by tests and for local inspection of what a run would write.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use auditgraph_core::model::{is_valid_property_key, NodeLabel, Properties, PropertyValue, RelType};

use crate::ops::{edge_key, Cardinality, GraphOp, NodeRef, EDGE_KEY_PROPERTY};
use crate::store::{GraphCounts, GraphStore};

/// Identity of a stored relationship. `key` is the canonical JSON of the
/// identity properties.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RelId {
    pub from: NodeRef,
    pub rel: RelType,
    pub to: NodeRef,
    pub key: String,
}

/// Full graph state; two snapshots are equal iff the graphs are identical.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphSnapshot {
    pub nodes: BTreeMap<NodeRef, Properties>,
    pub relationships: BTreeMap<RelId, Properties>,
}

impl GraphSnapshot {
    pub fn node(&self, label: NodeLabel, id: &str) -> Option<&Properties> {
        self.nodes.get(&NodeRef::new(label, id))
    }

    /// Relationships of type `rel` between two nodes, any key.
    pub fn edges_between(&self, from: &NodeRef, rel: RelType, to: &NodeRef) -> Vec<&Properties> {
        self.relationships
            .iter()
            .filter(|(id, _)| id.rel == rel && &id.from == from && &id.to == to)
            .map(|(_, props)| props)
            .collect()
    }

    /// Relationships of type `rel` leaving or entering `node`.
    pub fn edges_of(&self, node: &NodeRef, rel: RelType) -> Vec<&RelId> {
        self.relationships
            .keys()
            .filter(|id| id.rel == rel && (&id.from == node || &id.to == node))
            .collect()
    }

    /// Relationships with a missing endpoint; always empty for a consistent
    /// graph.
    pub fn dangling_relationships(&self) -> Vec<&RelId> {
        self.relationships
            .keys()
            .filter(|id| !self.nodes.contains_key(&id.from) || !self.nodes.contains_key(&id.to))
            .collect()
    }

    fn apply(&mut self, op: &GraphOp) -> Result<()> {
        match op {
            GraphOp::MergeNode { node, props } => {
                let stored = self.nodes.entry(node.clone()).or_default();
                overwrite(stored, props)?;
            }
            GraphOp::MergeRelationship {
                from,
                rel,
                to,
                key,
                props,
                cardinality,
            } => {
                self.nodes.entry(from.clone()).or_default();
                self.nodes.entry(to.clone()).or_default();
                match cardinality {
                    Cardinality::Many => {}
                    Cardinality::OnePerSource => self.relationships.retain(|id, _| {
                        !(id.rel == *rel
                            && id.from == *from
                            && id.to.label == to.label
                            && id.to.id != to.id)
                    }),
                    Cardinality::OnePerTarget => self.relationships.retain(|id, _| {
                        !(id.rel == *rel
                            && id.to == *to
                            && id.from.label == from.label
                            && id.from.id != from.id)
                    }),
                }
                for name in key.keys() {
                    ensure_key(name)?;
                    if name == EDGE_KEY_PROPERTY {
                        bail!("Relationship key '{}' is reserved", name);
                    }
                }
                let rel_id = RelId {
                    from: from.clone(),
                    rel: *rel,
                    to: to.clone(),
                    key: edge_key(key)?,
                };
                let stored = self
                    .relationships
                    .entry(rel_id)
                    .or_insert_with(|| key.clone());
                overwrite(stored, props)?;
            }
            GraphOp::SetProperty { node, key, value } => {
                ensure_key(key)?;
                let stored = self.nodes.entry(node.clone()).or_default();
                set(stored, key, value);
            }
            GraphOp::DetachDeleteNode(node) => self.detach_delete(node),
            GraphOp::DetachDeleteDependents {
                dependent,
                rel,
                owner,
            } => {
                let doomed: Vec<NodeRef> = self
                    .relationships
                    .keys()
                    .filter(|id| id.rel == *rel && id.to == *owner && id.from.label == *dependent)
                    .map(|id| id.from.clone())
                    .collect();
                for node in &doomed {
                    self.detach_delete(node);
                }
            }
        }
        Ok(())
    }

    fn detach_delete(&mut self, node: &NodeRef) {
        self.nodes.remove(node);
        self.relationships
            .retain(|id, _| &id.from != node && &id.to != node);
    }
}

fn ensure_key(key: &str) -> Result<()> {
    if !is_valid_property_key(key) {
        bail!("Invalid property key: {:?}", key);
    }
    Ok(())
}

fn set(stored: &mut Properties, key: &str, value: &PropertyValue) {
    if value.is_null() {
        stored.remove(key);
    } else {
        stored.insert(key.to_string(), value.clone());
    }
}

fn overwrite(stored: &mut Properties, props: &Properties) -> Result<()> {
    for (key, value) in props {
        ensure_key(key)?;
        set(stored, key, value);
    }
    Ok(())
}

#[derive(Default)]
pub struct MemoryGraph {
    state: Mutex<GraphSnapshot>,
    unavailable: AtomicBool,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Simulate an outage: every call fails until availability is restored.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("Graph store is unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn apply(&self, ops: &[GraphOp]) -> Result<()> {
        self.check_available()?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("Graph state lock poisoned"))?;
        let mut next = state.clone();
        for op in ops {
            next.apply(op)?;
        }
        *state = next;
        Ok(())
    }

    async fn query_ids_not_in(
        &self,
        label: NodeLabel,
        valid_ids: &HashSet<String>,
    ) -> Result<Vec<String>> {
        self.check_available()?;
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("Graph state lock poisoned"))?;
        Ok(state
            .nodes
            .keys()
            .filter(|node| node.label == label && !valid_ids.contains(&node.id))
            .map(|node| node.id.clone())
            .collect())
    }

    async fn counts(&self) -> Result<GraphCounts> {
        self.check_available()?;
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("Graph state lock poisoned"))?;
        Ok(GraphCounts {
            nodes: state.nodes.len(),
            relationships: state.relationships.len(),
        })
    }
}
