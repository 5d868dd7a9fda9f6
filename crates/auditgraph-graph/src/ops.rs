//! Graph mutations as data.
//!
//! Handlers produce a list of [`GraphOp`]s; a store applies the whole list in
//! one transaction. Every op is an upsert or a delete, so re-applying a list
//! leaves the graph unchanged.

use auditgraph_core::model::{NodeLabel, Properties, PropertyValue, RelType};

/// Edge property holding the canonical identity key. Every merged edge
/// carries it, so an unkeyed merge never matches a keyed edge.
pub const EDGE_KEY_PROPERTY: &str = "edgeKey";

/// Canonical JSON of a relationship's identity properties; `{}` when unkeyed.
pub fn edge_key(key: &Properties) -> serde_json::Result<String> {
    serde_json::to_string(key)
}

/// A node addressed by label and relational id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub label: NodeLabel,
    pub id: String,
}

impl NodeRef {
    pub fn new(label: NodeLabel, id: impl Into<String>) -> Self {
        Self {
            label,
            id: id.into(),
        }
    }
}

/// How many edges of one type an endpoint may hold towards nodes of the
/// other endpoint's label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Many,
    /// The source has at most one such edge; merging replaces the old one.
    OnePerSource,
    /// The target has at most one such edge; merging replaces the old one.
    OnePerTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphOp {
    /// Merge by id, then overwrite the given properties.
    MergeNode { node: NodeRef, props: Properties },
    /// Merge both endpoints and the edge. `key` properties are part of the
    /// edge identity; `props` are overwritten on it.
    MergeRelationship {
        from: NodeRef,
        rel: RelType,
        to: NodeRef,
        key: Properties,
        props: Properties,
        cardinality: Cardinality,
    },
    /// Merge by id, then overwrite one property.
    SetProperty {
        node: NodeRef,
        key: String,
        value: PropertyValue,
    },
    DetachDeleteNode(NodeRef),
    /// Detach-delete every `dependent` node with an outgoing `rel` edge to
    /// `owner`.
    DetachDeleteDependents {
        dependent: NodeLabel,
        rel: RelType,
        owner: NodeRef,
    },
}

impl GraphOp {
    pub fn merge_node(label: NodeLabel, id: impl Into<String>, props: Properties) -> Self {
        GraphOp::MergeNode {
            node: NodeRef::new(label, id),
            props,
        }
    }

    /// A plain many-to-many edge without properties.
    pub fn link(from: NodeRef, rel: RelType, to: NodeRef) -> Self {
        GraphOp::MergeRelationship {
            from,
            rel,
            to,
            key: Properties::new(),
            props: Properties::new(),
            cardinality: Cardinality::Many,
        }
    }

    pub fn set_property(
        label: NodeLabel,
        id: impl Into<String>,
        key: impl Into<String>,
        value: PropertyValue,
    ) -> Self {
        GraphOp::SetProperty {
            node: NodeRef::new(label, id),
            key: key.into(),
            value,
        }
    }

    pub fn detach_delete(label: NodeLabel, id: impl Into<String>) -> Self {
        GraphOp::DetachDeleteNode(NodeRef::new(label, id))
    }

    /// Builder-style: make a relationship op single-cardinality.
    pub fn with_cardinality(mut self, value: Cardinality) -> Self {
        if let GraphOp::MergeRelationship { cardinality, .. } = &mut self {
            *cardinality = value;
        }
        self
    }

    /// Builder-style: set the identity properties of a relationship op.
    pub fn with_key(mut self, value: Properties) -> Self {
        if let GraphOp::MergeRelationship { key, .. } = &mut self {
            *key = value;
        }
        self
    }

    /// Builder-style: set the overwritten properties of a relationship op.
    pub fn with_props(mut self, value: Properties) -> Self {
        if let GraphOp::MergeRelationship { props, .. } = &mut self {
            *props = value;
        }
        self
    }
}
