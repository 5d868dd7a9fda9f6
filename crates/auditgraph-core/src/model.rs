//! Graph vocabulary: node labels, relationship types and scalar property values.
//!
//! Node ids are always the relational primary key of the source row, so the
//! same string identifies an entity on both sides.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Label of a node in the graph projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeLabel {
    User,
    Project,
    Standard,
    Control,
    Evidence,
    Tag,
}

impl NodeLabel {
    pub const ALL: [NodeLabel; 6] = [
        NodeLabel::User,
        NodeLabel::Project,
        NodeLabel::Standard,
        NodeLabel::Control,
        NodeLabel::Evidence,
        NodeLabel::Tag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::User => "User",
            NodeLabel::Project => "Project",
            NodeLabel::Standard => "Standard",
            NodeLabel::Control => "Control",
            NodeLabel::Evidence => "Evidence",
            NodeLabel::Tag => "Tag",
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeLabel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeLabel::ALL
            .iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| CoreError::validation(format!("Unknown node label: {}", s)))
    }
}

/// Typed, directed relationship between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelType {
    AuditedBy,
    Reviews,
    ManagedBy,
    Oversees,
    OwnedBy,
    Uploaded,
    BelongsTo,
    Proves,
    HasTag,
    SimilarTo,
    RelatedVia,
    RelatesTo,
    Requested,
    HasIssue,
}

impl RelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelType::AuditedBy => "AUDITED_BY",
            RelType::Reviews => "REVIEWS",
            RelType::ManagedBy => "MANAGED_BY",
            RelType::Oversees => "OVERSEES",
            RelType::OwnedBy => "OWNED_BY",
            RelType::Uploaded => "UPLOADED",
            RelType::BelongsTo => "BELONGS_TO",
            RelType::Proves => "PROVES",
            RelType::HasTag => "HAS_TAG",
            RelType::SimilarTo => "SIMILAR_TO",
            RelType::RelatedVia => "RELATED_VIA",
            RelType::RelatesTo => "RELATES_TO",
            RelType::Requested => "REQUESTED",
            RelType::HasIssue => "HAS_ISSUE",
        }
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar property value. Graph nodes and relationships only carry scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<&String> for PropertyValue {
    fn from(value: &String) -> Self {
        PropertyValue::String(value.clone())
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(PropertyValue::Null)
    }
}

/// Ordered property map, so two equal graphs compare equal.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Build a property map from literal pairs.
pub fn props<const N: usize>(pairs: [(&str, PropertyValue); N]) -> Properties {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// True when `key` is safe to splice into a query as a property name.
pub fn is_valid_property_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parse_is_case_insensitive() {
        assert_eq!("evidence".parse::<NodeLabel>().unwrap(), NodeLabel::Evidence);
        assert_eq!("Standard".parse::<NodeLabel>().unwrap(), NodeLabel::Standard);
        assert!("Framework".parse::<NodeLabel>().is_err());
    }

    #[test]
    fn test_property_value_untagged_json() {
        let values: Vec<PropertyValue> =
            serde_json::from_str(r#"[null, true, 3, 2.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                PropertyValue::Null,
                PropertyValue::Bool(true),
                PropertyValue::Int(3),
                PropertyValue::Float(2.5),
                PropertyValue::String("x".to_string()),
            ]
        );
    }

    #[test]
    fn test_option_converts_to_null() {
        let missing: Option<&str> = None;
        assert!(PropertyValue::from(missing).is_null());
        assert_eq!(PropertyValue::from(Some("a")).as_str(), Some("a"));
    }

    #[test]
    fn test_property_key_validation() {
        assert!(is_valid_property_key("fileName"));
        assert!(is_valid_property_key("created_at"));
        assert!(!is_valid_property_key("1abc"));
        assert!(!is_valid_property_key("name} DETACH DELETE n //"));
        assert!(!is_valid_property_key(""));
    }
}
