//! Node representation in the property graph

use super::schema::{Label, Property};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for a node, stored as its `uuid` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Create a new random NodeId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a NodeId from an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse a NodeId from its hyphenated string form
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed property values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// True for values that cannot take part in a natural key.
    pub fn is_blank(&self) -> bool {
        match self {
            PropertyValue::String(s) => s.is_empty(),
            PropertyValue::Array(items) => items.is_empty(),
            PropertyValue::Float(f) => f.is_nan(),
            _ => false,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Int(i)
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        PropertyValue::Float(f)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<NodeId> for PropertyValue {
    fn from(id: NodeId) -> Self {
        PropertyValue::String(id.to_string())
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(items: Vec<String>) -> Self {
        PropertyValue::Array(items.into_iter().map(PropertyValue::String).collect())
    }
}

/// Properties collection as persisted (property name → value)
pub type Properties = BTreeMap<String, PropertyValue>;

/// The identity of a node: its label plus the values of the label's
/// natural-key properties.
#[derive(Debug, Clone, PartialEq)]
pub struct NaturalKey {
    label: Label,
    values: Vec<(Property, PropertyValue)>,
}

impl NaturalKey {
    pub fn new(label: Label) -> Self {
        Self {
            label,
            values: Vec::new(),
        }
    }

    /// Add a key component
    pub fn with(mut self, property: Property, value: impl Into<PropertyValue>) -> Self {
        self.values.push((property, value.into()));
        self
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn get(&self, property: Property) -> Option<&PropertyValue> {
        self.values
            .iter()
            .find(|(p, _)| *p == property)
            .map(|(_, v)| v)
    }

    /// Key components in the label's canonical order.
    ///
    /// Returns the first offending property when a declared key property is
    /// missing or blank, or when a component is not part of the label's key.
    pub fn ordered(&self) -> Result<Vec<(Property, &PropertyValue)>, Property> {
        let declared = self.label.natural_key();
        if let Some((extra, _)) = self.values.iter().find(|(p, _)| !declared.contains(p)) {
            return Err(*extra);
        }
        declared
            .iter()
            .map(|p| match self.get(*p) {
                Some(v) if !v.is_blank() => Ok((*p, v)),
                _ => Err(*p),
            })
            .collect()
    }

    /// Stable string form of the key, used as the uniqueness column by
    /// stores that need one. Only meaningful after `ordered()` succeeded.
    pub fn canonical(&self) -> String {
        let values: Vec<&PropertyValue> = self
            .label
            .natural_key()
            .iter()
            .filter_map(|p| self.get(*p))
            .collect();
        serde_json::to_string(&values).unwrap_or_default()
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.label, self.canonical())
    }
}

/// A node in the property graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier
    pub id: NodeId,
    pub label: Label,
    /// All stored properties, key and non-key
    pub properties: Properties,
}

impl Node {
    pub fn get(&self, property: Property) -> Option<&PropertyValue> {
        self.properties.get(property.as_str())
    }

    /// String value of a property, if present and a string
    pub fn text(&self, property: Property) -> Option<&str> {
        self.get(property).and_then(PropertyValue::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_follows_declared_key_order() {
        let key = NaturalKey::new(Label::Place)
            .with(Property::Toolchain, "tc")
            .with(Property::Id, "E1");
        let ordered = key.ordered().unwrap();
        assert_eq!(ordered[0].0, Property::Id);
        assert_eq!(ordered[1].0, Property::Toolchain);
    }

    #[test]
    fn canonical_form_ignores_insertion_order() {
        let a = NaturalKey::new(Label::Lemma)
            .with(Property::Text, "run")
            .with(Property::Language, "en");
        let b = NaturalKey::new(Label::Lemma)
            .with(Property::Language, "en")
            .with(Property::Text, "run");
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn blank_component_is_reported() {
        let key = NaturalKey::new(Label::Lemma)
            .with(Property::Text, "")
            .with(Property::Language, "en");
        assert_eq!(key.ordered().unwrap_err(), Property::Text);
    }

    #[test]
    fn whitespace_is_a_valid_component() {
        let key = NaturalKey::new(Label::Lemma)
            .with(Property::Text, "\n")
            .with(Property::Language, "en");
        assert_eq!(key.ordered().unwrap().len(), 2);
    }

    #[test]
    fn missing_component_is_reported() {
        let key = NaturalKey::new(Label::Entity).with(Property::Text, "Soho");
        assert_eq!(key.ordered().unwrap_err(), Property::Type);
    }

    #[test]
    fn undeclared_component_is_reported() {
        let key = NaturalKey::new(Label::Lemma)
            .with(Property::Text, "run")
            .with(Property::Language, "en")
            .with(Property::Name, "x");
        assert_eq!(key.ordered().unwrap_err(), Property::Name);
    }

    #[test]
    fn zero_is_a_valid_key_value() {
        let key = NaturalKey::new(Label::DataSet)
            .with(Property::Year, 0i64)
            .with(Property::Toolchain, "tc");
        assert!(key.ordered().is_ok());
    }

    #[test]
    fn node_id_parses_its_display_form() {
        let id = NodeId::new();
        assert_eq!(NodeId::parse(&id.to_string()).unwrap(), id);
    }
}
