//! Relationship representation

use super::node::NodeId;
use super::schema::RelType;
use serde::{Deserialize, Serialize};

/// A directed, typed relationship.
///
/// Relationships have set semantics: at most one edge of a given type
/// between an ordered pair of endpoints, so the triple is the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub rel: RelType,
    pub source: NodeId,
    pub target: NodeId,
}

impl Edge {
    pub fn new(rel: RelType, source: NodeId, target: NodeId) -> Self {
        Self { rel, source, target }
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})-[:{}]->({})", self.source, self.rel, self.target)
    }
}
