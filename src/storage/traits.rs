//! Storage trait definitions

use crate::graph::{Label, NaturalKey, Node, NodeId, Properties, Property, PropertyValue, RelType};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[cfg(feature = "neo4j")]
    #[error("Neo4j error: {0}")]
    Neo4j(neo4rs::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store could not be reached or is busy; safe to retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness or schema constraint was violated.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("Connection lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StorageError {
    /// Busy/locked databases are transient; constraint failures are not.
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(err, msg) = &e {
            let detail = msg.clone().unwrap_or_else(|| err.to_string());
            match err.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    return StorageError::Unavailable(detail)
                }
                rusqlite::ErrorCode::ConstraintViolation => return StorageError::Constraint(detail),
                _ => {}
            }
        }
        StorageError::Database(e)
    }
}

#[cfg(feature = "neo4j")]
impl From<neo4rs::Error> for StorageError {
    fn from(e: neo4rs::Error) -> Self {
        let detail = e.to_string();
        match e {
            neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => {
                StorageError::Unavailable(detail)
            }
            _ if detail.contains("TransientError") => StorageError::Unavailable(detail),
            _ if detail.contains("ConstraintValidationFailed") => StorageError::Constraint(detail),
            other => StorageError::Neo4j(other),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of a merge-style node write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Identifier of the matched or created node
    pub id: NodeId,
    /// True when this call created the node
    pub created: bool,
}

/// Exact-match property filter for node lookups
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub equals: Vec<(Property, PropertyValue)>,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, property: Property, value: impl Into<PropertyValue>) -> Self {
        self.equals.push((property, value.into()));
        self
    }
}

/// The narrow graph-store capability the core depends on.
///
/// Every call is its own transactional unit: implementations acquire a
/// session/connection, run, and release it before returning, on success
/// and on error alike.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Declare that nodes of `label` carry a unique `uuid`. Idempotent.
    async fn ensure_unique_constraint(&self, label: Label) -> StorageResult<()>;

    /// Declare a secondary index over `properties` of `label`. Idempotent.
    async fn ensure_index(&self, label: Label, properties: &[Property]) -> StorageResult<()>;

    /// Match-or-create a node by natural key.
    ///
    /// When the key matches an existing node, `extra` is merged into it
    /// (per-property last write wins, nothing is removed) and its identifier
    /// is returned. Otherwise a node is created carrying `new_id` as its
    /// identifier. Concurrent calls with the same key converge on one node.
    async fn merge_node(
        &self,
        key: &NaturalKey,
        extra: &Properties,
        new_id: NodeId,
    ) -> StorageResult<MergeOutcome>;

    /// Create `(from)-[rel]->(to)` unless it exists. Returns true if created.
    async fn merge_edge(&self, rel: RelType, from: NodeId, to: NodeId) -> StorageResult<bool>;

    /// Load a node by identifier
    async fn load_node(&self, id: NodeId) -> StorageResult<Option<Node>>;

    /// Nodes of `label` whose properties equal every filter value
    async fn find_nodes(
        &self,
        label: Label,
        filter: &NodeFilter,
        limit: usize,
    ) -> StorageResult<Vec<Node>>;

    /// One page of nodes of `label` in identifier order, strictly after `after`.
    async fn scan_nodes(
        &self,
        label: Label,
        after: Option<NodeId>,
        limit: usize,
    ) -> StorageResult<Vec<Node>>;

    /// Targets of outgoing `rel` edges from `id`
    async fn edges_from(&self, id: NodeId, rel: RelType) -> StorageResult<Vec<NodeId>>;

    async fn count_nodes(&self, label: Label) -> StorageResult<u64>;

    async fn count_edges(&self, rel: RelType) -> StorageResult<u64>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: GraphStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
