//! Storage backends for NeoBridge
//!
//! The core talks to the graph through the `GraphStore` trait.
//! `SqliteStore` is always available; `Neo4jStore` sits behind the
//! `neo4j` feature.

#[cfg(feature = "neo4j")]
mod neo4j;
mod sqlite;
mod traits;

#[cfg(feature = "neo4j")]
pub use neo4j::Neo4jStore;
pub use sqlite::SqliteStore;
pub use traits::{GraphStore, MergeOutcome, NodeFilter, OpenStore, StorageError, StorageResult};
