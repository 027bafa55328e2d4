//! NeoBridge: bridging gazetteer data and annotated text in one property graph
//!
//! Two adapters write into a shared graph through an identity-preserving
//! upsert layer, and a batch linker connects them by name.
//!
//! # Core Concepts
//!
//! - **Natural keys**: every label declares the properties that identify a
//!   node; writes are match-or-create on that key
//! - **Identifiers**: each node gets one UUID at creation, never reassigned
//! - **Adapters**: gazetteer rows and annotated documents become graph fragments
//! - **Linking**: entities and lemmas are matched to geographic names
//!
//! # Example
//!
//! ```
//! use neobridge::{OpenStore, SqliteStore, UpsertEngine};
//! use std::sync::Arc;
//!
//! let store = SqliteStore::open_in_memory().unwrap();
//! let engine = UpsertEngine::new(Arc::new(store));
//! // Engine is ready for adapters
//! ```

pub mod adapter;
pub mod config;
pub mod graph;
pub mod storage;

pub use adapter::{
    AnnotationAdapter, CancellationToken, CorpusLinker, GeographicAdapter, IngestPipeline,
    LinkReport, RunSummary,
};
pub use config::{Config, StoreConfig, ToolchainConfig};
pub use graph::{
    BridgeError, BridgeResult, Edge, Label, NaturalKey, Node, NodeId, Property, PropertyValue,
    RelType, RetryPolicy, UpsertEngine,
};
#[cfg(feature = "neo4j")]
pub use storage::Neo4jStore;
pub use storage::{GraphStore, OpenStore, SqliteStore, StorageError, StorageResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
