//! Core graph data structures

mod edge;
mod engine;
mod node;
pub mod schema;

pub use edge::Edge;
pub use engine::{BridgeError, BridgeResult, RetryPolicy, UpsertEngine, UpsertOutcome};
pub use node::{NaturalKey, Node, NodeId, Properties, PropertyValue};
pub use schema::{Label, Property, RelType};
