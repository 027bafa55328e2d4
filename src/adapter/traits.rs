//! Adapter trait: the contract adapters implement
//!
//! An adapter turns one domain input (a reference record, an annotated
//! document) into node and relationship upserts. It declares what input
//! kind it consumes and writes through the shared `UpsertEngine`.

use super::cancel::CancellationToken;
use crate::graph::{BridgeResult, UpsertOutcome};
use async_trait::async_trait;
use std::any::Any;
use std::ops::AddAssign;

/// The input envelope the pipeline hands to an adapter.
#[derive(Debug)]
pub struct AdapterInput {
    /// The kind of input (matched against `Adapter::input_kind`)
    pub kind: String,
    /// Opaque data payload; the adapter downcasts internally
    pub data: Box<dyn Any + Send + Sync>,
    /// Where the input came from, for logs ("row 12", a document title)
    pub origin: String,
}

impl AdapterInput {
    pub fn new(
        kind: impl Into<String>,
        data: impl Any + Send + Sync + 'static,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            data: Box::new(data),
            origin: origin.into(),
        }
    }

    /// Attempt to downcast the data payload to a specific type.
    pub fn downcast_data<T: 'static>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }
}

/// What one `process` call wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitStats {
    pub nodes_created: usize,
    pub edges_created: usize,
}

impl EmitStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_node(&mut self, outcome: UpsertOutcome) -> crate::graph::NodeId {
        if outcome.created {
            self.nodes_created += 1;
        }
        outcome.id
    }

    pub fn record_edge(&mut self, created: bool) {
        if created {
            self.edges_created += 1;
        }
    }
}

impl AddAssign for EmitStats {
    fn add_assign(&mut self, other: Self) {
        self.nodes_created += other.nodes_created;
        self.edges_created += other.edges_created;
    }
}

/// The contract adapters implement.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Unique identifier for this adapter
    fn id(&self) -> &str;

    /// What kind of input this adapter consumes
    fn input_kind(&self) -> &str;

    /// Declare the constraints and indexes this adapter relies on.
    /// Called once by the pipeline before the first input.
    async fn prepare(&self) -> BridgeResult<()> {
        Ok(())
    }

    /// Process one input.
    ///
    /// The adapter downcasts `input.data` internally. If the downcast fails,
    /// return `Err(BridgeError::MalformedInput)`. Cancellation is observed
    /// between transactions.
    async fn process(
        &self,
        input: &AdapterInput,
        cancel: &CancellationToken,
    ) -> BridgeResult<EmitStats>;
}
