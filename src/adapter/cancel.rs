//! Cooperative cancellation for long-running ingestion and linking
//!
//! The caller signals via a cancellation token. Adapters and the linker
//! check it at transaction and page boundaries. Work committed before the
//! check remains in the graph.

use crate::graph::{BridgeError, BridgeResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cooperative cancellation token.
///
/// Cancellation requested in the middle of a store call has no effect
/// until the next boundary check.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// `Err(Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> BridgeResult<()> {
        if self.is_cancelled() {
            Err(BridgeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
