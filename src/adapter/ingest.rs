//! Ingest pipeline
//!
//! Routes each input to the adapter registered for its kind and keeps a
//! run summary. Record-scoped failures (missing columns, malformed input,
//! invalid keys) skip the item and the run continues. Store-level failures
//! and cancellation abort the run.

use super::cancel::CancellationToken;
use super::traits::{Adapter, AdapterInput, EmitStats};
use crate::graph::{BridgeError, BridgeResult};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

/// Counters for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Inputs fully written
    pub processed: usize,
    /// Inputs skipped for missing columns or malformed data
    pub skipped: usize,
    /// Inputs rejected for invalid natural keys
    pub failed: usize,
    pub nodes_created: usize,
    pub edges_created: usize,
}

impl RunSummary {
    fn absorb(&mut self, stats: EmitStats) {
        self.processed += 1;
        self.nodes_created += stats.nodes_created;
        self.edges_created += stats.edges_created;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed, {} skipped, {} failed, {} nodes created, {} edges created",
            self.processed, self.skipped, self.failed, self.nodes_created, self.edges_created
        )
    }
}

/// A run that stopped early, with what it managed before stopping.
#[derive(Debug, Error)]
#[error("run aborted ({error}) after {summary}")]
pub struct RunAborted {
    pub summary: RunSummary,
    #[source]
    pub error: BridgeError,
}

/// The ingest pipeline.
///
/// All adapter writes go through this pipeline. Callers hand it inputs;
/// it routes to adapters, classifies failures and tallies the run.
pub struct IngestPipeline {
    adapters: Vec<Arc<dyn Adapter>>,
    cancel: CancellationToken,
    prepared: OnceCell<()>,
}

impl IngestPipeline {
    /// Create a pipeline with no adapters.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            adapters: Vec::new(),
            cancel,
            prepared: OnceCell::new(),
        }
    }

    /// Register an adapter.
    pub fn register_adapter(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.push(adapter);
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    async fn prepare(&self) -> BridgeResult<()> {
        self.prepared
            .get_or_try_init(|| async {
                for adapter in &self.adapters {
                    adapter.prepare().await?;
                }
                Ok::<(), BridgeError>(())
            })
            .await?;
        Ok(())
    }

    /// Process a single input through the adapter registered for its kind.
    pub async fn ingest(&self, input: &AdapterInput) -> BridgeResult<EmitStats> {
        self.cancel.check()?;
        self.prepare().await?;

        let adapter = self
            .adapters
            .iter()
            .find(|a| a.input_kind() == input.kind)
            .ok_or_else(|| {
                BridgeError::MalformedInput(format!(
                    "no adapter registered for input kind '{}'",
                    input.kind
                ))
            })?;

        adapter.process(input, &self.cancel).await
    }

    /// Process a stream of inputs, continuing past record-scoped failures.
    ///
    /// Items that failed before reaching an adapter (e.g. unreadable rows)
    /// are passed in as errors and counted like adapter failures.
    pub async fn run<I>(&self, inputs: I) -> Result<RunSummary, RunAborted>
    where
        I: IntoIterator<Item = BridgeResult<AdapterInput>>,
    {
        let mut summary = RunSummary::default();

        for item in inputs {
            let result = match item {
                Ok(input) => self
                    .ingest(&input)
                    .await
                    .map_err(|e| (input.origin.clone(), e)),
                Err(e) => Err((String::from("<unreadable>"), e)),
            };

            match result {
                Ok(stats) => summary.absorb(stats),
                Err((origin, e @ BridgeError::InvalidKey { .. })) => {
                    warn!(%origin, error = %e, "input failed");
                    summary.failed += 1;
                }
                Err((origin, e)) if e.is_record_scoped() => {
                    warn!(%origin, error = %e, "input skipped");
                    summary.skipped += 1;
                }
                Err((origin, e)) => {
                    error!(%origin, error = %e, %summary, "run aborted");
                    return Err(RunAborted { summary, error: e });
                }
            }
        }

        info!(%summary, "run complete");
        Ok(summary)
    }
}
