//! Step-based execution driver
//!
//! [`ExecutionIterator`] yields batches of ready nodes. Between steps it
//! re-reads state and re-evaluates readiness (the diagram may be cyclic,
//! so order is discovered, not precomputed). When a step comes up empty
//! while nodes are still `RUNNING`, the iterator polls at a short interval
//! up to a bounded retry count; a poll budget exhausted with no progress
//! is reported as a stall. The iterator observes cancellation at every
//! suspension point.

use crate::diagram::{compiled::CompiledDiagram, Node};
use crate::engine::CancelToken;
use crate::error::{EngineError, Result};
use crate::flow::FlowController;
use dipeo_state::StateStore;
use std::sync::Arc;
use std::time::Duration;

/// Batch driver for one execution
pub struct ExecutionIterator {
    diagram: Arc<CompiledDiagram>,
    store: StateStore,
    execution_id: String,
    max_iterations: u32,
    poll_interval: Duration,
    poll_retries: u32,
    iteration: u32,
    cancel: CancelToken,
}

impl ExecutionIterator {
    pub fn new(
        diagram: Arc<CompiledDiagram>,
        store: StateStore,
        execution_id: impl Into<String>,
        max_iterations: u32,
        poll_interval: Duration,
        cancel: CancelToken,
    ) -> Self {
        Self {
            diagram,
            store,
            execution_id: execution_id.into(),
            max_iterations,
            poll_interval,
            poll_retries: 200,
            iteration: 0,
            cancel,
        }
    }

    /// Steps taken so far
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Whether the loop stopped because the global cap was reached
    pub fn hit_iteration_cap(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    /// Produce the next batch of ready nodes
    ///
    /// Returns `Ok(None)` when the execution has nothing further to do
    /// (completion, unreachability, or the iteration cap — the engine
    /// classifies which). Returns [`EngineError::Cancelled`] as soon as
    /// cancellation is observed, and [`EngineError::Deadlock`] if running
    /// nodes stop making progress past the poll budget.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Node>>> {
        let mut polls = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let state = self
                .store
                .get(&self.execution_id)
                .await?
                .ok_or_else(|| {
                    EngineError::Execution(format!("unknown execution {}", self.execution_id))
                })?;

            let flow = FlowController::new(&self.diagram, self.max_iterations);
            if !flow.should_continue(&state, self.iteration) {
                return Ok(None);
            }

            let ready: Vec<Node> = flow
                .get_ready_nodes(&state)
                .into_iter()
                .cloned()
                .collect();

            if ready.is_empty() {
                // Nodes are still in flight; wait for them to land
                polls += 1;
                if polls > self.poll_retries {
                    return Err(EngineError::Deadlock(format!(
                        "no progress after {} polls with nodes still running",
                        self.poll_retries
                    )));
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
                continue;
            }

            self.iteration += 1;
            tracing::debug!(
                execution_id = %self.execution_id,
                iteration = self.iteration,
                batch = ready.len(),
                "dispatching batch"
            );
            return Ok(Some(ready));
        }
    }
}
