//! Engine facade: drives a compiled diagram to completion
//!
//! [`ExecutionEngine`] wires the pieces together for one run: it creates
//! the execution record (write-through), emits `EXECUTION_STARTED`, then
//! loops the [`ExecutionIterator`] — each batch dispatched concurrently
//! under a semaphore of `parallelism` permits, serialized across batches —
//! and finally classifies the terminal status:
//!
//! - every endpoint `COMPLETED` → `COMPLETED`
//! - any node `FAILED` with endpoints unreached → `FAILED`
//! - iteration cap hit → `FAILED("deadlock: no progress")`
//! - remaining nodes legitimately unreachable (dead branches, iteration
//!   caps) → `COMPLETED`
//! - otherwise → `FAILED("deadlock")`
//!
//! Cancellation is cooperative through [`CancelToken`]: the iterator, the
//! node executor, and handler contexts all observe the same token.

use crate::diagram::compiled::CompiledDiagram;
use crate::error::{EngineError, Result};
use crate::events::{bus::EventBus, ExecutionEvent};
use crate::executor::{NodeExecutor, NodeOutcome};
use crate::flow::FlowController;
use crate::handler::HandlerRegistry;
use crate::iterator::ExecutionIterator;
use crate::registry::ServiceRegistry;
use crate::config::EngineSettings;
use dipeo_state::{ExecutionState, ExecutionStatus, NodeStatus, StateStore};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};

/// Cooperative cancellation token shared by one execution
///
/// Cloning is cheap; every clone observes the same signal. Handlers
/// receive the token through their context view and should bail out early
/// once it fires.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal cancellation to every clone of this token
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is signalled
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without firing: cancellation can never come
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Execution id; generated when absent
    pub execution_id: Option<String>,
    /// Id of the diagram being executed, recorded in state and events
    pub diagram_id: Option<String>,
    /// Initial execution variables
    pub variables: HashMap<String, serde_json::Value>,
}

/// The execution engine
pub struct ExecutionEngine {
    store: StateStore,
    bus: EventBus,
    handlers: Arc<HandlerRegistry>,
    services: Arc<ServiceRegistry>,
    settings: EngineSettings,
}

impl ExecutionEngine {
    pub fn new(
        store: StateStore,
        bus: EventBus,
        handlers: Arc<HandlerRegistry>,
        services: Arc<ServiceRegistry>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            bus,
            handlers,
            services,
            settings,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Run a diagram to completion with an internally owned cancel token
    pub async fn execute(
        &self,
        diagram: Arc<CompiledDiagram>,
        options: ExecutionOptions,
    ) -> Result<ExecutionState> {
        self.execute_with_cancel(diagram, options, CancelToken::new())
            .await
    }

    /// Run a diagram to completion; the caller keeps a clone of `cancel`
    /// to abort externally
    pub async fn execute_with_cancel(
        &self,
        diagram: Arc<CompiledDiagram>,
        options: ExecutionOptions,
        cancel: CancelToken,
    ) -> Result<ExecutionState> {
        let execution_id = options
            .execution_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        self.store
            .create(
                &execution_id,
                options.diagram_id.clone(),
                options.variables,
                diagram.node_ids().to_vec(),
            )
            .await?;
        self.store
            .update_status(&execution_id, ExecutionStatus::Running, None)
            .await?;
        self.bus
            .publish(ExecutionEvent::execution_started(
                &execution_id,
                options.diagram_id.as_deref(),
            ))
            .await?;
        self.bus
            .publish(ExecutionEvent::execution_status_changed(
                &execution_id,
                "RUNNING",
            ))
            .await?;

        tracing::info!(execution_id = %execution_id, nodes = diagram.node_count(), "execution started");

        let loop_result = tokio::time::timeout(
            self.settings.execution.execution_timeout,
            self.run_loop(diagram.clone(), &execution_id, cancel.clone()),
        )
        .await;

        match loop_result {
            Err(_) => {
                cancel.cancel();
                self.finish_failed(&execution_id, "timeout").await?;
            }
            Ok(Err(EngineError::Cancelled)) => {
                self.store
                    .update_status(
                        &execution_id,
                        ExecutionStatus::Cancelled,
                        Some("cancelled".to_string()),
                    )
                    .await?;
                self.bus
                    .publish(ExecutionEvent::execution_error(&execution_id, "cancelled"))
                    .await?;
            }
            Ok(Err(e)) => {
                self.finish_failed(&execution_id, &e.to_string()).await?;
            }
            Ok(Ok(cap_hit)) => {
                self.finish_settled(&diagram, &execution_id, cap_hit).await?;
            }
        }

        self.bus.flush().await?;
        self.store.flush(&execution_id).await?;
        self.store
            .get(&execution_id)
            .await?
            .ok_or_else(|| EngineError::Execution(format!("unknown execution {execution_id}")))
    }

    /// Batch loop; returns whether the global iteration cap stopped it
    async fn run_loop(
        &self,
        diagram: Arc<CompiledDiagram>,
        execution_id: &str,
        cancel: CancelToken,
    ) -> Result<bool> {
        let executor = Arc::new(NodeExecutor::new(
            diagram.clone(),
            self.store.clone(),
            self.bus.clone(),
            self.handlers.clone(),
            self.services.clone(),
            self.settings.execution.node_timeout,
            self.settings.execution.max_iterations,
        ));
        let mut iterator = ExecutionIterator::new(
            diagram,
            self.store.clone(),
            execution_id,
            self.settings.execution.max_iterations,
            self.settings.messaging.batch_interval,
            cancel.clone(),
        );
        let semaphore = Arc::new(Semaphore::new(self.settings.execution.parallelism.max(1)));

        while let Some(batch) = iterator.next_batch().await? {
            let futures: Vec<_> = batch
                .into_iter()
                .map(|node| {
                    let executor = executor.clone();
                    let semaphore = semaphore.clone();
                    let cancel = cancel.clone();
                    let execution_id = execution_id.to_string();
                    async move {
                        let permit = semaphore.acquire_owned().await.map_err(|_| {
                            EngineError::Execution("scheduler semaphore closed".to_string())
                        })?;
                        let outcome = executor
                            .execute_node(&execution_id, &node, cancel)
                            .await;
                        drop(permit);
                        outcome
                    }
                })
                .collect();

            for outcome in join_all(futures).await {
                match outcome? {
                    NodeOutcome::Cancelled => return Err(EngineError::Cancelled),
                    NodeOutcome::Completed | NodeOutcome::Failed => {}
                }
            }
        }

        Ok(iterator.hit_iteration_cap())
    }

    /// Classify a quietly finished loop into its terminal status
    async fn finish_settled(
        &self,
        diagram: &CompiledDiagram,
        execution_id: &str,
        cap_hit: bool,
    ) -> Result<()> {
        let state = self
            .store
            .get(execution_id)
            .await?
            .ok_or_else(|| EngineError::Execution(format!("unknown execution {execution_id}")))?;

        let mut endpoints = diagram.endpoint_nodes().peekable();
        let endpoints_exist = endpoints.peek().is_some();
        let endpoints_done =
            endpoints_exist && endpoints.all(|e| state.node_status(&e.id) == NodeStatus::Completed);

        if endpoints_done {
            return self.finish_completed(execution_id, &state).await;
        }

        let first_failure = state
            .node_states
            .iter()
            .find(|(_, s)| s.status == NodeStatus::Failed)
            .map(|(id, s)| {
                format!(
                    "node '{}' failed: {}",
                    id,
                    s.error.as_deref().unwrap_or("unknown error")
                )
            });
        if let Some(error) = first_failure {
            return self.finish_failed(execution_id, &error).await;
        }

        if cap_hit {
            return self.finish_failed(execution_id, "deadlock: no progress").await;
        }

        let flow = FlowController::new(diagram, self.settings.execution.max_iterations);
        if flow.remaining_nodes_unreachable(&state) {
            self.finish_completed(execution_id, &state).await
        } else {
            self.finish_failed(execution_id, "deadlock").await
        }
    }

    async fn finish_completed(&self, execution_id: &str, state: &ExecutionState) -> Result<()> {
        self.store
            .update_status(execution_id, ExecutionStatus::Completed, None)
            .await?;
        self.bus
            .publish(ExecutionEvent::execution_completed(
                execution_id,
                &state.token_usage,
            ))
            .await?;
        tracing::info!(execution_id = %execution_id, "execution completed");
        Ok(())
    }

    async fn finish_failed(&self, execution_id: &str, error: &str) -> Result<()> {
        self.store
            .update_status(
                execution_id,
                ExecutionStatus::Failed,
                Some(error.to_string()),
            )
            .await?;
        self.bus
            .publish(ExecutionEvent::execution_error(execution_id, error))
            .await?;
        tracing::warn!(execution_id = %execution_id, error = %error, "execution failed");
        Ok(())
    }
}
