//! Single-node execution protocol
//!
//! [`NodeExecutor`] drives one node through its lifecycle: resolve inputs,
//! transition to `RUNNING`, invoke the handler under the per-node timeout,
//! record the outcome, and emit the matching events. Handler failures are
//! caught here exactly once and become `NODE_ERROR` events — they never
//! unwind into the scheduler.
//!
//! Iterative (`person_job`) completion follows the original protocol: an
//! output carrying `skipped=true, reason="max iteration …"` at the cap
//! lands in `MAXITER_REACHED`; below the cap the node completes, stores
//! its output, and is immediately reset to `PENDING` so the scheduler can
//! consider the next lap.

use crate::context::ExecutionContextView;
use crate::diagram::{compiled::CompiledDiagram, Node, NodeType};
use crate::engine::CancelToken;
use crate::error::{EngineError, Result};
use crate::events::{bus::EventBus, ExecutionEvent};
use crate::flow::FlowController;
use crate::handler::HandlerRegistry;
use crate::registry::ServiceRegistry;
use crate::resolver::resolve_inputs;
use dipeo_state::{NodeStatus, StateStore};
use std::sync::Arc;
use std::time::Duration;

/// What happened to the node this pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Executes one node at a time against the shared store and bus
pub struct NodeExecutor {
    diagram: Arc<CompiledDiagram>,
    store: StateStore,
    bus: EventBus,
    handlers: Arc<HandlerRegistry>,
    services: Arc<ServiceRegistry>,
    node_timeout: Duration,
    max_iterations: u32,
}

impl NodeExecutor {
    pub fn new(
        diagram: Arc<CompiledDiagram>,
        store: StateStore,
        bus: EventBus,
        handlers: Arc<HandlerRegistry>,
        services: Arc<ServiceRegistry>,
        node_timeout: Duration,
        max_iterations: u32,
    ) -> Self {
        Self {
            diagram,
            store,
            bus,
            handlers,
            services,
            node_timeout,
            max_iterations,
        }
    }

    /// Run one node to completion or failure
    pub async fn execute_node(
        &self,
        execution_id: &str,
        node: &Node,
        cancel: CancelToken,
    ) -> Result<NodeOutcome> {
        let flow = FlowController::new(&self.diagram, self.max_iterations);

        // Inputs are resolved against the pre-run state: execution counts
        // still exclude this run, which is what selects the first-handle
        // view for an iterative node's initial lap.
        let pre_state = self
            .store
            .get(execution_id)
            .await?
            .ok_or_else(|| EngineError::Execution(format!("unknown execution {execution_id}")))?;
        let inputs = resolve_inputs(&self.diagram, &flow, node, &pre_state);

        self.store
            .update_node_status(execution_id, &node.id, NodeStatus::Running, None)
            .await?;
        self.bus
            .publish(ExecutionEvent::node_started(
                execution_id,
                &node.id,
                node.node_type.as_str(),
            ))
            .await?;

        let Some(handler) = self.handlers.get(node.node_type) else {
            let error = format!("no handler for node type '{}'", node.node_type);
            return self.fail_node(execution_id, node, &error).await;
        };

        let running_state = self
            .store
            .get(execution_id)
            .await?
            .ok_or_else(|| EngineError::Execution(format!("unknown execution {execution_id}")))?;
        let exec_count = running_state.exec_count(&node.id);
        let context = ExecutionContextView::new(
            Arc::new(running_state),
            self.services.clone(),
            node.id.clone(),
            cancel.clone(),
        );

        tracing::debug!(
            execution_id = %execution_id,
            node_id = %node.id,
            node_type = %node.node_type,
            attempt = exec_count,
            "executing node"
        );

        let invocation = handler.execute(node, inputs, self.services.clone(), context);
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            outcome = tokio::time::timeout(self.node_timeout, invocation) => match outcome {
                Ok(inner) => inner,
                Err(_) => Err(EngineError::timeout(
                    format!("node '{}'", node.id),
                    self.node_timeout,
                )),
            },
        };

        match result {
            Ok(output) => {
                self.complete_node(execution_id, node, exec_count, output).await
            }
            Err(EngineError::Cancelled) => {
                // Abandon the in-flight output; the engine transitions the
                // execution itself.
                tracing::debug!(execution_id = %execution_id, node_id = %node.id, "node cancelled");
                Ok(NodeOutcome::Cancelled)
            }
            Err(e) => self.fail_node(execution_id, node, &e.to_string()).await,
        }
    }

    async fn complete_node(
        &self,
        execution_id: &str,
        node: &Node,
        exec_count: u32,
        output: dipeo_state::NodeOutput,
    ) -> Result<NodeOutcome> {
        let is_iterative = node.node_type == NodeType::PersonJob;
        let at_cap = node
            .max_iteration()
            .map(|cap| exec_count >= cap)
            .unwrap_or(false);
        let maxiter_skip = at_cap && output.skipped_because("max iteration");

        self.store
            .update_node_output(execution_id, &node.id, output)
            .await?;
        if maxiter_skip {
            self.store
                .update_node_status(execution_id, &node.id, NodeStatus::MaxiterReached, None)
                .await?;
        }

        let state = self
            .store
            .get(execution_id)
            .await?
            .ok_or_else(|| EngineError::Execution(format!("unknown execution {execution_id}")))?;
        if let Some(node_state) = state.node_state(&node.id) {
            self.bus
                .publish(ExecutionEvent::node_completed(
                    execution_id,
                    &node.id,
                    node.node_type.as_str(),
                    node_state,
                    state.node_output(&node.id),
                ))
                .await?;
        }

        // Loop reset: downstream completed nodes inside a feedback cycle
        // return to PENDING so they can re-fire.
        let flow = FlowController::new(&self.diagram, self.max_iterations);
        for reset_id in flow.downstream_resets(&node.id, &state) {
            self.store.reset_node(execution_id, &reset_id).await?;
            self.bus
                .publish(ExecutionEvent::node_status_changed(
                    execution_id,
                    &reset_id,
                    NodeStatus::Pending,
                ))
                .await?;
        }

        // An iterative node below its cap goes straight back to PENDING
        // for the next lap; its stored output survives for the resolver.
        if is_iterative && !at_cap {
            self.store
                .reset_node_for_iteration(execution_id, &node.id)
                .await?;
        }

        Ok(NodeOutcome::Completed)
    }

    async fn fail_node(
        &self,
        execution_id: &str,
        node: &Node,
        error: &str,
    ) -> Result<NodeOutcome> {
        tracing::warn!(
            execution_id = %execution_id,
            node_id = %node.id,
            error = %error,
            "node failed"
        );
        self.store
            .update_node_status(
                execution_id,
                &node.id,
                NodeStatus::Failed,
                Some(error.to_string()),
            )
            .await?;
        self.bus
            .publish(ExecutionEvent::node_error(
                execution_id,
                &node.id,
                node.node_type.as_str(),
                error,
            ))
            .await?;
        Ok(NodeOutcome::Failed)
    }
}
