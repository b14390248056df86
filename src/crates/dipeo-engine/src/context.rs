//! Read-only execution context handed to node handlers
//!
//! Handlers observe execution state through [`ExecutionContextView`], a
//! snapshot taken just before the handler runs. It exposes lookups only —
//! there is no mutation surface; a handler that wants to change state
//! returns the change in its `NodeOutput`.

use crate::engine::CancelToken;
use crate::registry::ServiceRegistry;
use dipeo_state::{ExecutionState, NodeOutput};
use std::any::Any;
use std::sync::Arc;

/// Immutable view over one execution, scoped to the current node
#[derive(Clone)]
pub struct ExecutionContextView {
    state: Arc<ExecutionState>,
    services: Arc<ServiceRegistry>,
    current_node_id: String,
    cancel: CancelToken,
}

impl ExecutionContextView {
    pub fn new(
        state: Arc<ExecutionState>,
        services: Arc<ServiceRegistry>,
        current_node_id: impl Into<String>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            state,
            services,
            current_node_id: current_node_id.into(),
            cancel,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.state.id
    }

    pub fn diagram_id(&self) -> Option<&str> {
        self.state.diagram_id.as_deref()
    }

    pub fn current_node_id(&self) -> &str {
        &self.current_node_id
    }

    /// Last stored output of any node in this execution
    pub fn node_output(&self, node_id: &str) -> Option<&NodeOutput> {
        self.state.node_output(node_id)
    }

    /// Execution variable by key
    pub fn variable(&self, key: &str) -> Option<&serde_json::Value> {
        self.state.variables.get(key)
    }

    /// How many times a node has entered `RUNNING`
    pub fn node_execution_count(&self, node_id: &str) -> u32 {
        self.state.exec_count(node_id)
    }

    /// Look up a bootstrap-registered service by key
    pub fn service<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.services.get(key)
    }

    /// Cooperative cancellation: long-running handlers should poll this
    /// (or await [`CancelToken::cancelled`]) and bail out early
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}
