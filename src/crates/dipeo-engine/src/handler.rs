//! Node handler contract and registry
//!
//! Handlers are the engine's only call-out to external code. The engine
//! resolves a handler by node type, hands it the node, the resolved input
//! bundle, the service registry, and a read-only context view, and expects
//! either a [`NodeOutput`] back or a failure value. Handlers never touch
//! execution state directly — any would-be mutation is re-expressed as the
//! returned output.

use crate::context::ExecutionContextView;
use crate::diagram::{Node, NodeType};
use crate::error::Result;
use crate::registry::ServiceRegistry;
use crate::resolver::Inputs;
use async_trait::async_trait;
use dipeo_state::NodeOutput;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A unit-of-work implementation for one node type
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(
        &self,
        node: &Node,
        inputs: Inputs,
        services: Arc<ServiceRegistry>,
        context: ExecutionContextView,
    ) -> Result<NodeOutput>;
}

type HandlerFn = Arc<
    dyn Fn(
            Node,
            Inputs,
            Arc<ServiceRegistry>,
            ExecutionContextView,
        ) -> Pin<Box<dyn Future<Output = Result<NodeOutput>> + Send>>
        + Send
        + Sync,
>;

/// Adapter turning an async closure into a [`NodeHandler`]
///
/// ```rust,ignore
/// let handler = FnHandler::new(|node, inputs, _services, _ctx| {
///     Box::pin(async move {
///         Ok(NodeOutput::with_default(&node.id, serde_json::json!({"ok": true})))
///     })
/// });
/// ```
pub struct FnHandler {
    f: HandlerFn,
}

impl FnHandler {
    pub fn new<F>(f: F) -> Arc<Self>
    where
        F: Fn(
                Node,
                Inputs,
                Arc<ServiceRegistry>,
                ExecutionContextView,
            ) -> Pin<Box<dyn Future<Output = Result<NodeOutput>> + Send>>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self { f: Arc::new(f) })
    }
}

#[async_trait]
impl NodeHandler for FnHandler {
    async fn execute(
        &self,
        node: &Node,
        inputs: Inputs,
        services: Arc<ServiceRegistry>,
        context: ExecutionContextView,
    ) -> Result<NodeOutput> {
        (self.f)(node.clone(), inputs, services, context).await
    }
}

/// Registry mapping node types to their handlers
///
/// Populated at bootstrap; the engine looks handlers up per node execution
/// and reports a missing registration as a node failure, not a panic.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<NodeType, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node_type: NodeType, handler: Arc<dyn NodeHandler>) -> &mut Self {
        self.handlers.insert(node_type, handler);
        self
    }

    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(&node_type).cloned()
    }

    pub fn contains(&self, node_type: NodeType) -> bool {
        self.handlers.contains_key(&node_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        let handler = FnHandler::new(|node, _inputs, _services, _ctx| {
            Box::pin(async move { Ok(NodeOutput::with_default(&node.id, serde_json::json!(1))) })
        });
        registry.register(NodeType::CodeJob, handler);

        assert!(registry.contains(NodeType::CodeJob));
        assert!(!registry.contains(NodeType::ApiJob));
        assert!(registry.get(NodeType::CodeJob).is_some());
    }
}
