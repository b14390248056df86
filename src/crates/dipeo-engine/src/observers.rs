//! Observer adapters: bridging engine events to external sinks
//!
//! Three built-in shapes:
//!
//! - [`StreamingObserver`] owns its per-execution subscriber queues and
//!   formats events into SSE-ready frames, closing streams on completion.
//!   Used for direct CLI/browser streaming without a shared router.
//! - [`RouterObserver`] delegates fan-out to a shared [`MessageRouter`],
//!   the shape used when several API surfaces consume one event feed.
//! - [`StatePersistenceHandler`] subscribes at **Low** priority and turns
//!   lifecycle events into persistence actions, so user-visible handlers
//!   observe every event before state hits the backend. Its
//!   [`replay`](StatePersistenceHandler::replay) rebuilds a state record
//!   from a recorded event log.
//!
//! External observers implement [`ExecutionObserver`] and ride the bus
//! through [`ObserverBridge`]. Observer metadata controls how observers
//! propagate into sub-diagram child executions.

use crate::error::Result;
use crate::events::{bus::EventHandler, EventType, ExecutionEvent};
use crate::router::{MessageRouter, RouterSettings, Subscription};
use async_trait::async_trait;
use dipeo_state::{ExecutionStatus, NodeOutput, NodeStatus, StateStore};
use std::sync::Arc;

/// How an observer behaves across execution boundaries
#[derive(Debug, Clone)]
pub struct ObserverMetadata {
    /// Child (sub-diagram) executions inherit this observer
    pub propagate_to_sub: bool,
    /// Only observe the execution the observer was attached to
    pub scope_to_execution: bool,
    /// When set, only these event types are delivered
    pub filter_events: Option<Vec<EventType>>,
}

impl Default for ObserverMetadata {
    fn default() -> Self {
        Self {
            propagate_to_sub: true,
            scope_to_execution: false,
            filter_events: None,
        }
    }
}

impl ObserverMetadata {
    fn wants(&self, event_type: EventType) -> bool {
        match &self.filter_events {
            Some(types) => types.contains(&event_type),
            None => true,
        }
    }
}

/// Callback-style observer for engine lifecycle moments
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
    fn metadata(&self) -> ObserverMetadata {
        ObserverMetadata::default()
    }

    async fn on_execution_start(&self, _execution_id: &str, _diagram_id: Option<&str>) {}
    async fn on_node_start(&self, _execution_id: &str, _node_id: &str) {}
    async fn on_node_complete(&self, _execution_id: &str, _node_id: &str, _status: &str) {}
    async fn on_node_error(&self, _execution_id: &str, _node_id: &str, _error: &str) {}
    async fn on_execution_complete(&self, _execution_id: &str) {}
    async fn on_execution_error(&self, _execution_id: &str, _error: &str) {}
}

/// Adapts [`ExecutionObserver`] implementations onto the event bus
pub struct ObserverBridge {
    observers: Vec<Arc<dyn ExecutionObserver>>,
}

impl ObserverBridge {
    pub fn new(observers: Vec<Arc<dyn ExecutionObserver>>) -> Self {
        Self { observers }
    }
}

#[async_trait]
impl EventHandler for ObserverBridge {
    fn name(&self) -> &str {
        "observer_bridge"
    }

    async fn handle(&self, event: &ExecutionEvent) -> Result<()> {
        for observer in &self.observers {
            if !observer.metadata().wants(event.event_type) {
                continue;
            }
            let execution_id = event.execution_id.as_str();
            match event.event_type {
                EventType::ExecutionStarted => {
                    let diagram_id = event.data.get("diagram_id").and_then(|v| v.as_str());
                    observer.on_execution_start(execution_id, diagram_id).await;
                }
                EventType::NodeStarted => {
                    if let Some(node_id) = event.node_id.as_deref() {
                        observer.on_node_start(execution_id, node_id).await;
                    }
                }
                EventType::NodeCompleted => {
                    if let Some(node_id) = event.node_id.as_deref() {
                        let status = event.status.as_deref().unwrap_or("COMPLETED");
                        observer.on_node_complete(execution_id, node_id, status).await;
                    }
                }
                EventType::NodeError => {
                    if let Some(node_id) = event.node_id.as_deref() {
                        let error = event
                            .data
                            .get("error")
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown");
                        observer.on_node_error(execution_id, node_id, error).await;
                    }
                }
                EventType::ExecutionCompleted => {
                    observer.on_execution_complete(execution_id).await;
                }
                EventType::ExecutionError => {
                    let error = event
                        .data
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    observer.on_execution_error(execution_id, error).await;
                }
                EventType::ExecutionStatusChanged
                | EventType::NodeStatusChanged
                | EventType::ExecutionLog => {}
            }
        }
        Ok(())
    }
}

/// Streams events straight to subscribers it manages itself
///
/// Each execution gets its own set of bounded queues; frames are the same
/// SSE-ready [`StreamFrame`](crate::router::StreamFrame)s the router
/// produces, and the terminal event closes every stream for the execution.
pub struct StreamingObserver {
    router: MessageRouter,
    metadata: ObserverMetadata,
}

impl StreamingObserver {
    pub fn new(settings: RouterSettings) -> Self {
        Self {
            router: MessageRouter::new(settings),
            metadata: ObserverMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: ObserverMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn metadata(&self) -> &ObserverMetadata {
        &self.metadata
    }

    /// Open a stream of frames for one execution
    pub async fn subscribe(&self, execution_id: &str) -> Subscription {
        self.router.subscribe(execution_id).await
    }
}

#[async_trait]
impl EventHandler for StreamingObserver {
    fn name(&self) -> &str {
        "streaming_observer"
    }

    async fn handle(&self, event: &ExecutionEvent) -> Result<()> {
        if !self.metadata.wants(event.event_type) {
            return Ok(());
        }
        let execution_id = event.execution_id.clone();
        let terminal = matches!(
            event.event_type,
            EventType::ExecutionCompleted | EventType::ExecutionError
        );
        self.router
            .broadcast_to_execution(&execution_id, event.clone())
            .await;
        if terminal {
            self.router.complete_execution(&execution_id).await;
        }
        Ok(())
    }
}

/// Publishes events into a shared [`MessageRouter`]
pub struct RouterObserver {
    router: Arc<MessageRouter>,
    metadata: ObserverMetadata,
}

impl RouterObserver {
    pub fn new(router: Arc<MessageRouter>) -> Self {
        Self {
            router,
            metadata: ObserverMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: ObserverMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[async_trait]
impl EventHandler for RouterObserver {
    fn name(&self) -> &str {
        "router_observer"
    }

    async fn handle(&self, event: &ExecutionEvent) -> Result<()> {
        if !self.metadata.wants(event.event_type) {
            return Ok(());
        }
        let terminal = matches!(
            event.event_type,
            EventType::ExecutionCompleted | EventType::ExecutionError
        );
        self.router
            .broadcast_to_execution(&event.execution_id, event.clone())
            .await;
        if terminal {
            self.router.complete_execution(&event.execution_id).await;
        }
        Ok(())
    }
}

/// Low-priority persistence tap
///
/// Register with [`EventPriority::Low`](crate::events::bus::EventPriority)
/// so streaming handlers see each event before state is persisted. Node
/// mutations are already checkpoint-enqueued by the store; this handler
/// forces a synchronous flush at the lifecycle moments the crash-safety
/// contract cares about.
pub struct StatePersistenceHandler {
    store: StateStore,
}

impl StatePersistenceHandler {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Rebuild execution state by replaying a recorded event log into a
    /// fresh store. Replaying a log from scratch always yields the same
    /// record, so persisted events can reconstruct a lost state.
    pub async fn replay(store: &StateStore, events: &[ExecutionEvent]) -> Result<()> {
        for event in events {
            let execution_id = event.execution_id.as_str();
            match event.event_type {
                EventType::ExecutionStarted => {
                    let diagram_id = event
                        .data
                        .get("diagram_id")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                    if store.get(execution_id).await?.is_none() {
                        store
                            .create(execution_id, diagram_id, Default::default(), Vec::new())
                            .await?;
                    }
                    store
                        .update_status(execution_id, ExecutionStatus::Running, None)
                        .await?;
                }
                EventType::NodeStarted => {
                    if let Some(node_id) = event.node_id.as_deref() {
                        store
                            .update_node_status(execution_id, node_id, NodeStatus::Running, None)
                            .await?;
                    }
                }
                EventType::NodeCompleted => {
                    if let Some(node_id) = event.node_id.as_deref() {
                        let output: Option<NodeOutput> = event
                            .data
                            .get("output")
                            .filter(|v| !v.is_null())
                            .and_then(|v| serde_json::from_value(v.clone()).ok());
                        match output {
                            Some(output) => {
                                store.update_node_output(execution_id, node_id, output).await?
                            }
                            None => {
                                store
                                    .update_node_status(
                                        execution_id,
                                        node_id,
                                        NodeStatus::Completed,
                                        None,
                                    )
                                    .await?
                            }
                        }
                        if event.status.as_deref() == Some("MAXITER_REACHED") {
                            store
                                .update_node_status(
                                    execution_id,
                                    node_id,
                                    NodeStatus::MaxiterReached,
                                    None,
                                )
                                .await?;
                        }
                    }
                }
                EventType::NodeError => {
                    if let Some(node_id) = event.node_id.as_deref() {
                        let error = event
                            .data
                            .get("error")
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown")
                            .to_string();
                        store
                            .update_node_status(
                                execution_id,
                                node_id,
                                NodeStatus::Failed,
                                Some(error),
                            )
                            .await?;
                    }
                }
                EventType::NodeStatusChanged => {
                    if let (Some(node_id), Some("PENDING")) =
                        (event.node_id.as_deref(), event.status.as_deref())
                    {
                        store
                            .update_node_status(execution_id, node_id, NodeStatus::Pending, None)
                            .await?;
                    }
                }
                EventType::ExecutionCompleted => {
                    store
                        .update_status(execution_id, ExecutionStatus::Completed, None)
                        .await?;
                }
                EventType::ExecutionError => {
                    let error = event
                        .data
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown")
                        .to_string();
                    let status = if error == "cancelled" {
                        ExecutionStatus::Cancelled
                    } else {
                        ExecutionStatus::Failed
                    };
                    store.update_status(execution_id, status, Some(error)).await?;
                }
                EventType::ExecutionStatusChanged | EventType::ExecutionLog => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for StatePersistenceHandler {
    fn name(&self) -> &str {
        "state_persistence"
    }

    async fn handle(&self, event: &ExecutionEvent) -> Result<()> {
        match event.event_type {
            EventType::ExecutionStarted
            | EventType::ExecutionCompleted
            | EventType::ExecutionError => {
                self.store.flush(&event.execution_id).await?;
            }
            // Node transitions ride the store's own checkpoint cadence
            _ => {}
        }
        Ok(())
    }
}
