//! # dipeo-engine - Diagram Execution Runtime
//!
//! Executes *diagrams*: directed graphs whose nodes are units of work (LLM
//! calls, code execution, HTTP requests, file I/O, conditionals,
//! endpoints) and whose edges carry typed data between named handles.
//! Diagrams may contain cycles — loops are first-class — so scheduling is
//! readiness over mutable state rather than a precomputed order.
//!
//! ## Architecture
//!
//! ```text
//!            ┌────────────────────────────────────┐
//!            │          ExecutionEngine           │
//!            │  create state · emit events ·      │
//!            │  classify terminal status          │
//!            └───────┬────────────────┬───────────┘
//!                    │                │
//!        ┌───────────▼─────┐   ┌──────▼──────────┐
//!        │ ExecutionIterator│   │    EventBus     │──▶ handlers by priority
//!        │  batches of ready│   │  bounded queue, │──▶ MessageRouter → SSE
//!        │  nodes per step  │   │  back-pressure  │──▶ StatePersistence
//!        └───────────┬─────┘   └─────────────────┘
//!                    │ semaphore-bounded fan-out
//!        ┌───────────▼─────┐
//!        │   NodeExecutor  │── resolve inputs (resolver)
//!        │  one node each  │── readiness rules  (flow)
//!        └───────────┬─────┘── handler registry call-out
//!                    │
//!            ┌───────▼────────┐
//!            │   StateStore   │  hot cache + async checkpoints
//!            └────────────────┘  (dipeo-state)
//! ```
//!
//! The engine owns scheduling, input resolution, eventing, and state
//! discipline. Node behavior lives behind [`NodeHandler`]; external
//! services (LLM clients, HTTP, blob stores) live behind the frozen
//! [`ServiceRegistry`]. Handlers get a read-only
//! [`ExecutionContextView`] — all state mutation funnels through the
//! store.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use dipeo_engine::{
//!     Diagram, Node, NodeType, ExecutionEngine, ExecutionOptions,
//!     FnHandler, HandlerRegistry, ServiceRegistry, EngineSettings,
//!     EventBus,
//! };
//! use dipeo_state::{InMemoryStateRepository, NodeOutput, StateStore, StoreSettings};
//! use std::sync::Arc;
//!
//! let mut diagram = Diagram::new();
//! diagram
//!     .add_node(Node::new("in", NodeType::Start))
//!     .add_node(Node::new("work", NodeType::CodeJob))
//!     .add_node(Node::new("out", NodeType::Endpoint))
//!     .connect("in", "work")
//!     .connect("work", "out");
//! let compiled = Arc::new(diagram.compile()?);
//!
//! let mut handlers = HandlerRegistry::new();
//! handlers.register(NodeType::CodeJob, FnHandler::new(|node, inputs, _services, _ctx| {
//!     Box::pin(async move {
//!         Ok(NodeOutput::with_default(&node.id, serde_json::json!({"done": true})))
//!     })
//! }));
//! // ... register start/endpoint handlers ...
//!
//! let store = StateStore::new(Arc::new(InMemoryStateRepository::new()), StoreSettings::default());
//! let engine = ExecutionEngine::new(
//!     store,
//!     EventBus::new(10_000),
//!     Arc::new(handlers),
//!     ServiceRegistry::builder().build(),
//!     EngineSettings::from_env(),
//! );
//! let final_state = engine.execute(compiled, ExecutionOptions::default()).await?;
//! ```

pub mod config;
pub mod context;
pub mod diagram;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod flow;
pub mod handler;
pub mod iterator;
pub mod observers;
pub mod registry;
pub mod resolver;
pub mod router;

// Re-export main types
pub use config::{
    EngineSettings, EventSettings, ExecutionSettings, MessagingSettings, StateSettings,
    StorageBackend, StorageSettings,
};
pub use context::ExecutionContextView;
pub use diagram::{
    compiled::{CompiledDiagram, Diagram},
    ContentType, Edge, EdgeTransform, Node, NodeId, NodeType, CONDFALSE_HANDLE, CONDTRUE_HANDLE,
    DEFAULT_HANDLE, FIRST_HANDLE,
};
pub use engine::{CancelToken, ExecutionEngine, ExecutionOptions};
pub use error::{EngineError, Result};
pub use events::{
    bus::{EventBus, EventHandler, EventPriority, SubscriptionId},
    store::EventStore,
    EventType, ExecutionEvent,
};
pub use executor::{NodeExecutor, NodeOutcome};
pub use flow::FlowController;
pub use handler::{FnHandler, HandlerRegistry, NodeHandler};
pub use iterator::ExecutionIterator;
pub use observers::{
    ExecutionObserver, ObserverBridge, ObserverMetadata, RouterObserver,
    StatePersistenceHandler, StreamingObserver,
};
pub use registry::{keys, ServiceRegistry, ServiceRegistryBuilder};
pub use resolver::{resolve_inputs, Inputs};
pub use router::{MessageRouter, RouterSettings, StreamFrame, Subscription};
