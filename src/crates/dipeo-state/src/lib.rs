//! # dipeo-state - Execution State Model and Cache-First Store
//!
//! State persistence layer for the DiPeO execution engine. This crate owns
//! the per-execution mutable record ([`ExecutionState`]) and the two-tier
//! store that keeps it durable:
//!
//! ```text
//!           engine mutations
//!                 │
//!                 ▼
//!        ┌─────────────────┐   write-through (create, status changes)
//!        │    StateStore   │──────────────────────────┐
//!        └────────┬────────┘                          │
//!                 │ hot path                          ▼
//!        ┌────────┴────────┐                ┌──────────────────┐
//!        │  ExecutionCache │                │ StateRepository  │
//!        │  hot LRU + warm │── checkpoint ─▶│ (pluggable, e.g. │
//!        └─────────────────┘   (count/delay)│  in-memory, SQL) │
//!                                           └──────────────────┘
//! ```
//!
//! Storage backends implement [`StateRepository`]; the in-memory reference
//! implementation lives in [`memory`]. Records are persisted as whole-state
//! snapshots through a [`SerializerProtocol`], so crash recovery never sees
//! a torn record. On restart, [`StateStore::recover_orphaned`] applies the
//! crash-safety floor: anything still `RUNNING` in the backend is marked
//! `FAILED("orphaned")`.

pub mod cache;
pub mod error;
pub mod execution;
pub mod memory;
pub mod repository;
pub mod serializer;
pub mod store;

pub use cache::ExecutionCache;
pub use error::{Result, StateError};
pub use execution::{
    ExecutionState, ExecutionStatus, NodeOutput, NodeState, NodeStatus, TokenUsage,
};
pub use memory::InMemoryStateRepository;
pub use repository::{ExecutionFilter, StateRepository};
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use store::{StateStore, StoreSettings};
