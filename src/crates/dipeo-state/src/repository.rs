//! Persistent storage trait for execution state
//!
//! [`StateRepository`] is the abstraction over the durable tier of the
//! state store. Implementations can back it with any storage system
//! (SQLite, PostgreSQL, Redis, object storage); the crate ships an
//! in-memory reference implementation in [`crate::memory`].
//!
//! Repository writes are whole-record snapshots: `save` replaces the
//! persisted record for an execution atomically, so a crashed process can
//! never observe a torn record — it sees either the previous snapshot or
//! the new one.

use crate::error::Result;
use crate::execution::{ExecutionState, ExecutionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Filter for [`StateRepository::list`]
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    /// Only executions of this diagram
    pub diagram_id: Option<String>,
    /// Only executions in this status
    pub status: Option<ExecutionStatus>,
    /// Maximum number of records to return
    pub limit: usize,
    /// Records to skip (for pagination)
    pub offset: usize,
}

impl ExecutionFilter {
    pub fn new() -> Self {
        Self {
            diagram_id: None,
            status: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_diagram_id(mut self, diagram_id: impl Into<String>) -> Self {
        self.diagram_id = Some(diagram_id.into());
        self
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// Durable storage backend for execution state
///
/// Implementations must be thread-safe (`Send + Sync`); the store calls
/// them concurrently from the flusher task and from request paths.
#[async_trait]
pub trait StateRepository: Send + Sync {
    /// Persist a whole-state snapshot, replacing any previous record
    async fn save(&self, state: &ExecutionState) -> Result<()>;

    /// Load the persisted snapshot for an execution, if any
    async fn load(&self, execution_id: &str) -> Result<Option<ExecutionState>>;

    /// List persisted executions matching the filter, newest first
    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionState>>;

    /// Delete the record for one execution
    async fn delete(&self, execution_id: &str) -> Result<()>;

    /// Delete all records whose execution started before the cutoff.
    /// Returns the number of deleted records.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
