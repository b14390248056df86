//! Error types for diagram execution
//!
//! All engine errors implement `std::error::Error` via `thiserror`. Handler
//! failures are caught once in the node executor and become typed events;
//! they never unwind through the scheduler.

use thiserror::Error;

/// Convenience result type using [`EngineError`]
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while compiling or executing a diagram
#[derive(Error, Debug)]
pub enum EngineError {
    /// Diagram structure validation failed
    ///
    /// Raised at compile time; the engine never starts on a malformed
    /// diagram (missing endpoints, bad handle references, unknown types).
    #[error("Diagram validation failed: {0}")]
    Validation(String),

    /// A node handler returned a failure
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Id of the node that failed
        node: String,
        /// Error message from the handler
        error: String,
    },

    /// No handler registered for a node type
    #[error("No handler registered for node type '{0}'")]
    MissingHandler(String),

    /// Generic execution error without node context
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Scheduler found no ready nodes while work remained
    #[error("Execution deadlocked: {0}")]
    Deadlock(String),

    /// Execution was cancelled externally
    #[error("Execution cancelled")]
    Cancelled,

    /// Operation exceeded its time budget
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out
        operation: String,
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// State store failure
    #[error("State error: {0}")]
    State(#[from] dipeo_state::StateError),

    /// Event bus failure (publish into a closed or poisoned bus)
    #[error("Event bus error: {0}")]
    EventBus(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid engine or environment configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Application-defined error
    #[error("{0}")]
    Custom(String),
}

impl EngineError {
    /// Create a node execution error with context
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create a timeout error for a named operation
    pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_execution_display() {
        let err = EngineError::node_execution("llm_call", "API timeout");
        assert_eq!(
            format!("{}", err),
            "Node 'llm_call' execution failed: API timeout"
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = EngineError::timeout("handler", std::time::Duration::from_secs(2));
        assert_eq!(format!("{}", err), "Operation timed out after 2000ms: handler");
    }
}
