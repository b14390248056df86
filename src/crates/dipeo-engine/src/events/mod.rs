//! Execution event taxonomy and pub/sub plumbing
//!
//! Every observable state transition in the engine becomes an
//! [`ExecutionEvent`] published on the [`EventBus`](bus::EventBus). The
//! taxonomy is wire-visible: event types and payload fields serialize in
//! the SCREAMING_SNAKE spelling streaming clients expect.

pub mod bus;
pub mod store;

use chrono::{DateTime, Utc};
use dipeo_state::{NodeState, NodeStatus, TokenUsage};
use serde::{Deserialize, Serialize};

/// Wire-visible event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    ExecutionStarted,
    ExecutionStatusChanged,
    ExecutionCompleted,
    ExecutionError,
    NodeStarted,
    NodeStatusChanged,
    NodeCompleted,
    NodeError,
    ExecutionLog,
}

/// One observable engine event
///
/// Node events additionally carry `node_id`, `node_type`, and `status`;
/// everything else rides in `data` (outputs, errors, token usage, log
/// lines).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub execution_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ExecutionEvent {
    pub fn new(event_type: EventType, execution_id: impl Into<String>) -> Self {
        Self {
            event_type,
            execution_id: execution_id.into(),
            timestamp: Utc::now(),
            node_id: None,
            node_type: None,
            status: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn execution_started(execution_id: &str, diagram_id: Option<&str>) -> Self {
        Self::new(EventType::ExecutionStarted, execution_id).with_data(serde_json::json!({
            "diagram_id": diagram_id,
        }))
    }

    pub fn execution_completed(execution_id: &str, token_usage: &TokenUsage) -> Self {
        let mut event = Self::new(EventType::ExecutionCompleted, execution_id).with_data(
            serde_json::json!({
                "token_usage": token_usage,
            }),
        );
        event.status = Some("COMPLETED".to_string());
        event
    }

    pub fn execution_error(execution_id: &str, error: &str) -> Self {
        let mut event = Self::new(EventType::ExecutionError, execution_id)
            .with_data(serde_json::json!({ "error": error }));
        event.status = Some("FAILED".to_string());
        event
    }

    pub fn execution_status_changed(execution_id: &str, status: &str) -> Self {
        let mut event = Self::new(EventType::ExecutionStatusChanged, execution_id);
        event.status = Some(status.to_string());
        event
    }

    pub fn node_started(execution_id: &str, node_id: &str, node_type: &str) -> Self {
        let mut event = Self::new(EventType::NodeStarted, execution_id);
        event.node_id = Some(node_id.to_string());
        event.node_type = Some(node_type.to_string());
        event.status = Some(status_str(NodeStatus::Running).to_string());
        event
    }

    pub fn node_completed(
        execution_id: &str,
        node_id: &str,
        node_type: &str,
        node_state: &NodeState,
        output: Option<&dipeo_state::NodeOutput>,
    ) -> Self {
        let mut event = Self::new(EventType::NodeCompleted, execution_id).with_data(
            serde_json::json!({
                "output": output,
                "started_at": node_state.started_at,
                "ended_at": node_state.ended_at,
                "token_usage": node_state.token_usage,
            }),
        );
        event.node_id = Some(node_id.to_string());
        event.node_type = Some(node_type.to_string());
        event.status = Some(status_str(node_state.status).to_string());
        event
    }

    pub fn node_error(execution_id: &str, node_id: &str, node_type: &str, error: &str) -> Self {
        let mut event = Self::new(EventType::NodeError, execution_id)
            .with_data(serde_json::json!({ "error": error }));
        event.node_id = Some(node_id.to_string());
        event.node_type = Some(node_type.to_string());
        event.status = Some(status_str(NodeStatus::Failed).to_string());
        event
    }

    pub fn node_status_changed(execution_id: &str, node_id: &str, status: NodeStatus) -> Self {
        let mut event = Self::new(EventType::NodeStatusChanged, execution_id);
        event.node_id = Some(node_id.to_string());
        event.status = Some(status_str(status).to_string());
        event
    }

    pub fn execution_log(execution_id: &str, level: &str, message: &str) -> Self {
        Self::new(EventType::ExecutionLog, execution_id).with_data(serde_json::json!({
            "level": level,
            "message": message,
        }))
    }
}

fn status_str(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::Pending => "PENDING",
        NodeStatus::Running => "RUNNING",
        NodeStatus::Completed => "COMPLETED",
        NodeStatus::Failed => "FAILED",
        NodeStatus::MaxiterReached => "MAXITER_REACHED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&EventType::ExecutionStarted).unwrap(),
            "\"EXECUTION_STARTED\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::NodeError).unwrap(),
            "\"NODE_ERROR\""
        );
    }

    #[test]
    fn test_node_event_fields() {
        let event = ExecutionEvent::node_started("e1", "n1", "code_job");
        assert_eq!(event.execution_id, "e1");
        assert_eq!(event.node_id.as_deref(), Some("n1"));
        assert_eq!(event.node_type.as_deref(), Some("code_job"));
        assert_eq!(event.status.as_deref(), Some("RUNNING"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "NODE_STARTED");
    }
}
