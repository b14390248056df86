//! Execution state data model
//!
//! This module defines the per-execution mutable record tracked by the
//! engine: node states, node outputs, execution counts, variables, and
//! aggregate token usage. All mutation goes through the transition methods
//! on [`ExecutionState`], which enforce the engine's state-machine rules:
//!
//! - a node only moves `PENDING → RUNNING → {COMPLETED, FAILED,
//!   MAXITER_REACHED}`; re-entry to `PENDING` happens only through
//!   [`ExecutionState::reset_node`]
//! - `exec_counts` increments exactly when a node enters `RUNNING`
//! - `executed_nodes` preserves completion order, with duplicates for
//!   iterative nodes
//! - aggregate token usage is the sum of per-node usage
//!
//! All types serialize with serde; status enums use the SCREAMING_SNAKE
//! wire spelling (`PENDING`, `MAXITER_REACHED`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Overall status of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Status of one node within an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    MaxiterReached,
}

/// Token usage accounting for LLM-backed nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    #[serde(default)]
    pub cached: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            cached: 0,
            total: input + output,
        }
    }

    /// Fold another usage record into this one
    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.cached += other.cached;
        self.total += other.total;
    }
}

/// Output produced by one node completion
///
/// `value` maps output handle names to payloads. Ordinary nodes write under
/// `"default"` (plus any named outputs); a condition node writes under
/// exactly one of `"condtrue"` / `"condfalse"`. `metadata` carries
/// provenance such as token usage, the evaluated condition result, or
/// skipped/reason flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    pub value: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_nodes: Option<Vec<String>>,
}

impl NodeOutput {
    /// Wrap a single payload under the `default` handle
    pub fn with_default(node_id: impl Into<String>, value: serde_json::Value) -> Self {
        let mut map = serde_json::Map::new();
        map.insert("default".to_string(), value);
        Self {
            value: map,
            metadata: None,
            node_id: node_id.into(),
            executed_nodes: None,
        }
    }

    /// Output for a condition node: the payload lives under the branch
    /// that was taken (`condtrue` or `condfalse`) and the evaluated
    /// result is recorded in metadata.
    pub fn condition(node_id: impl Into<String>, result: bool, value: serde_json::Value) -> Self {
        let branch = if result { "condtrue" } else { "condfalse" };
        let mut map = serde_json::Map::new();
        map.insert(branch.to_string(), value);
        let mut metadata = serde_json::Map::new();
        metadata.insert("condition_result".to_string(), serde_json::Value::Bool(result));
        Self {
            value: map,
            metadata: Some(metadata),
            node_id: node_id.into(),
            executed_nodes: None,
        }
    }

    /// Attach a metadata field, creating the map if needed
    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }

    /// Payload under a specific handle
    pub fn get(&self, handle: &str) -> Option<&serde_json::Value> {
        self.value.get(handle)
    }

    /// The branch a condition output was produced under, if any
    pub fn branch(&self) -> Option<&str> {
        if self.value.contains_key("condtrue") {
            Some("condtrue")
        } else if self.value.contains_key("condfalse") {
            Some("condfalse")
        } else {
            None
        }
    }

    /// Evaluated condition result from metadata
    pub fn condition_result(&self) -> Option<bool> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("condition_result"))
            .and_then(|v| v.as_bool())
    }

    /// Token usage recorded in metadata, if the handler reported any
    pub fn token_usage(&self) -> Option<TokenUsage> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("token_usage"))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// True when metadata marks this output as a skip with the given reason
    /// fragment (used by the max-iteration completion protocol)
    pub fn skipped_because(&self, reason_fragment: &str) -> bool {
        let Some(meta) = &self.metadata else {
            return false;
        };
        let skipped = meta.get("skipped").and_then(|v| v.as_bool()).unwrap_or(false);
        if !skipped {
            return false;
        }
        meta.get("reason")
            .and_then(|v| v.as_str())
            .map(|r| r.to_ascii_lowercase().contains(&reason_fragment.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}

/// State of one node within an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

impl NodeState {
    pub fn pending() -> Self {
        Self {
            status: NodeStatus::Pending,
            started_at: None,
            ended_at: None,
            error: None,
            token_usage: None,
        }
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::pending()
    }
}

/// The per-execution mutable record
///
/// Owned exclusively by its execution; all mutation funnels through the
/// state store. Handlers only ever see read-only views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_id: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub node_states: HashMap<String, NodeState>,
    pub node_outputs: HashMap<String, NodeOutput>,
    pub exec_counts: HashMap<String, u32>,
    pub executed_nodes: Vec<String>,
    pub variables: HashMap<String, serde_json::Value>,
    pub token_usage: TokenUsage,
    pub is_active: bool,
}

impl ExecutionState {
    pub fn new(id: String, diagram_id: Option<String>) -> Self {
        Self {
            id,
            diagram_id,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
            node_states: HashMap::new(),
            node_outputs: HashMap::new(),
            exec_counts: HashMap::new(),
            executed_nodes: Vec::new(),
            variables: HashMap::new(),
            token_usage: TokenUsage::default(),
            is_active: true,
        }
    }

    /// Seed every diagram node as `PENDING`
    pub fn seed_nodes<I, S>(&mut self, node_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in node_ids {
            self.node_states.entry(id.into()).or_insert_with(NodeState::pending);
        }
    }

    pub fn node_state(&self, node_id: &str) -> Option<&NodeState> {
        self.node_states.get(node_id)
    }

    pub fn node_status(&self, node_id: &str) -> NodeStatus {
        self.node_states
            .get(node_id)
            .map(|s| s.status)
            .unwrap_or(NodeStatus::Pending)
    }

    pub fn node_output(&self, node_id: &str) -> Option<&NodeOutput> {
        self.node_outputs.get(node_id)
    }

    pub fn exec_count(&self, node_id: &str) -> u32 {
        self.exec_counts.get(node_id).copied().unwrap_or(0)
    }

    pub fn any_node_running(&self) -> bool {
        self.node_states
            .values()
            .any(|s| s.status == NodeStatus::Running)
    }

    /// Move a node into `RUNNING`, incrementing its execution count
    pub fn transition_running(&mut self, node_id: &str) {
        let state = self
            .node_states
            .entry(node_id.to_string())
            .or_insert_with(NodeState::pending);
        state.status = NodeStatus::Running;
        state.started_at = Some(Utc::now());
        state.ended_at = None;
        state.error = None;
        *self.exec_counts.entry(node_id.to_string()).or_insert(0) += 1;
    }

    /// Complete a node, recording its output and folding token usage
    pub fn transition_completed(&mut self, node_id: &str, output: Option<NodeOutput>) {
        let tokens = output.as_ref().and_then(|o| o.token_usage());
        let state = self
            .node_states
            .entry(node_id.to_string())
            .or_insert_with(NodeState::pending);
        state.status = NodeStatus::Completed;
        state.ended_at = Some(Utc::now());
        state.error = None;
        state.token_usage = tokens;
        if let Some(t) = tokens {
            self.token_usage.add(&t);
        }
        if let Some(out) = output {
            self.node_outputs.insert(node_id.to_string(), out);
        }
        self.executed_nodes.push(node_id.to_string());
    }

    /// Fail a node with an error message
    pub fn transition_failed(&mut self, node_id: &str, error: impl Into<String>) {
        let state = self
            .node_states
            .entry(node_id.to_string())
            .or_insert_with(NodeState::pending);
        state.status = NodeStatus::Failed;
        state.ended_at = Some(Utc::now());
        state.error = Some(error.into());
    }

    /// Terminal status for an iterative node that hit its iteration cap
    pub fn transition_maxiter(&mut self, node_id: &str) {
        let state = self
            .node_states
            .entry(node_id.to_string())
            .or_insert_with(NodeState::pending);
        state.status = NodeStatus::MaxiterReached;
        state.ended_at = Some(Utc::now());
    }

    /// Loop reset: return a node to `PENDING` and clear its stored output.
    /// Only the engine calls this; handlers never reset nodes.
    pub fn reset_node(&mut self, node_id: &str) {
        self.reset_status(node_id);
        self.node_outputs.remove(node_id);
    }

    /// Iteration reset for a node below its cap: back to `PENDING`, but the
    /// lap's output stays stored so downstream consumers can still read it
    pub fn reset_for_iteration(&mut self, node_id: &str) {
        self.reset_status(node_id);
    }

    fn reset_status(&mut self, node_id: &str) {
        let state = self
            .node_states
            .entry(node_id.to_string())
            .or_insert_with(NodeState::pending);
        state.status = NodeStatus::Pending;
        state.started_at = None;
        state.ended_at = None;
        state.error = None;
    }

    /// Move the execution itself between statuses
    pub fn transition_status(&mut self, status: ExecutionStatus, error: Option<String>) {
        self.status = status;
        if let Some(e) = error {
            self.error = Some(e);
        }
        if status.is_terminal() {
            self.ended_at = Some(Utc::now());
            self.is_active = false;
        } else if status == ExecutionStatus::Running {
            self.is_active = true;
        }
    }
}
