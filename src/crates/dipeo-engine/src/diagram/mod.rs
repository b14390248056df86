//! Diagram data structures and types
//!
//! A diagram is a directed graph whose nodes are units of work (LLM calls,
//! code execution, HTTP requests, file I/O, conditionals, endpoints) and
//! whose edges carry typed data between named handles. Cycles are allowed —
//! they express iteration loops — so the structures here make no DAG
//! assumption.
//!
//! Construction goes through the mutable [`Diagram`] builder, which
//! validates and freezes into a [`CompiledDiagram`](compiled::CompiledDiagram)
//! shared read-only by executions.

pub mod compiled;
pub mod handle;

use serde::{Deserialize, Serialize};

/// Node identifier - unique name for each node in the diagram
pub type NodeId = String;

/// Reserved output handle name for ordinary node payloads
pub const DEFAULT_HANDLE: &str = "default";

/// Reserved input handle wiring the initial seed of an iterative node
pub const FIRST_HANDLE: &str = "first";

/// Output handle a condition node takes when its expression is true
pub const CONDTRUE_HANDLE: &str = "condtrue";

/// Output handle a condition node takes when its expression is false
pub const CONDFALSE_HANDLE: &str = "condfalse";

/// The closed set of node kinds the engine schedules
///
/// The engine itself attaches semantics only to `start`, `person_job`,
/// `condition`, and `endpoint`; every other kind rides the generic handler
/// path and differs only in which handler the registry resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    PersonJob,
    Condition,
    CodeJob,
    ApiJob,
    Db,
    Endpoint,
    UserResponse,
    Hook,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::PersonJob => "person_job",
            Self::Condition => "condition",
            Self::CodeJob => "code_job",
            Self::ApiJob => "api_job",
            Self::Db => "db",
            Self::Endpoint => "endpoint",
            Self::UserResponse => "user_response",
            Self::Hook => "hook",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content type tag carried by an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Plain text payloads (the wire default)
    #[default]
    RawText,
    /// Structured object payloads
    Object,
    /// Conversation state passed through untouched by edge transforms
    ConversationState,
}

/// Declarative value transform applied while an edge delivers a payload
///
/// `extract` walks a dotted key path into an object payload; `wrap` re-keys
/// the result under a field in a fresh object. Extraction runs first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeTransform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap: Option<String>,
}

impl EdgeTransform {
    /// Apply this transform to a payload
    pub fn apply(&self, value: &serde_json::Value) -> serde_json::Value {
        let mut current = value.clone();
        if let Some(path) = &self.extract {
            for key in path.split('.') {
                current = current.get(key).cloned().unwrap_or(serde_json::Value::Null);
            }
        }
        if let Some(field) = &self.wrap {
            let mut map = serde_json::Map::new();
            map.insert(field.clone(), current);
            current = serde_json::Value::Object(map);
        }
        current
    }
}

/// A unit of work in the diagram
///
/// `data` holds the handler's static configuration (prompts, code bodies,
/// iteration caps, file paths); the engine only reads the few fields it
/// schedules by, through the typed accessors below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            label: None,
            data: serde_json::Map::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Iteration cap for iterative nodes
    ///
    /// `person_job` nodes default to 1 when the field is absent; other node
    /// kinds have a cap only when one is declared.
    pub fn max_iteration(&self) -> Option<u32> {
        match self.data.get("max_iteration").and_then(|v| v.as_u64()) {
            Some(n) => Some(n as u32),
            None if self.node_type == NodeType::PersonJob => Some(1),
            None => None,
        }
    }

    pub fn is_start(&self) -> bool {
        self.node_type == NodeType::Start
    }

    pub fn is_endpoint(&self) -> bool {
        self.node_type == NodeType::Endpoint
    }

    pub fn is_condition(&self) -> bool {
        self.node_type == NodeType::Condition
    }
}

/// A typed connection from a source output handle to a target input handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub source_handle: String,
    pub target: NodeId,
    pub target_handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<EdgeTransform>,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_handle: DEFAULT_HANDLE.to_string(),
            target: target.into(),
            target_handle: DEFAULT_HANDLE.to_string(),
            label: None,
            content_type: ContentType::default(),
            transform: None,
        }
    }

    pub fn with_source_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = handle.into();
        self
    }

    pub fn with_target_handle(mut self, handle: impl Into<String>) -> Self {
        self.target_handle = handle.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_transform(mut self, transform: EdgeTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Build an edge from wire-format handle references
    /// (`<node_id>_<handle>_<direction>`)
    pub fn from_handle_refs(source_ref: &str, target_ref: &str) -> Result<Self, String> {
        let source = handle::parse_handle_id(source_ref)?;
        let target = handle::parse_handle_id(target_ref)?;
        if source.direction != handle::HandleDirection::Output {
            return Err(format!("edge source '{}' is not an output handle", source_ref));
        }
        if target.direction != handle::HandleDirection::Input {
            return Err(format!("edge target '{}' is not an input handle", target_ref));
        }
        Ok(Self {
            source: source.node_id,
            source_handle: source.handle,
            target: target.node_id,
            target_handle: target.handle,
            label: None,
            content_type: ContentType::default(),
            transform: None,
        })
    }

    /// True when this edge wires the `first` input handle of its target
    pub fn targets_first(&self) -> bool {
        self.target_handle == FIRST_HANDLE
    }
}
