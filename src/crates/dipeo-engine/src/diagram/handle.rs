//! Handle id encoding and parsing
//!
//! Arrows in the wire format reference ports through encoded handle ids of
//! the form `<node_id>_<handle_label>_<direction>`, e.g.
//! `node_123_default_output`. Node ids may themselves contain underscores,
//! so parsing works from the end: the last segment is the direction, the
//! second-to-last is the handle label, everything before is the node id.

use serde::{Deserialize, Serialize};

/// Which side of a node a handle sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleDirection {
    Input,
    Output,
}

impl HandleDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "input" => Some(Self::Input),
            "output" => Some(Self::Output),
            _ => None,
        }
    }
}

/// Parsed components of a handle id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHandle {
    pub node_id: String,
    pub handle: String,
    pub direction: HandleDirection,
}

/// Encode a handle id: `<node_id>_<handle>_<direction>`
pub fn create_handle_id(node_id: &str, handle: &str, direction: HandleDirection) -> String {
    format!("{}_{}_{}", node_id, handle, direction.as_str())
}

/// Parse a handle id into its components
///
/// Returns an error message describing the malformed id; use
/// [`parse_handle_id_safe`] when absence is acceptable.
pub fn parse_handle_id(handle_id: &str) -> Result<ParsedHandle, String> {
    let parts: Vec<&str> = handle_id.split('_').collect();
    if parts.len() < 3 {
        return Err(format!(
            "invalid handle id '{}': expected <node_id>_<handle>_<direction>",
            handle_id
        ));
    }
    let direction_str = parts[parts.len() - 1];
    let handle = parts[parts.len() - 2];
    let node_id = parts[..parts.len() - 2].join("_");

    if node_id.is_empty() {
        return Err(format!("invalid handle id '{}': empty node id", handle_id));
    }
    let direction = HandleDirection::parse(direction_str)
        .ok_or_else(|| format!("invalid direction '{}' in handle id '{}'", direction_str, handle_id))?;

    Ok(ParsedHandle {
        node_id,
        handle: handle.to_string(),
        direction,
    })
}

/// Parse a handle id, returning `None` on malformed input
pub fn parse_handle_id_safe(handle_id: &str) -> Option<ParsedHandle> {
    parse_handle_id(handle_id).ok()
}

/// Extract just the node id from a handle id
pub fn node_id_from_handle(handle_id: &str) -> Option<String> {
    parse_handle_id_safe(handle_id).map(|p| p.node_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let id = create_handle_id("node_123", "default", HandleDirection::Output);
        assert_eq!(id, "node_123_default_output");

        let parsed = parse_handle_id(&id).unwrap();
        assert_eq!(parsed.node_id, "node_123");
        assert_eq!(parsed.handle, "default");
        assert_eq!(parsed.direction, HandleDirection::Output);
    }

    #[test]
    fn test_node_id_with_underscores() {
        let parsed = parse_handle_id("my_long_node_id_first_input").unwrap();
        assert_eq!(parsed.node_id, "my_long_node_id");
        assert_eq!(parsed.handle, "first");
        assert_eq!(parsed.direction, HandleDirection::Input);
    }

    #[test]
    fn test_invalid_ids() {
        assert!(parse_handle_id("short").is_err());
        assert!(parse_handle_id("a_default_sideways").is_err());
        assert!(parse_handle_id_safe("__output").is_none());
    }

    #[test]
    fn test_node_id_extraction() {
        assert_eq!(
            node_id_from_handle("n1_condtrue_output").as_deref(),
            Some("n1")
        );
        assert!(node_id_from_handle("garbage").is_none());
    }
}
