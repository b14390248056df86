//! Input resolution: mapping upstream outputs onto a node's input bundle
//!
//! Pure function from `(diagram, state, node)` to the key→value map handed
//! to the node's handler. Edges are filtered under the same rules the flow
//! controller schedules by (first-handle gating, condition-branch
//! liveness), then each live edge extracts the payload under its source
//! handle from the source's last output, applies any declared transform,
//! and keys the result by the edge's label (falling back to the target
//! handle, then `default`).
//!
//! Resolution is deterministic: edges are walked in diagram insertion
//! order (last write wins on key collisions) and the result is an ordered
//! map, so equal upstream outputs always produce byte-equal input bundles.

use crate::diagram::{compiled::CompiledDiagram, ContentType, Edge, Node, DEFAULT_HANDLE};
use crate::flow::FlowController;
use dipeo_state::ExecutionState;
use std::collections::BTreeMap;

/// Resolved inputs for one node invocation
pub type Inputs = BTreeMap<String, serde_json::Value>;

/// Resolve the input bundle for a node about to execute
///
/// Missing source outputs skip the edge rather than failing: the node
/// still runs with whatever the remaining edges supplied. A non-`start`
/// node with no live edges gets an empty map and its handler decides.
pub fn resolve_inputs(
    diagram: &CompiledDiagram,
    flow: &FlowController<'_>,
    node: &Node,
    state: &ExecutionState,
) -> Inputs {
    let mut inputs = Inputs::new();

    for edge in flow.considered_incoming_edges(node, state) {
        if !flow.edge_is_live(edge, state) {
            continue;
        }
        let Some(source) = diagram.get_node(&edge.source) else {
            continue;
        };
        let Some(output) = state.node_output(&edge.source) else {
            continue;
        };

        let extracted = if source.is_condition() {
            // Branch payloads never fall back to `default`
            output.get(&edge.source_handle)
        } else {
            output
                .get(&edge.source_handle)
                .or_else(|| output.get(DEFAULT_HANDLE))
        };
        let Some(value) = extracted else {
            continue;
        };

        let delivered = deliver(edge, value);
        inputs.insert(input_key(edge), delivered);
    }

    inputs
}

/// The input name an edge delivers under
fn input_key(edge: &Edge) -> String {
    if let Some(label) = &edge.label {
        if !label.is_empty() {
            return label.clone();
        }
    }
    if !edge.target_handle.is_empty() {
        return edge.target_handle.clone();
    }
    DEFAULT_HANDLE.to_string()
}

/// Apply the edge's transform, honouring the content-type contract
fn deliver(edge: &Edge, value: &serde_json::Value) -> serde_json::Value {
    if edge.content_type == ContentType::ConversationState {
        // Conversation payloads pass through unchanged
        return value.clone();
    }
    match &edge.transform {
        Some(transform) => transform.apply(value),
        None => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::{compiled::Diagram, EdgeTransform, Node, NodeType};
    use dipeo_state::NodeOutput;
    use serde_json::json;

    fn state_for(diagram: &CompiledDiagram) -> ExecutionState {
        let mut state = ExecutionState::new("e".to_string(), None);
        state.seed_nodes(diagram.node_ids().iter().cloned());
        state
    }

    fn complete(state: &mut ExecutionState, id: &str, output: NodeOutput) {
        state.transition_running(id);
        state.transition_completed(id, Some(output));
    }

    #[test]
    fn test_default_handle_extraction_and_labeling() {
        let mut d = Diagram::new();
        d.add_node(Node::new("a", NodeType::Start))
            .add_node(Node::new("b", NodeType::CodeJob))
            .add_edge(Edge::new("a", "b").with_label("seed"));
        let diagram = d.compile().unwrap();
        let flow = FlowController::new(&diagram, 150);

        let mut state = state_for(&diagram);
        complete(&mut state, "a", NodeOutput::with_default("a", json!({"x": 1})));

        let b = diagram.get_node("b").unwrap();
        let inputs = resolve_inputs(&diagram, &flow, b, &state);
        assert_eq!(inputs.get("seed"), Some(&json!({"x": 1})));
    }

    #[test]
    fn test_condition_branch_payload() {
        let mut d = Diagram::new();
        d.add_node(Node::new("k", NodeType::Condition))
            .add_node(Node::new("t", NodeType::CodeJob))
            .add_node(Node::new("f", NodeType::CodeJob))
            .add_edge(Edge::new("k", "t").with_source_handle("condtrue"))
            .add_edge(Edge::new("k", "f").with_source_handle("condfalse"));
        let diagram = d.compile().unwrap();
        let flow = FlowController::new(&diagram, 150);

        let mut state = state_for(&diagram);
        complete(&mut state, "k", NodeOutput::condition("k", true, json!("yes")));

        let t = diagram.get_node("t").unwrap();
        let inputs = resolve_inputs(&diagram, &flow, t, &state);
        assert_eq!(inputs.get("default"), Some(&json!("yes")));

        // The dead branch resolves to an empty bundle
        let f = diagram.get_node("f").unwrap();
        let inputs = resolve_inputs(&diagram, &flow, f, &state);
        assert!(inputs.is_empty());
    }

    #[test]
    fn test_missing_source_output_skips_edge() {
        let mut d = Diagram::new();
        d.add_node(Node::new("a", NodeType::CodeJob))
            .add_node(Node::new("b", NodeType::CodeJob))
            .connect("a", "b");
        let diagram = d.compile().unwrap();
        let flow = FlowController::new(&diagram, 150);
        let state = state_for(&diagram);

        let b = diagram.get_node("b").unwrap();
        let inputs = resolve_inputs(&diagram, &flow, b, &state);
        assert!(inputs.is_empty());
    }

    #[test]
    fn test_last_write_wins_in_diagram_order() {
        let mut d = Diagram::new();
        d.add_node(Node::new("a", NodeType::CodeJob))
            .add_node(Node::new("b", NodeType::CodeJob))
            .add_node(Node::new("c", NodeType::CodeJob))
            .add_edge(Edge::new("a", "c").with_label("v"))
            .add_edge(Edge::new("b", "c").with_label("v"));
        let diagram = d.compile().unwrap();
        let flow = FlowController::new(&diagram, 150);

        let mut state = state_for(&diagram);
        complete(&mut state, "a", NodeOutput::with_default("a", json!("from-a")));
        complete(&mut state, "b", NodeOutput::with_default("b", json!("from-b")));

        let c = diagram.get_node("c").unwrap();
        let inputs = resolve_inputs(&diagram, &flow, c, &state);
        assert_eq!(inputs.get("v"), Some(&json!("from-b")));
    }

    #[test]
    fn test_transform_applied_before_keying() {
        let mut d = Diagram::new();
        d.add_node(Node::new("a", NodeType::CodeJob))
            .add_node(Node::new("b", NodeType::CodeJob))
            .add_edge(Edge::new("a", "b").with_label("text").with_transform(EdgeTransform {
                extract: Some("result".to_string()),
                wrap: None,
            }));
        let diagram = d.compile().unwrap();
        let flow = FlowController::new(&diagram, 150);

        let mut state = state_for(&diagram);
        complete(
            &mut state,
            "a",
            NodeOutput::with_default("a", json!({"result": "payload"})),
        );

        let b = diagram.get_node("b").unwrap();
        let inputs = resolve_inputs(&diagram, &flow, b, &state);
        assert_eq!(inputs.get("text"), Some(&json!("payload")));
    }

    #[test]
    fn test_conversation_state_bypasses_transform() {
        let mut d = Diagram::new();
        d.add_node(Node::new("a", NodeType::PersonJob))
            .add_node(Node::new("b", NodeType::PersonJob))
            .add_edge(
                Edge::new("a", "b")
                    .with_content_type(ContentType::ConversationState)
                    .with_transform(EdgeTransform {
                        extract: Some("messages".to_string()),
                        wrap: None,
                    }),
            );
        let diagram = d.compile().unwrap();
        let flow = FlowController::new(&diagram, 150);

        let mut state = state_for(&diagram);
        let conversation = json!({"messages": [{"role": "user", "content": "hi"}]});
        complete(&mut state, "a", NodeOutput::with_default("a", conversation.clone()));

        let b = diagram.get_node("b").unwrap();
        let inputs = resolve_inputs(&diagram, &flow, b, &state);
        assert_eq!(inputs.get("default"), Some(&conversation));
    }

    #[test]
    fn test_named_output_handle_preferred_over_default() {
        let mut d = Diagram::new();
        d.add_node(Node::new("a", NodeType::CodeJob))
            .add_node(Node::new("b", NodeType::CodeJob))
            .add_edge(Edge::new("a", "b").with_source_handle("errors"));
        let diagram = d.compile().unwrap();
        let flow = FlowController::new(&diagram, 150);

        let mut state = state_for(&diagram);
        let mut output = NodeOutput::with_default("a", json!("main"));
        output.value.insert("errors".to_string(), json!(["oops"]));
        complete(&mut state, "a", output);

        let b = diagram.get_node("b").unwrap();
        let inputs = resolve_inputs(&diagram, &flow, b, &state);
        assert_eq!(inputs.get("default"), Some(&json!(["oops"])));
    }
}
