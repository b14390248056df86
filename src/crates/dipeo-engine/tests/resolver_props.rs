//! Property tests for input resolution determinism
//!
//! Two independently constructed but identical diagram/state pairs must
//! resolve byte-equal input bundles, whatever the upstream payloads are.

use dipeo_engine::{Diagram, Edge, EdgeTransform, FlowController, Node, NodeType, resolve_inputs};
use dipeo_state::{ExecutionState, NodeOutput};
use proptest::prelude::*;
use serde_json::json;

fn arb_payload() -> impl Strategy<Value = serde_json::Value> {
    let leaf = prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::from),
        any::<i64>().prop_map(serde_json::Value::from),
        "[a-z0-9 ]{0,16}".prop_map(serde_json::Value::from),
    ];
    leaf.prop_recursive(2, 8, 4, |inner| {
        prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
            .prop_map(|m| serde_json::Value::Object(m.into_iter().collect()))
    })
}

fn build(
    payloads: &[serde_json::Value],
    with_transform: bool,
) -> (dipeo_engine::CompiledDiagram, ExecutionState) {
    let mut diagram = Diagram::new();
    diagram.add_node(Node::new("sink", NodeType::CodeJob));
    for (i, _) in payloads.iter().enumerate() {
        let id = format!("src{i}");
        diagram.add_node(Node::new(id.clone(), NodeType::CodeJob));
        let mut edge = Edge::new(id, "sink").with_label(format!("v{i}"));
        if with_transform && i % 2 == 0 {
            edge = edge.with_transform(EdgeTransform {
                extract: Some("k".to_string()),
                wrap: Some("wrapped".to_string()),
            });
        }
        diagram.add_edge(edge);
    }
    let compiled = diagram.compile().unwrap();

    let mut state = ExecutionState::new("e".to_string(), None);
    state.seed_nodes(compiled.node_ids().iter().cloned());
    for (i, payload) in payloads.iter().enumerate() {
        let id = format!("src{i}");
        state.transition_running(&id);
        state.transition_completed(
            &id,
            Some(NodeOutput::with_default(&id, json!({"k": payload.clone()}))),
        );
    }
    (compiled, state)
}

proptest! {
    #[test]
    fn resolution_is_deterministic(
        payloads in prop::collection::vec(arb_payload(), 1..6),
        with_transform in any::<bool>(),
    ) {
        let (diagram_a, state_a) = build(&payloads, with_transform);
        let (diagram_b, state_b) = build(&payloads, with_transform);

        let flow_a = FlowController::new(&diagram_a, 150);
        let flow_b = FlowController::new(&diagram_b, 150);
        let sink_a = diagram_a.get_node("sink").unwrap();
        let sink_b = diagram_b.get_node("sink").unwrap();

        let inputs_a = resolve_inputs(&diagram_a, &flow_a, sink_a, &state_a);
        let inputs_b = resolve_inputs(&diagram_b, &flow_b, sink_b, &state_b);

        let bytes_a = serde_json::to_vec(&inputs_a).unwrap();
        let bytes_b = serde_json::to_vec(&inputs_b).unwrap();
        prop_assert_eq!(bytes_a, bytes_b);
    }

    #[test]
    fn repeated_resolution_is_stable(payloads in prop::collection::vec(arb_payload(), 1..6)) {
        let (diagram, state) = build(&payloads, false);
        let flow = FlowController::new(&diagram, 150);
        let sink = diagram.get_node("sink").unwrap();

        let first = serde_json::to_vec(&resolve_inputs(&diagram, &flow, sink, &state)).unwrap();
        for _ in 0..3 {
            let again = serde_json::to_vec(&resolve_inputs(&diagram, &flow, sink, &state)).unwrap();
            prop_assert_eq!(&first, &again);
        }
    }
}
