//! Flow control: readiness, continuation, and loop-reset logic
//!
//! Diagrams are cyclic in general, so scheduling cannot be a static
//! topological order. [`FlowController`] is instead a pure function of
//! `(diagram, state)` evaluated every step — readiness over a mutable
//! marking:
//!
//! - a node is ready when it is `PENDING`, below its iteration cap, and
//!   every *considered* incoming edge is satisfied
//! - on the first execution of a `person_job` node, edges into its `first`
//!   handle (when any exist) are the only considered edges; subsequent
//!   executions consider only non-`first` edges
//! - an edge from a condition node is live only when its source handle
//!   matches the branch tag on the condition's last output
//!
//! When a node completes, [`FlowController::downstream_resets`] computes
//! the transitive set of already-completed downstream nodes to return to
//! `PENDING`, which is what lets feedback loops re-fire.

use crate::diagram::{compiled::CompiledDiagram, Edge, Node, NodeType};
use dipeo_state::{ExecutionState, NodeStatus};
use std::collections::HashSet;

/// Pure readiness logic over a compiled diagram
pub struct FlowController<'a> {
    diagram: &'a CompiledDiagram,
    max_iterations: u32,
}

impl<'a> FlowController<'a> {
    pub fn new(diagram: &'a CompiledDiagram, max_iterations: u32) -> Self {
        Self {
            diagram,
            max_iterations,
        }
    }

    /// The incoming edges that count for this node right now
    ///
    /// `person_job` nodes see two views over their incoming edges, selected
    /// by execution count: the `first`-handle view on the initial run (when
    /// any `first` edges exist), the non-`first` view afterwards. Every
    /// other node always considers all incoming edges.
    pub fn considered_incoming_edges(
        &self,
        node: &Node,
        state: &ExecutionState,
    ) -> Vec<&'a Edge> {
        let incoming: Vec<&Edge> = self.diagram.incoming_edges(&node.id).collect();
        if node.node_type != NodeType::PersonJob {
            return incoming;
        }
        let first_run = state.exec_count(&node.id) == 0;
        if first_run {
            let first_edges: Vec<&Edge> =
                incoming.iter().copied().filter(|e| e.targets_first()).collect();
            if first_edges.is_empty() {
                incoming
            } else {
                first_edges
            }
        } else {
            incoming.into_iter().filter(|e| !e.targets_first()).collect()
        }
    }

    /// Whether an edge currently carries data
    ///
    /// Edges from condition nodes are live only when their source handle
    /// matches the branch present on the condition's last output; an edge
    /// from a condition that has not produced output is not live.
    pub fn edge_is_live(&self, edge: &Edge, state: &ExecutionState) -> bool {
        let Some(source) = self.diagram.get_node(&edge.source) else {
            return false;
        };
        if source.is_condition() {
            return match state.node_output(&edge.source).and_then(|o| o.branch()) {
                Some(branch) => edge.source_handle == branch,
                None => false,
            };
        }
        true
    }

    /// Whether a node can still execute under its iteration cap
    pub fn can_node_execute(&self, node: &Node, state: &ExecutionState) -> bool {
        match node.max_iteration() {
            Some(cap) => state.exec_count(&node.id) < cap,
            None => true,
        }
    }

    /// Full readiness check for one node
    pub fn is_node_ready(&self, node: &Node, state: &ExecutionState) -> bool {
        if state.node_status(&node.id) != NodeStatus::Pending {
            return false;
        }
        if !self.can_node_execute(node, state) {
            return false;
        }
        if node.is_start() {
            return true;
        }

        let considered = self.considered_incoming_edges(node, state);
        let mut any_live = false;
        for edge in &considered {
            let Some(source) = self.diagram.get_node(&edge.source) else {
                continue;
            };
            if source.is_condition() {
                // A dead branch behaves as an absent edge; a live one is
                // satisfied by the condition having produced that branch.
                if self.edge_is_live(edge, state) {
                    any_live = true;
                }
                continue;
            }
            // A source satisfies its consumers when it is COMPLETED, or
            // when it holds a stored output after an iteration reset
            // (completed-this-cycle evidence for a now-PENDING node).
            let satisfied = state.node_status(&edge.source) == NodeStatus::Completed
                || state.node_output(&edge.source).is_some();
            if !satisfied {
                return false;
            }
            any_live = true;
        }

        // A node whose only incoming paths run through inactive condition
        // branches is not ready.
        if !considered.is_empty() && !any_live {
            return false;
        }
        true
    }

    /// All ready nodes, ordered so producers precede their consumers
    /// (deterministic within a batch)
    pub fn get_ready_nodes(&self, state: &ExecutionState) -> Vec<&'a Node> {
        let mut ready: Vec<&Node> = self
            .diagram
            .nodes()
            .filter(|node| self.is_node_ready(node, state))
            .collect();
        ready.sort_by_key(|node| self.diagram.topo_rank(&node.id));
        ready
    }

    /// Whether the execution loop should keep stepping
    ///
    /// False once every endpoint completed, or nothing is ready and nothing
    /// is running, or the global iteration cap has been hit.
    pub fn should_continue(&self, state: &ExecutionState, iteration: u32) -> bool {
        if iteration >= self.max_iterations {
            return false;
        }

        let mut endpoints = self.diagram.endpoint_nodes().peekable();
        if endpoints.peek().is_some()
            && endpoints.all(|e| state.node_status(&e.id) == NodeStatus::Completed)
        {
            return false;
        }

        !self.get_ready_nodes(state).is_empty() || state.any_node_running()
    }

    /// Whether every still-`PENDING` node is legitimately unreachable
    ///
    /// Called once the loop has gone quiet (nothing ready, nothing
    /// running) to separate normal termination from deadlock. A stuck node
    /// is *excused* when its blockage traces to a dead condition branch or
    /// an iteration-capped node, transitively; a dependency cycle of plain
    /// `PENDING` nodes excuses nobody and reads as deadlock.
    pub fn remaining_nodes_unreachable(&self, state: &ExecutionState) -> bool {
        let stuck: Vec<&Node> = self
            .diagram
            .nodes()
            .filter(|n| state.node_status(&n.id) == NodeStatus::Pending)
            .collect();
        if stuck.is_empty() {
            return true;
        }

        let mut excused: HashSet<&str> = HashSet::new();
        loop {
            let mut changed = false;
            for node in &stuck {
                if excused.contains(node.id.as_str()) {
                    continue;
                }
                if self.is_excused(node, state, &excused) {
                    excused.insert(node.id.as_str());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        stuck.iter().all(|n| excused.contains(n.id.as_str()))
    }

    fn is_excused(&self, node: &Node, state: &ExecutionState, excused: &HashSet<&str>) -> bool {
        // A node at its own iteration cap is finished, not stuck
        if !self.can_node_execute(node, state) {
            return true;
        }
        for edge in self.considered_incoming_edges(node, state) {
            let Some(source) = self.diagram.get_node(&edge.source) else {
                continue;
            };
            if source.is_condition() {
                match state.node_output(&source.id).and_then(|o| o.branch()) {
                    // The condition took the other branch: this path is dead
                    Some(branch) if branch != edge.source_handle => return true,
                    Some(_) => {}
                    None => {
                        let status = state.node_status(&source.id);
                        if status == NodeStatus::MaxiterReached
                            || status == NodeStatus::Failed
                            || excused.contains(source.id.as_str())
                        {
                            return true;
                        }
                    }
                }
                continue;
            }
            if state.node_output(&edge.source).is_some() {
                continue;
            }
            match state.node_status(&edge.source) {
                NodeStatus::MaxiterReached | NodeStatus::Failed => return true,
                NodeStatus::Pending | NodeStatus::Running => {
                    if excused.contains(source.id.as_str())
                        || !self.can_node_execute(source, state)
                    {
                        return true;
                    }
                }
                NodeStatus::Completed => {}
            }
        }
        false
    }

    /// Nodes to reset to `PENDING` after `completed_id` finished
    ///
    /// Walks downstream transitively, collecting already-`COMPLETED` nodes
    /// that may legally re-fire: start and endpoint nodes never reset, and
    /// an iterative node at its cap stays finished. The visited set guards
    /// against re-entrant resets on interleaved condition cycles — each
    /// node is considered at most once per completion event.
    pub fn downstream_resets(&self, completed_id: &str, state: &ExecutionState) -> Vec<String> {
        let mut resets = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        // The completing node handles its own lifecycle; never reset it here
        visited.insert(completed_id.to_string());
        self.collect_resets(completed_id, state, &mut visited, &mut resets);
        resets
    }

    fn collect_resets(
        &self,
        node_id: &str,
        state: &ExecutionState,
        visited: &mut HashSet<String>,
        resets: &mut Vec<String>,
    ) {
        for edge in self.diagram.outgoing_edges(node_id) {
            let Some(target) = self.diagram.get_node(&edge.target) else {
                continue;
            };
            if !visited.insert(target.id.clone()) {
                continue;
            }
            if state.node_status(&target.id) != NodeStatus::Completed {
                continue;
            }
            if target.is_start() || target.is_endpoint() {
                continue;
            }
            if let Some(cap) = target.max_iteration() {
                if state.exec_count(&target.id) >= cap {
                    continue;
                }
            }
            resets.push(target.id.clone());
            self.collect_resets(&target.id, state, visited, resets);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::{compiled::Diagram, Edge, Node, NodeType};
    use dipeo_state::NodeOutput;
    use serde_json::json;

    fn feedback_diagram() -> CompiledDiagram {
        // S:start → P:person_job(max_iteration=3) → D:code_job → K:condition
        //   K:condfalse → P (feedback), K:condtrue → E:endpoint
        let mut d = Diagram::new();
        d.add_node(Node::new("s", NodeType::Start))
            .add_node(Node::new("p", NodeType::PersonJob).with_data("max_iteration", json!(3)))
            .add_node(Node::new("d", NodeType::CodeJob))
            .add_node(Node::new("k", NodeType::Condition))
            .add_node(Node::new("e", NodeType::Endpoint))
            .add_edge(Edge::new("s", "p").with_target_handle("first"))
            .connect("p", "d")
            .connect("d", "k")
            .add_edge(Edge::new("k", "p").with_source_handle("condfalse"))
            .add_edge(Edge::new("k", "e").with_source_handle("condtrue"));
        d.compile().unwrap()
    }

    fn fresh_state(diagram: &CompiledDiagram) -> ExecutionState {
        let mut state = ExecutionState::new("e".to_string(), None);
        state.seed_nodes(diagram.node_ids().iter().cloned());
        state
    }

    #[test]
    fn test_start_is_always_ready() {
        let diagram = feedback_diagram();
        let state = fresh_state(&diagram);
        let flow = FlowController::new(&diagram, 150);

        let ready = flow.get_ready_nodes(&state);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "s");
    }

    #[test]
    fn test_first_handle_gates_initial_run() {
        let diagram = feedback_diagram();
        let mut state = fresh_state(&diagram);
        let flow = FlowController::new(&diagram, 150);

        // P is not ready before S completes
        let p = diagram.get_node("p").unwrap();
        assert!(!flow.is_node_ready(p, &state));

        state.transition_running("s");
        state.transition_completed("s", Some(NodeOutput::with_default("s", json!(null))));
        assert!(flow.is_node_ready(p, &state));
    }

    #[test]
    fn test_subsequent_run_ignores_first_edges() {
        let diagram = feedback_diagram();
        let mut state = fresh_state(&diagram);
        let flow = FlowController::new(&diagram, 150);

        state.transition_running("s");
        state.transition_completed("s", None);
        state.transition_running("p");
        state.transition_completed("p", Some(NodeOutput::with_default("p", json!("x"))));
        state.reset_node("p");

        // Second run considers only the feedback edge K:condfalse → P
        let p = diagram.get_node("p").unwrap();
        assert!(!flow.is_node_ready(p, &state));

        state.transition_running("k");
        state
            .transition_completed("k", Some(NodeOutput::condition("k", false, json!("again"))));
        assert!(flow.is_node_ready(p, &state));
    }

    #[test]
    fn test_condition_branch_gating() {
        let diagram = feedback_diagram();
        let mut state = fresh_state(&diagram);
        let flow = FlowController::new(&diagram, 150);

        state.transition_running("k");
        state.transition_completed("k", Some(NodeOutput::condition("k", true, json!(1))));

        let e = diagram.get_node("e").unwrap();
        let p = diagram.get_node("p").unwrap();
        assert!(flow.is_node_ready(e, &state));
        // condfalse branch is dead, so the feedback edge cannot wake P
        // on a non-first run
        state.exec_counts.insert("p".to_string(), 1);
        state.reset_node("p");
        assert!(!flow.is_node_ready(p, &state));
    }

    #[test]
    fn test_maxiter_blocks_readiness() {
        let diagram = feedback_diagram();
        let mut state = fresh_state(&diagram);
        let flow = FlowController::new(&diagram, 150);

        state.exec_counts.insert("p".to_string(), 3);
        let p = diagram.get_node("p").unwrap();
        assert!(!flow.can_node_execute(p, &state));
        assert!(!flow.is_node_ready(p, &state));
    }

    #[test]
    fn test_should_continue_stops_on_endpoints() {
        let diagram = feedback_diagram();
        let mut state = fresh_state(&diagram);
        let flow = FlowController::new(&diagram, 150);

        assert!(flow.should_continue(&state, 0));

        state.transition_running("e");
        state.transition_completed("e", None);
        assert!(!flow.should_continue(&state, 0));
    }

    #[test]
    fn test_should_continue_stops_at_iteration_cap() {
        let diagram = feedback_diagram();
        let state = fresh_state(&diagram);
        let flow = FlowController::new(&diagram, 10);
        assert!(!flow.should_continue(&state, 10));
    }

    #[test]
    fn test_downstream_resets_walk_cycle_once() {
        let diagram = feedback_diagram();
        let mut state = fresh_state(&diagram);
        let flow = FlowController::new(&diagram, 150);

        // First lap of the loop completed
        for id in ["s", "p", "d", "k"] {
            state.transition_running(id);
            let output = if id == "k" {
                NodeOutput::condition("k", false, json!("go"))
            } else {
                NodeOutput::with_default(id, json!(1))
            };
            state.transition_completed(id, Some(output));
        }

        // P completing again resets D and K (but never S or E), each once
        let resets = flow.downstream_resets("p", &state);
        assert_eq!(resets, vec!["d".to_string(), "k".to_string()]);
    }

    #[test]
    fn test_dead_branch_judged_unreachable() {
        // S → K:condition(false) → {condtrue → X, condfalse → Y:endpoint}
        let mut d = Diagram::new();
        d.add_node(Node::new("s", NodeType::Start))
            .add_node(Node::new("k", NodeType::Condition))
            .add_node(Node::new("x", NodeType::CodeJob))
            .add_node(Node::new("y", NodeType::Endpoint))
            .connect("s", "k")
            .add_edge(Edge::new("k", "x").with_source_handle("condtrue"))
            .add_edge(Edge::new("k", "y").with_source_handle("condfalse"));
        let diagram = d.compile().unwrap();
        let flow = FlowController::new(&diagram, 150);

        let mut state = fresh_state(&diagram);
        for (id, output) in [
            ("s", NodeOutput::with_default("s", json!(null))),
            ("k", NodeOutput::condition("k", false, json!(null))),
            ("y", NodeOutput::with_default("y", json!(null))),
        ] {
            state.transition_running(id);
            state.transition_completed(id, Some(output));
        }

        // X is stuck behind the dead condtrue branch: excused
        assert!(flow.remaining_nodes_unreachable(&state));
    }

    #[test]
    fn test_pending_cycle_is_deadlock_not_unreachable() {
        let mut d = Diagram::new();
        d.add_node(Node::new("a", NodeType::CodeJob))
            .add_node(Node::new("b", NodeType::CodeJob))
            .connect("a", "b")
            .connect("b", "a");
        let diagram = d.compile().unwrap();
        let flow = FlowController::new(&diagram, 150);

        let state = fresh_state(&diagram);
        assert!(!flow.remaining_nodes_unreachable(&state));
    }

    #[test]
    fn test_resets_skip_capped_person_job() {
        let diagram = feedback_diagram();
        let mut state = fresh_state(&diagram);
        let flow = FlowController::new(&diagram, 150);

        for id in ["p", "d", "k"] {
            state.transition_running(id);
            state.transition_completed(id, Some(NodeOutput::with_default(id, json!(1))));
        }
        state.exec_counts.insert("p".to_string(), 3);

        // K completing must not reset P once it is at its cap
        let resets = flow.downstream_resets("k", &state);
        assert!(!resets.contains(&"p".to_string()));
    }
}
