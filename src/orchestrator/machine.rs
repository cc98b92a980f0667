//! Step graph of the orchestration state machine.
//!
//! ```text
//! coordinating ──► executing-tools ──► coordinating
//!      │
//!      └─► note-taking ─► window-tracking ─┬─► memory-wipe ─┐
//!                                          └────────────────┴─► tool-boxing ─► graph-optimizing ─► end
//! ```
//!
//! The coordinating ↔ executing-tools cycle is bounded by `max_round_trips`.
//! Transitions are pure functions of the current node and state.

use crate::state::OrchestrationState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Node {
    Coordinating,
    ExecutingTools,
    NoteTaking,
    WindowTracking,
    MemoryWipe,
    ToolBoxing,
    GraphOptimizing,
    End,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Node::Coordinating => "coordinating",
            Node::ExecutingTools => "executing-tools",
            Node::NoteTaking => "note-taking",
            Node::WindowTracking => "window-tracking",
            Node::MemoryWipe => "memory-wipe",
            Node::ToolBoxing => "tool-boxing",
            Node::GraphOptimizing => "graph-optimizing",
            Node::End => "end",
        }
    }

    /// Nodes of the post-answer pipeline.
    pub fn is_shadow_pipeline(&self) -> bool {
        matches!(
            self,
            Node::NoteTaking
                | Node::WindowTracking
                | Node::MemoryWipe
                | Node::ToolBoxing
                | Node::GraphOptimizing
        )
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Node {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coordinating" => Ok(Node::Coordinating),
            "executing-tools" => Ok(Node::ExecutingTools),
            "note-taking" => Ok(Node::NoteTaking),
            "window-tracking" => Ok(Node::WindowTracking),
            "memory-wipe" => Ok(Node::MemoryWipe),
            "tool-boxing" => Ok(Node::ToolBoxing),
            "graph-optimizing" => Ok(Node::GraphOptimizing),
            "end" => Ok(Node::End),
            other => Err(format!("unknown node: {}", other)),
        }
    }
}

/// Bounds on the coordinating loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Coordinating → executing-tools round trips allowed per run.
    pub max_round_trips: u32,
    /// Extra coordinator attempts after a failed inference call.
    pub max_coordinator_retries: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_round_trips: 8,
            max_coordinator_retries: 2,
        }
    }
}

/// Node to run after `current`, given the state that step produced.
pub fn next_node(current: Node, state: &OrchestrationState, limits: &Limits) -> Node {
    match current {
        Node::Coordinating => {
            if state.coordinator_failures > 0 {
                if state.coordinator_failures <= limits.max_coordinator_retries {
                    Node::Coordinating
                } else {
                    Node::NoteTaking
                }
            } else if !state.pending_tool_calls.is_empty()
                && state.round_trips < limits.max_round_trips
            {
                Node::ExecutingTools
            } else {
                Node::NoteTaking
            }
        }
        Node::ExecutingTools => Node::Coordinating,
        Node::NoteTaking => Node::WindowTracking,
        Node::WindowTracking => {
            if state.needs_cleanup {
                Node::MemoryWipe
            } else {
                Node::ToolBoxing
            }
        }
        Node::MemoryWipe => Node::ToolBoxing,
        Node::ToolBoxing => Node::GraphOptimizing,
        Node::GraphOptimizing | Node::End => Node::End,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ToolCall;
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "search".to_string(),
            args: json!({}),
            depends_on: Vec::new(),
        }
    }

    fn state_with_calls(n: usize) -> OrchestrationState {
        let mut s = OrchestrationState::new("r", "w", "g");
        s.pending_tool_calls = (0..n).map(|i| call(&format!("c{}", i))).collect();
        s
    }

    #[test]
    fn test_tool_calls_go_to_executing_tools() {
        let limits = Limits::default();
        assert_eq!(
            next_node(Node::Coordinating, &state_with_calls(2), &limits),
            Node::ExecutingTools
        );
        assert_eq!(
            next_node(Node::Coordinating, &state_with_calls(0), &limits),
            Node::NoteTaking
        );
    }

    #[test]
    fn test_round_trip_cap_forces_shadow_pipeline() {
        let limits = Limits {
            max_round_trips: 3,
            max_coordinator_retries: 0,
        };
        let mut s = state_with_calls(1);
        s.round_trips = 2;
        assert_eq!(next_node(Node::Coordinating, &s, &limits), Node::ExecutingTools);
        s.round_trips = 3;
        assert_eq!(next_node(Node::Coordinating, &s, &limits), Node::NoteTaking);
    }

    #[test]
    fn test_coordinator_failures_retry_then_give_up() {
        let limits = Limits {
            max_round_trips: 8,
            max_coordinator_retries: 2,
        };
        let mut s = state_with_calls(0);
        s.coordinator_failures = 1;
        assert_eq!(next_node(Node::Coordinating, &s, &limits), Node::Coordinating);
        s.coordinator_failures = 2;
        assert_eq!(next_node(Node::Coordinating, &s, &limits), Node::Coordinating);
        s.coordinator_failures = 3;
        assert_eq!(next_node(Node::Coordinating, &s, &limits), Node::NoteTaking);
    }

    #[test]
    fn test_shadow_pipeline_order() {
        let limits = Limits::default();
        let mut s = state_with_calls(0);
        assert_eq!(next_node(Node::ExecutingTools, &s, &limits), Node::Coordinating);
        assert_eq!(next_node(Node::NoteTaking, &s, &limits), Node::WindowTracking);
        assert_eq!(next_node(Node::WindowTracking, &s, &limits), Node::ToolBoxing);
        s.needs_cleanup = true;
        assert_eq!(next_node(Node::WindowTracking, &s, &limits), Node::MemoryWipe);
        assert_eq!(next_node(Node::MemoryWipe, &s, &limits), Node::ToolBoxing);
        assert_eq!(next_node(Node::ToolBoxing, &s, &limits), Node::GraphOptimizing);
        assert_eq!(next_node(Node::GraphOptimizing, &s, &limits), Node::End);
    }

    #[test]
    fn test_node_names_roundtrip() {
        for node in [
            Node::Coordinating,
            Node::ExecutingTools,
            Node::NoteTaking,
            Node::WindowTracking,
            Node::MemoryWipe,
            Node::ToolBoxing,
            Node::GraphOptimizing,
            Node::End,
        ] {
            assert_eq!(node.as_str().parse::<Node>().unwrap(), node);
            assert_eq!(serde_json::to_value(node).unwrap(), json!(node.as_str()));
        }
    }
}
