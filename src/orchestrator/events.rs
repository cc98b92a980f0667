//! Engine events and the sinks that consume them.
//!
//! Step handlers return events alongside their state update; the orchestrator
//! forwards them to every registered [`EventSink`].

use super::machine::Node;
use crate::compaction::WindowUsage;
use crate::runs::RunStatus;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    RunStarted {
        run_id: String,
        workflow_id: String,
        thread_id: String,
    },
    StepStarted {
        run_id: String,
        step: u64,
        node: Node,
    },
    StepCompleted {
        run_id: String,
        step: u64,
        node: Node,
        next: Node,
    },
    CoordinatorReplied {
        run_id: String,
        tool_calls: usize,
    },
    CoordinatorFailed {
        run_id: String,
        attempt: u32,
        error: String,
    },
    ToolDispatched {
        run_id: String,
        call_id: String,
        name: String,
        wave: usize,
    },
    ToolCompleted {
        run_id: String,
        call_id: String,
        name: String,
        ok: bool,
    },
    ToolRefused {
        run_id: String,
        call_id: String,
        name: String,
        reason: String,
    },
    RoundTripCapReached {
        run_id: String,
        cap: u32,
        dropped_calls: usize,
    },
    WindowChecked {
        run_id: String,
        usage: WindowUsage,
    },
    MemoryWiped {
        run_id: String,
        wiped_messages: usize,
        memory_persisted: bool,
    },
    WipeAborted {
        run_id: String,
        error: String,
    },
    ToolsSuggested {
        run_id: String,
        names: Vec<String>,
    },
    CheckpointSaved {
        run_id: String,
        thread_id: String,
        checkpoint_id: String,
    },
    RunFinished {
        run_id: String,
        status: RunStatus,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &EngineEvent);
}

/// Logs events through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::RunStarted {
                run_id,
                workflow_id,
                thread_id,
            } => tracing::info!(%run_id, %workflow_id, %thread_id, "Run started"),
            EngineEvent::StepStarted { run_id, step, node } => {
                tracing::debug!(%run_id, step, %node, "Step started")
            }
            EngineEvent::StepCompleted {
                run_id,
                step,
                node,
                next,
            } => tracing::debug!(%run_id, step, %node, %next, "Step completed"),
            EngineEvent::CoordinatorReplied { run_id, tool_calls } => {
                tracing::info!(%run_id, tool_calls, "Coordinator replied")
            }
            EngineEvent::CoordinatorFailed {
                run_id,
                attempt,
                error,
            } => tracing::warn!(%run_id, attempt, %error, "Coordinator call failed"),
            EngineEvent::ToolDispatched {
                run_id,
                call_id,
                name,
                wave,
            } => tracing::debug!(%run_id, %call_id, %name, wave, "Tool dispatched"),
            EngineEvent::ToolCompleted {
                run_id,
                call_id,
                name,
                ok,
            } => tracing::info!(%run_id, %call_id, %name, ok, "Tool completed"),
            EngineEvent::ToolRefused {
                run_id,
                call_id,
                name,
                reason,
            } => tracing::warn!(%run_id, %call_id, %name, %reason, "Tool call refused"),
            EngineEvent::RoundTripCapReached {
                run_id,
                cap,
                dropped_calls,
            } => tracing::warn!(%run_id, cap, dropped_calls, "Round-trip cap reached"),
            EngineEvent::WindowChecked { run_id, usage } => {
                tracing::info!(%run_id, needs_cleanup = usage.needs_cleanup, "Context window {}", usage)
            }
            EngineEvent::MemoryWiped {
                run_id,
                wiped_messages,
                memory_persisted,
            } => tracing::info!(%run_id, wiped_messages, memory_persisted, "Memory wiped"),
            EngineEvent::WipeAborted { run_id, error } => {
                tracing::warn!(%run_id, %error, "Memory wipe aborted")
            }
            EngineEvent::ToolsSuggested { run_id, names } => {
                tracing::debug!(%run_id, ?names, "Tools suggested")
            }
            EngineEvent::CheckpointSaved {
                run_id,
                thread_id,
                checkpoint_id,
            } => tracing::trace!(%run_id, %thread_id, %checkpoint_id, "Checkpoint saved"),
            EngineEvent::RunFinished { run_id, status } => {
                tracing::info!(%run_id, %status, "Run finished")
            }
        }
    }
}

/// Forwards events into an unbounded channel. Closed receivers are ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &EngineEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Nodes in the order their steps started.
    pub fn visited_nodes(&self) -> Vec<Node> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::StepStarted { node, .. } => Some(node),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &EngineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(step: u64, node: Node) -> EngineEvent {
        EngineEvent::StepStarted {
            run_id: "r".into(),
            step,
            node,
        }
    }

    #[test]
    fn test_collecting_sink_records_nodes() {
        let sink = CollectingSink::new();
        sink.emit(&started(0, Node::Coordinating));
        sink.emit(&EngineEvent::CoordinatorReplied {
            run_id: "r".into(),
            tool_calls: 0,
        });
        sink.emit(&started(1, Node::NoteTaking));
        assert_eq!(sink.events().len(), 3);
        assert_eq!(sink.visited_nodes(), vec![Node::Coordinating, Node::NoteTaking]);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(&started(0, Node::Coordinating));
        assert_eq!(rx.recv().await.unwrap(), started(0, Node::Coordinating));
        drop(rx);
        sink.emit(&started(1, Node::End));
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let value = serde_json::to_value(started(3, Node::MemoryWipe)).unwrap();
        assert_eq!(value["type"], "step_started");
        assert_eq!(value["node"], "memory-wipe");
    }

    #[test]
    fn test_tracing_sink_accepts_every_event() {
        TracingSink.emit(&started(0, Node::Coordinating));
        TracingSink.emit(&EngineEvent::RunFinished {
            run_id: "r".into(),
            status: RunStatus::Success,
        });
    }
}
