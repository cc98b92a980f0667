//! Orchestration state and its reducers.
//!
//! A run owns exactly one [`OrchestrationState`]. Steps never mutate it in place:
//! each step returns a [`StateUpdate`] and [`OrchestrationState::apply`] merges it,
//! producing the next state.
//!
//! Merge rules:
//! - `messages`: appended, or replaced wholesale by a memory wipe
//! - `completed_actions`, `context_enhancements`: appended
//! - `token_metrics`: union-merge, the update's value wins for a shared agent id
//! - everything else: replaced when the update carries a value

use crate::ledger::TokenTotals;
use crate::tools::ParamSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Role of a conversational message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single conversational message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tool or agent that produced a `Tool` message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Observation produced by a tool or agent call.
    pub fn tool(name: &str, call_id: &str, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            name: Some(name.to_string()),
            tool_call_id: Some(call_id.to_string()),
        }
    }
}

/// A tool call requested by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    /// Ids of calls whose output this call consumes; they run first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// A control-plane tool proposed for the coordinator's awareness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecommendation {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub schema: ParamSchema,
    pub score: f64,
    #[serde(default)]
    pub reason: String,
}

/// Full working state of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub run_id: String,
    pub workflow_id: String,
    pub active_goal: String,
    pub messages: Vec<Message>,
    pub completed_actions: Vec<String>,
    pub token_metrics: BTreeMap<String, TokenTotals>,
    pub suggested_tools: Vec<ToolRecommendation>,
    pub needs_cleanup: bool,
    pub context_enhancements: Vec<String>,
    pub last_summary: Option<String>,
    pub preserved_facts: Vec<String>,
    /// Completed coordinating → executing-tools round trips.
    pub round_trips: u32,
    /// Consecutive failed coordinator calls; reset on success.
    pub coordinator_failures: u32,
    /// Tool calls requested by the last coordinator response.
    pub pending_tool_calls: Vec<ToolCall>,
    /// The coordinator's final answer, recorded before any wipe.
    pub final_output: Option<String>,
    /// Ledger total already accounted for by the last wipe.
    pub context_baseline: u64,
    pub wipe_count: u32,
}

impl OrchestrationState {
    pub fn new(run_id: &str, workflow_id: &str, goal: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            workflow_id: workflow_id.to_string(),
            active_goal: goal.to_string(),
            messages: Vec::new(),
            completed_actions: Vec::new(),
            token_metrics: BTreeMap::new(),
            suggested_tools: Vec::new(),
            needs_cleanup: false,
            context_enhancements: Vec::new(),
            last_summary: None,
            preserved_facts: Vec::new(),
            round_trips: 0,
            coordinator_failures: 0,
            pending_tool_calls: Vec::new(),
            final_output: None,
            context_baseline: 0,
            wipe_count: 0,
        }
    }

    /// State for the next run on a finished thread.
    ///
    /// Conversation, curated memory, cleanup flag and window baseline carry
    /// over; per-run counters and the previous answer are cleared and `goal`
    /// becomes the next user message.
    pub fn continue_with(mut self, run_id: &str, goal: &str) -> Self {
        self.run_id = run_id.to_string();
        self.active_goal = goal.to_string();
        self.final_output = None;
        let mut update = StateUpdate::new().append_messages([Message::user(goal)]);
        update.round_trips = Some(0);
        update.coordinator_failures = Some(0);
        update.pending_tool_calls = Some(Vec::new());
        self.apply(update)
    }

    /// Most recent assistant-role message, if any.
    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// Merge an update into this state, producing the next state.
    pub fn apply(mut self, update: StateUpdate) -> Self {
        match update.messages {
            Some(MessagesUpdate::Append(messages)) => self.messages.extend(messages),
            Some(MessagesUpdate::Replace(messages)) => self.messages = messages,
            None => {}
        }
        self.completed_actions.extend(update.completed_actions);
        self.context_enhancements.extend(update.context_enhancements);
        for (agent_id, totals) in update.token_metrics {
            self.token_metrics.insert(agent_id, totals);
        }
        if let Some(tools) = update.suggested_tools {
            self.suggested_tools = tools;
        }
        if let Some(flag) = update.needs_cleanup {
            self.needs_cleanup = flag;
        }
        if let Some(summary) = update.last_summary {
            self.last_summary = Some(summary);
        }
        if let Some(facts) = update.preserved_facts {
            self.preserved_facts = facts;
        }
        if let Some(n) = update.round_trips {
            self.round_trips = n;
        }
        if let Some(n) = update.coordinator_failures {
            self.coordinator_failures = n;
        }
        if let Some(calls) = update.pending_tool_calls {
            self.pending_tool_calls = calls;
        }
        if let Some(output) = update.final_output {
            self.final_output = Some(output);
        }
        if let Some(baseline) = update.context_baseline {
            self.context_baseline = baseline;
        }
        if let Some(n) = update.wipe_count {
            self.wipe_count = n;
        }
        self
    }
}

/// How a step changes the message list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "messages", rename_all = "snake_case")]
pub enum MessagesUpdate {
    Append(Vec<Message>),
    Replace(Vec<Message>),
}

/// Partial state produced by one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub messages: Option<MessagesUpdate>,
    pub completed_actions: Vec<String>,
    pub token_metrics: BTreeMap<String, TokenTotals>,
    pub suggested_tools: Option<Vec<ToolRecommendation>>,
    pub needs_cleanup: Option<bool>,
    pub context_enhancements: Vec<String>,
    pub last_summary: Option<String>,
    pub preserved_facts: Option<Vec<String>>,
    pub round_trips: Option<u32>,
    pub coordinator_failures: Option<u32>,
    pub pending_tool_calls: Option<Vec<ToolCall>>,
    pub final_output: Option<String>,
    pub context_baseline: Option<u64>,
    pub wipe_count: Option<u32>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append messages, merging with messages already appended by this update.
    pub fn append_messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        match &mut self.messages {
            Some(MessagesUpdate::Append(existing)) | Some(MessagesUpdate::Replace(existing)) => {
                existing.extend(messages)
            }
            None => self.messages = Some(MessagesUpdate::Append(messages.into_iter().collect())),
        }
        self
    }

    pub fn replace_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(MessagesUpdate::Replace(messages));
        self
    }

    pub fn with_completed_action(mut self, action: impl Into<String>) -> Self {
        self.completed_actions.push(action.into());
        self
    }

    pub fn with_enhancement(mut self, note: impl Into<String>) -> Self {
        self.context_enhancements.push(note.into());
        self
    }

    pub fn with_token_metrics(mut self, metrics: BTreeMap<String, TokenTotals>) -> Self {
        self.token_metrics.extend(metrics);
        self
    }

    pub fn with_needs_cleanup(mut self, flag: bool) -> Self {
        self.needs_cleanup = Some(flag);
        self
    }

    /// Messages this update appends (empty for replacements).
    pub fn appended_messages(&self) -> &[Message] {
        match &self.messages {
            Some(MessagesUpdate::Append(messages)) => messages,
            _ => &[],
        }
    }
}
