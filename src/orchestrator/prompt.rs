//! Coordinator prompt assembly and reply parsing.

use crate::state::{Message, OrchestrationState, ToolCall};
use crate::tools::ToolBindingManager;
use crate::util::extract_json_object;
use crate::workflow::Workflow;
use serde_json::Value;
use std::collections::HashSet;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are the coordinator of a multi-agent workflow. Work toward the goal step by step.";

const PROTOCOL: &str = "To call tools, reply with a JSON object of the form \
{\"tool_calls\": [{\"id\": \"c1\", \"name\": \"<tool>\", \"args\": {...}, \"depends_on\": [\"<id>\"]}]}. \
Calls without depends_on run in parallel. \
When the goal is complete, reply with the final answer as plain text and no tool_calls.";

/// What the coordinator asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorReply {
    ToolCalls(Vec<ToolCall>),
    FinalAnswer(String),
}

/// Messages sent to the coordinator model for the next turn.
pub fn coordinator_messages(
    workflow: &Workflow,
    state: &OrchestrationState,
    bindings: &ToolBindingManager,
) -> Vec<Message> {
    let mut system = String::new();
    system.push_str(
        workflow
            .coordinator
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT),
    );
    system.push_str("\n\n## Goal\n");
    system.push_str(&state.active_goal);
    system.push_str("\n\n## Tools\n");
    system.push_str(&bindings.coordinator_view());
    system.push('\n');
    system.push_str(PROTOCOL);

    if !state.preserved_facts.is_empty() {
        system.push_str("\n\n## Known facts\n");
        for fact in &state.preserved_facts {
            system.push_str(&format!("- {}\n", fact));
        }
    }

    if !state.context_enhancements.is_empty() {
        system.push_str("\n\n## Notes\n");
        for note in &state.context_enhancements {
            system.push_str(&format!("- {}\n", note));
        }
    }

    let mut messages = Vec::with_capacity(state.messages.len() + 1);
    messages.push(Message::system(system));
    messages.extend(state.messages.iter().cloned());
    messages
}

/// Interpret a coordinator reply.
///
/// The first balanced JSON object carrying a non-empty `tool_calls` array is a
/// tool request. Anything else, including an empty array, is a final answer.
/// Calls without an id get `r{round}-c{n}`; duplicate ids are suffixed.
pub fn parse_reply(text: &str, round: u32) -> CoordinatorReply {
    let calls = extract_json_object(text)
        .and_then(|json| serde_json::from_str::<Value>(json).ok())
        .and_then(|value| value.get("tool_calls").and_then(Value::as_array).cloned());

    let Some(raw_calls) = calls else {
        return CoordinatorReply::FinalAnswer(text.trim().to_string());
    };

    let mut seen = HashSet::new();
    let mut parsed = Vec::new();
    for (i, raw) in raw_calls.iter().enumerate() {
        let Some(name) = raw.get("name").and_then(Value::as_str) else {
            tracing::warn!(index = i, "Ignoring tool call without a name");
            continue;
        };
        let mut id = raw
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("r{}-c{}", round, i + 1));
        if !seen.insert(id.clone()) {
            id = format!("{}-{}", id, i + 1);
            seen.insert(id.clone());
        }
        let depends_on = raw
            .get("depends_on")
            .and_then(Value::as_array)
            .map(|deps| {
                deps.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        parsed.push(ToolCall {
            id,
            name: name.to_string(),
            args: raw.get("args").cloned().unwrap_or(Value::Object(Default::default())),
            depends_on,
        });
    }

    if parsed.is_empty() {
        CoordinatorReply::FinalAnswer(text.trim().to_string())
    } else {
        CoordinatorReply::ToolCalls(parsed)
    }
}
