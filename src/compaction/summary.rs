//! Curation input, summarizer prompt and summary parsing.

use crate::errors::SummarizationError;
use crate::ledger::TokenTotals;
use crate::state::{Message, OrchestrationState, Role};
use crate::util::{extract_json_object, truncate_chars};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const OBSERVATION_PREVIEW_CHARS: usize = 400;

/// Latest observation from one tool or agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentDigest {
    pub name: String,
    pub observations: usize,
    pub latest: String,
}

/// Everything the summarizer sees about a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurationInput {
    pub goal: String,
    pub completed_actions: Vec<String>,
    pub last_assistant_message: Option<String>,
    pub agent_summaries: Vec<AgentDigest>,
    pub token_metrics: BTreeMap<String, TokenTotals>,
    pub preserved_facts: Vec<String>,
}

impl CurationInput {
    pub fn from_state(state: &OrchestrationState) -> Self {
        let mut digests: Vec<AgentDigest> = Vec::new();
        for message in state.messages.iter().filter(|m| m.role == Role::Tool) {
            let name = message.name.clone().unwrap_or_else(|| "tool".to_string());
            let latest = truncate_chars(&message.content, OBSERVATION_PREVIEW_CHARS);
            match digests.iter_mut().find(|d| d.name == name) {
                Some(digest) => {
                    digest.observations += 1;
                    digest.latest = latest;
                }
                None => digests.push(AgentDigest {
                    name,
                    observations: 1,
                    latest,
                }),
            }
        }

        Self {
            goal: state.active_goal.clone(),
            completed_actions: state.completed_actions.clone(),
            last_assistant_message: state.last_assistant_message().map(|m| m.content.clone()),
            agent_summaries: digests,
            token_metrics: state.token_metrics.clone(),
            preserved_facts: state.preserved_facts.clone(),
        }
    }

    /// Messages for the summarizer model.
    pub fn to_prompt(&self) -> Vec<Message> {
        let system = "You compress the working memory of an orchestration run. \
            Reply with ONLY a JSON object of the form \
            {\"summary\": string, \"keyFacts\": [string], \"preservedContext\": object}. \
            The summary must let the coordinator continue the goal without the original messages. \
            keyFacts lists concrete facts, results and identifiers worth keeping verbatim.";

        let mut body = String::new();
        body.push_str(&format!("## Goal\n{}\n\n", self.goal));

        if !self.completed_actions.is_empty() {
            body.push_str("## Completed actions\n");
            for action in &self.completed_actions {
                body.push_str(&format!("- {}\n", action));
            }
            body.push('\n');
        }

        if !self.agent_summaries.is_empty() {
            body.push_str("## Observations by tool/agent\n");
            for digest in &self.agent_summaries {
                body.push_str(&format!(
                    "- {} ({} observation(s)), latest: {}\n",
                    digest.name, digest.observations, digest.latest
                ));
            }
            body.push('\n');
        }

        if let Some(last) = &self.last_assistant_message {
            body.push_str(&format!("## Last coordinator message\n{}\n\n", last));
        }

        if !self.preserved_facts.is_empty() {
            body.push_str("## Facts kept from earlier summaries\n");
            for fact in &self.preserved_facts {
                body.push_str(&format!("- {}\n", fact));
            }
            body.push('\n');
        }

        if !self.token_metrics.is_empty() {
            body.push_str("## Token usage\n");
            for (agent, totals) in &self.token_metrics {
                body.push_str(&format!(
                    "- {}: {} in / {} out\n",
                    agent, totals.input_tokens, totals.output_tokens
                ));
            }
        }

        vec![Message::system(system), Message::user(body)]
    }
}

/// Parsed summarizer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurationSummary {
    pub summary: String,
    pub key_facts: Vec<String>,
    #[serde(default)]
    pub preserved_context: Value,
}

impl CurationSummary {
    /// The single system message that replaces the wiped conversation.
    pub fn to_system_message(&self, goal: &str, wiped_messages: usize) -> Message {
        let mut text = String::new();
        text.push_str("## CONTEXT SUMMARY\n\n");
        text.push_str(&format!(
            "Earlier conversation ({} message(s)) was summarized to stay within the context window.\n\n",
            wiped_messages
        ));
        text.push_str(&self.summary);
        text.push_str("\n\n");

        if !self.key_facts.is_empty() {
            text.push_str("### Key Facts\n\n");
            for fact in &self.key_facts {
                text.push_str(&format!("- {}\n", fact));
            }
            text.push('\n');
        }

        if !is_empty_context(&self.preserved_context) {
            text.push_str("### Preserved Context\n\n");
            text.push_str(&self.preserved_context.to_string());
            text.push_str("\n\n");
        }

        text.push_str(&format!("**Goal:** {}\n", goal));
        Message::system(text)
    }
}

fn is_empty_context(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Leniently parse summarizer output: the first balanced JSON object wins.
pub fn parse_summary(text: &str) -> Result<CurationSummary, SummarizationError> {
    let json = extract_json_object(text).ok_or(SummarizationError::NoJson)?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| SummarizationError::InvalidJson(e.to_string()))?;

    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SummarizationError::MissingField("summary"))?;

    let key_facts = match value.get("keyFacts") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    SummarizationError::InvalidJson("keyFacts must be an array of strings".into())
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(SummarizationError::InvalidJson(
                "keyFacts must be an array of strings".into(),
            ));
        }
        None => return Err(SummarizationError::MissingField("keyFacts")),
    };

    Ok(CurationSummary {
        summary: summary.to_string(),
        key_facts,
        preserved_context: value.get("preservedContext").cloned().unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateUpdate;

    fn busy_state() -> OrchestrationState {
        OrchestrationState::new("run-1", "wf", "compile the quarterly report").apply(
            StateUpdate::new()
                .append_messages([
                    Message::user("compile the quarterly report"),
                    Message::assistant("calling search"),
                    Message::tool("search", "c1", "found 3 sources"),
                    Message::tool("search", "c2", "found 5 sources"),
                    Message::tool("researcher", "c3", "draft ready"),
                    Message::assistant("summarizing"),
                ])
                .with_completed_action("tool:search")
                .with_completed_action("agent:researcher"),
        )
    }

    #[test]
    fn test_from_state_builds_digests() {
        let input = CurationInput::from_state(&busy_state());
        assert_eq!(input.agent_summaries.len(), 2);
        assert_eq!(input.agent_summaries[0].name, "search");
        assert_eq!(input.agent_summaries[0].observations, 2);
        assert_eq!(input.agent_summaries[0].latest, "found 5 sources");
        assert_eq!(input.last_assistant_message.as_deref(), Some("summarizing"));
    }

    #[test]
    fn test_prompt_includes_goal_and_actions() {
        let prompt = CurationInput::from_state(&busy_state()).to_prompt();
        assert_eq!(prompt.len(), 2);
        assert!(prompt[0].content.contains("keyFacts"));
        assert!(prompt[1].content.contains("compile the quarterly report"));
        assert!(prompt[1].content.contains("- agent:researcher"));
    }

    #[test]
    fn test_parse_summary_with_surrounding_text() {
        let text = r#"Sure! {"summary": "Report drafted", "keyFacts": ["3 sources"], "preservedContext": {"draft": "v1"}} done"#;
        let parsed = parse_summary(text).unwrap();
        assert_eq!(parsed.summary, "Report drafted");
        assert_eq!(parsed.key_facts, vec!["3 sources"]);
        assert_eq!(parsed.preserved_context["draft"], "v1");
    }

    #[test]
    fn test_parse_summary_malformed() {
        assert_eq!(parse_summary("no json at all"), Err(SummarizationError::NoJson));
        assert!(matches!(
            parse_summary(r#"{"summary": "x", "keyFacts": [1]}"#),
            Err(SummarizationError::InvalidJson(_))
        ));
        assert_eq!(
            parse_summary(r#"{"summary": "  ", "keyFacts": []}"#),
            Err(SummarizationError::MissingField("summary"))
        );
        assert_eq!(
            parse_summary(r#"{"summary": "ok"}"#),
            Err(SummarizationError::MissingField("keyFacts"))
        );
        assert!(matches!(
            parse_summary(r#"{"summary": "ok", "keyFacts": [] trailing"#),
            Err(SummarizationError::NoJson)
        ));
    }

    #[test]
    fn test_parse_summary_ignores_later_object() {
        let text = r#"{"note": "not a summary"} {"summary": "real", "keyFacts": []}"#;
        assert_eq!(
            parse_summary(text),
            Err(SummarizationError::MissingField("summary"))
        );
    }

    #[test]
    fn test_system_message_embeds_summary() {
        let summary = CurationSummary {
            summary: "Report drafted".to_string(),
            key_facts: vec!["3 sources".to_string()],
            preserved_context: Value::Null,
        };
        let message = summary.to_system_message("compile report", 6);
        assert_eq!(message.role, Role::System);
        assert!(message.content.contains("Report drafted"));
        assert!(message.content.contains("- 3 sources"));
        assert!(message.content.contains("6 message(s)"));
        assert!(!message.content.contains("Preserved Context"));
    }
}
