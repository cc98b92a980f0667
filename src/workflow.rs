//! Workflow definitions.
//!
//! A workflow names the coordinator model, the tools and sub-agents it may
//! call, and an optional catalog of tools that are only ever suggested.
//!
//! ```toml
//! id = "report-writer"
//! cleanup_threshold = "75%"
//! max_round_trips = 6
//!
//! [coordinator]
//! model = "gpt-4o"
//! system_prompt = "You write concise reports."
//!
//! [[tools]]
//! name = "search"
//! description = "Web search"
//! schema = { type = "object", properties = { query = { type = "string" } }, required = ["query"] }
//!
//! [[agents]]
//! name = "researcher"
//! agent_id = "agent-7"
//! ```

use crate::compaction::CleanupThreshold;
use crate::errors::OrchestratorError;
use crate::tools::{CatalogEntry, ParamSchema, ToolBinding};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorSpec {
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_temperature() -> f32 {
    0.2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Backend tool id; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default)]
    pub schema: ParamSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub agent_id: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub coordinator: CoordinatorSpec,
    /// Summarizer model; the coordinator model when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarizer_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_threshold: Option<CleanupThreshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_round_trips: Option<u32>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub catalog: Vec<CatalogEntry>,
}

impl Workflow {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid workflow file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse workflow TOML")
    }

    pub fn summarizer_model(&self) -> &str {
        self.summarizer_model
            .as_deref()
            .unwrap_or(&self.coordinator.model)
    }

    /// Check everything a run needs before any step executes.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.id.trim().is_empty() {
            return Err(OrchestratorError::Configuration(
                "workflow id is missing".to_string(),
            ));
        }
        if self.coordinator.model.trim().is_empty() {
            return Err(OrchestratorError::Configuration(format!(
                "workflow '{}' has no coordinator model",
                self.id
            )));
        }
        if !(0.0..=2.0).contains(&self.coordinator.temperature) {
            return Err(OrchestratorError::Configuration(format!(
                "coordinator temperature {} is outside 0.0..=2.0",
                self.coordinator.temperature
            )));
        }
        if self.max_round_trips == Some(0) {
            return Err(OrchestratorError::Configuration(
                "max_round_trips must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let names = self
            .tools
            .iter()
            .map(|t| t.name.as_str())
            .chain(self.agents.iter().map(|a| a.name.as_str()));
        for name in names {
            if name.trim().is_empty() {
                return Err(OrchestratorError::Configuration(
                    "tool and agent names cannot be empty".to_string(),
                ));
            }
            if !seen.insert(name) {
                return Err(OrchestratorError::Configuration(format!(
                    "binding name '{}' is declared more than once",
                    name
                )));
            }
        }
        for agent in &self.agents {
            if agent.agent_id.trim().is_empty() {
                return Err(OrchestratorError::Configuration(format!(
                    "agent '{}' has no agent_id",
                    agent.name
                )));
            }
        }

        // Backend ids become URL path segments (`/tool/{id}`, `/agent/{id}/chat`).
        let endpoints = self
            .tools
            .iter()
            .map(|t| ("tool", t.tool_id.as_deref().unwrap_or(&t.name)))
            .chain(self.agents.iter().map(|a| ("agent", a.agent_id.as_str())));
        for (kind, id) in endpoints {
            if !is_path_segment(id) {
                return Err(OrchestratorError::Configuration(format!(
                    "{} id '{}' may only contain letters, digits, '-', '_', '.' and ':'",
                    kind, id
                )));
            }
        }
        Ok(())
    }

    /// Workflow-origin bindings: declared tools, then sub-agents.
    pub fn bindings(&self) -> Vec<ToolBinding> {
        let tools = self.tools.iter().map(|t| {
            let mut binding = ToolBinding::tool(&t.name, &t.description, t.schema.clone());
            if let Some(id) = &t.tool_id {
                binding.target = crate::tools::BindingTarget::Tool(id.clone());
            }
            binding
        });
        let agents = self
            .agents
            .iter()
            .map(|a| ToolBinding::agent(&a.name, &a.agent_id, &a.description));
        tools.chain(agents).collect()
    }
}

fn is_path_segment(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::BindingTarget;

    const SAMPLE: &str = r#"
id = "report-writer"
cleanup_threshold = "75%"
max_round_trips = 6
summarizer_model = "small"

[coordinator]
model = "big"
system_prompt = "Be brief."

[[tools]]
name = "search"
tool_id = "web-search"
description = "Web search"
schema = { type = "object", properties = { query = { type = "string" } }, required = ["query"] }

[[agents]]
name = "researcher"
agent_id = "agent-7"

[[catalog]]
name = "translate"
description = "Translate text"
"#;

    #[test]
    fn test_parse_sample() {
        let wf = Workflow::parse(SAMPLE).unwrap();
        assert_eq!(wf.id, "report-writer");
        assert_eq!(wf.cleanup_threshold, CleanupThreshold::percent(75));
        assert_eq!(wf.max_round_trips, Some(6));
        assert_eq!(wf.coordinator.temperature, 0.2);
        assert_eq!(wf.summarizer_model(), "small");
        assert_eq!(wf.catalog.len(), 1);
        assert!(wf.validate().is_ok());
    }

    #[test]
    fn test_bindings_cover_tools_and_agents() {
        let wf = Workflow::parse(SAMPLE).unwrap();
        let bindings = wf.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].target, BindingTarget::Tool("web-search".to_string()));
        assert_eq!(bindings[1].target, BindingTarget::Agent("agent-7".to_string()));
    }

    #[test]
    fn test_missing_coordinator_model_is_configuration_error() {
        let wf = Workflow::parse("id = \"wf\"").unwrap();
        let err = wf.validate().unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(_)));
        assert!(err.to_string().contains("no coordinator model"));
    }

    #[test]
    fn test_duplicate_binding_names_rejected() {
        let wf = Workflow::parse(
            r#"
id = "wf"
[coordinator]
model = "m"
[[tools]]
name = "dup"
[[agents]]
name = "dup"
agent_id = "a"
"#,
        )
        .unwrap();
        assert!(wf.validate().unwrap_err().to_string().contains("more than once"));
    }

    #[test]
    fn test_backend_ids_must_be_single_path_segments() {
        let base = "id = \"wf\"\n[coordinator]\nmodel = \"m\"\n";
        for bad in [
            "[[tools]]\nname = \"search\"\ntool_id = \"../admin\"",
            "[[tools]]\nname = \"search?debug=1\"",
            "[[tools]]\nname = \"web search\"",
            "[[agents]]\nname = \"researcher\"\nagent_id = \"team/7\"",
            "[[agents]]\nname = \"researcher\"\nagent_id = \"..\"",
        ] {
            let wf = Workflow::parse(&format!("{}{}", base, bad)).unwrap();
            let err = wf.validate().unwrap_err();
            assert!(matches!(err, OrchestratorError::Configuration(_)), "{}", bad);
            assert!(err.to_string().contains("may only contain"), "{}", bad);
        }

        let ok = Workflow::parse(&format!(
            "{}[[tools]]\nname = \"search\"\ntool_id = \"web.search:v2\"",
            base
        ))
        .unwrap();
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_summarizer_defaults_to_coordinator() {
        let wf = Workflow::parse("id = \"wf\"\n[coordinator]\nmodel = \"m\"").unwrap();
        assert_eq!(wf.summarizer_model(), "m");
    }

    #[test]
    fn test_invalid_threshold_fails_to_parse() {
        assert!(Workflow::parse("id = \"wf\"\ncleanup_threshold = \"120%\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(Workflow::load(&path).unwrap().id, "report-writer");
        assert!(Workflow::load(&dir.path().join("missing.toml")).is_err());
    }
}
