//! Tool bindings and the data-plane / control-plane split.
//!
//! Workflow bindings are the only executable surface. Suggested bindings are
//! derived from the tool-boxing step and shown to the coordinator for
//! awareness; a call naming one is refused, never dispatched.

use super::ParamSchema;
use crate::state::ToolRecommendation;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOrigin {
    Workflow,
    Suggested,
}

impl std::fmt::Display for ToolOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolOrigin::Workflow => write!(f, "workflow"),
            ToolOrigin::Suggested => write!(f, "suggested"),
        }
    }
}

/// What a binding dispatches to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum BindingTarget {
    /// A tool execution backend, addressed by tool id.
    Tool(String),
    /// A sub-agent, reached through the delegation collaborator.
    Agent(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBinding {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub schema: ParamSchema,
    pub origin: ToolOrigin,
    pub target: BindingTarget,
}

impl ToolBinding {
    pub fn tool(name: &str, description: &str, schema: ParamSchema) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            schema,
            origin: ToolOrigin::Workflow,
            target: BindingTarget::Tool(name.to_string()),
        }
    }

    /// A sub-agent exposed as a callable binding. Args must carry a `message` string.
    pub fn agent(name: &str, agent_id: &str, description: &str) -> Self {
        let schema: ParamSchema = ParamSchema::Object {
            description: None,
            properties: [(
                "message".to_string(),
                ParamSchema::String {
                    description: Some("Task for the agent".to_string()),
                    allowed: Vec::new(),
                },
            )]
            .into_iter()
            .collect(),
            required: vec!["message".to_string()],
        };
        Self {
            name: name.to_string(),
            description: description.to_string(),
            schema,
            origin: ToolOrigin::Workflow,
            target: BindingTarget::Agent(agent_id.to_string()),
        }
    }
}

/// Why a requested call was not dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchRefusal {
    Unknown(String),
    SuggestedOnly(String),
}

impl std::fmt::Display for DispatchRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchRefusal::Unknown(name) => {
                write!(f, "tool '{}' is not bound in this workflow", name)
            }
            DispatchRefusal::SuggestedOnly(name) => write!(
                f,
                "tool '{}' is a suggestion for awareness only and cannot be executed",
                name
            ),
        }
    }
}

/// Holds both binding sets for one step.
#[derive(Debug, Clone, Default)]
pub struct ToolBindingManager {
    workflow: Vec<ToolBinding>,
    suggested: Vec<ToolBinding>,
}

impl ToolBindingManager {
    /// Every binding passed here is treated as workflow-origin.
    pub fn new(workflow: impl IntoIterator<Item = ToolBinding>) -> Self {
        let workflow = workflow
            .into_iter()
            .map(|mut b| {
                b.origin = ToolOrigin::Workflow;
                b
            })
            .collect();
        Self {
            workflow,
            suggested: Vec::new(),
        }
    }

    /// Replace the suggested set. Names that collide with a workflow binding are dropped.
    pub fn with_suggestions(mut self, recommendations: &[ToolRecommendation]) -> Self {
        self.suggested = recommendations
            .iter()
            .filter(|r| !self.workflow.iter().any(|b| b.name == r.name))
            .map(|r| ToolBinding {
                name: r.name.clone(),
                description: r.description.clone(),
                schema: r.schema.clone(),
                origin: ToolOrigin::Suggested,
                target: BindingTarget::Tool(r.name.clone()),
            })
            .collect();
        self
    }

    pub fn workflow_bindings(&self) -> &[ToolBinding] {
        &self.workflow
    }

    pub fn suggested_bindings(&self) -> &[ToolBinding] {
        &self.suggested
    }

    pub fn is_workflow_tool(&self, name: &str) -> bool {
        self.workflow.iter().any(|b| b.name == name)
    }

    /// The binding a call may be dispatched to. Only workflow bindings qualify.
    pub fn executable(&self, name: &str) -> Result<&ToolBinding, DispatchRefusal> {
        if let Some(binding) = self.workflow.iter().find(|b| b.name == name) {
            return Ok(binding);
        }
        if self.suggested.iter().any(|b| b.name == name) {
            Err(DispatchRefusal::SuggestedOnly(name.to_string()))
        } else {
            Err(DispatchRefusal::Unknown(name.to_string()))
        }
    }

    /// Tool listing for the coordinator prompt.
    pub fn coordinator_view(&self) -> String {
        let mut out = String::new();
        if self.workflow.is_empty() {
            out.push_str("No tools are available. Answer directly.\n");
        } else {
            out.push_str("Available tools:\n");
            for b in &self.workflow {
                let _ = writeln!(out, "- {} {}: {}", b.name, b.schema.signature(), b.description);
            }
        }
        if !self.suggested.is_empty() {
            out.push_str(
                "\nPossibly relevant tools not enabled in this workflow (do not call these):\n",
            );
            for b in &self.suggested {
                let _ = writeln!(out, "- {}: {}", b.name, b.description);
            }
        }
        out
    }
}
