//! External collaborator interfaces.
//!
//! The engine never talks to a backend directly. Each concern is a trait so
//! the HTTP implementations in [`http`] can be swapped for the scripted ones
//! in [`mock`] under test.
//!
//! | Trait              | Backend                                 |
//! |--------------------|-----------------------------------------|
//! | `InferenceClient`  | coordinator and summarizer models       |
//! | `ToolExecutor`     | tool execution, `POST /tool/{id}`       |
//! | `AgentDelegate`    | sub-agents, `POST /agent/{id}/chat`     |
//! | `LongTermMemory`   | `POST /memory/add`, `/memory/search`    |
//! | `ModelSpecSource`  | model context windows                   |

pub mod http;
pub mod memory;
pub mod mock;

use crate::errors::CollaboratorError;
use crate::ledger::TokenTotals;
use crate::state::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use memory::{InMemoryLongTerm, NoopLongTerm};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub content: String,
    /// Reported usage; estimated from text when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenTotals>,
}

impl InferenceResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }
}

/// One message returned by a sub-agent: plain text or a role/content pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentMessage {
    Text(String),
    Structured {
        #[serde(default)]
        role: Option<String>,
        content: String,
    },
}

impl AgentMessage {
    pub fn content(&self) -> &str {
        match self {
            AgentMessage::Text(text) => text,
            AgentMessage::Structured { content, .. } => content,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReply {
    #[serde(default)]
    pub messages: Vec<AgentMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multimodal_output: Option<Value>,
}

impl AgentReply {
    /// Every message joined into one observation.
    pub fn text(&self) -> String {
        let mut text = self
            .messages
            .iter()
            .map(AgentMessage::content)
            .collect::<Vec<_>>()
            .join("\n");
        if let Some(output) = &self.multimodal_output {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&format!("[multimodal output] {}", output));
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub messages: Vec<Message>,
    pub agent_id: String,
    pub run_id: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryQuery {
    pub query: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default)]
    pub filters: Value,
    #[serde(default = "default_memory_limit")]
    pub limit: usize,
}

fn default_memory_limit() -> usize {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub metadata: Value,
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, CollaboratorError>;
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run a tool and return its result payload.
    async fn execute(&self, tool_id: &str, args: &Value) -> Result<Value, CollaboratorError>;
}

#[async_trait]
pub trait AgentDelegate: Send + Sync {
    async fn chat(
        &self,
        agent_id: &str,
        message: &str,
        thread_id: &str,
    ) -> Result<AgentReply, CollaboratorError>;
}

#[async_trait]
pub trait LongTermMemory: Send + Sync {
    async fn add(&self, entry: &MemoryEntry) -> Result<(), CollaboratorError>;

    async fn search(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>, CollaboratorError>;
}

#[async_trait]
pub trait ModelSpecSource: Send + Sync {
    /// Context window in tokens, `None` when the model is unknown.
    async fn context_window(&self, model: &str) -> Result<Option<u64>, CollaboratorError>;
}

/// The collaborators a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub inference: Arc<dyn InferenceClient>,
    pub tools: Arc<dyn ToolExecutor>,
    pub agents: Arc<dyn AgentDelegate>,
    pub memory: Arc<dyn LongTermMemory>,
}

/// Bound an external call. Elapsed time becomes [`CollaboratorError::Timeout`].
pub async fn with_timeout<T, F>(
    operation: &str,
    limit: Duration,
    call: F,
) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::timeout(operation, limit.as_secs())),
    }
}
