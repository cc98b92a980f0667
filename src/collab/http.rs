//! reqwest-backed collaborators.

use super::{
    AgentDelegate, AgentReply, InferenceClient, InferenceRequest, InferenceResponse,
    LongTermMemory, MemoryEntry, MemoryQuery, MemoryRecord, ToolExecutor,
};
use crate::errors::CollaboratorError;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

/// JSON-over-HTTP client for one collaborator base URL.
#[derive(Debug, Clone)]
pub struct HttpCollaborator {
    client: reqwest::Client,
    base_url: String,
    inference_path: String,
}

impl HttpCollaborator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("baton/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CollaboratorError::transport("http client", e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            inference_path: "/inference".to_string(),
        })
    }

    /// Override the inference endpoint path (default `/inference`).
    pub fn with_inference_path(mut self, path: &str) -> Self {
        self.inference_path = format!("/{}", path.trim_start_matches('/'));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B, R>(&self, operation: &str, path: &str, body: &B) -> Result<R, CollaboratorError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, operation, "POST");
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollaboratorError::transport(operation, "request timed out")
                } else {
                    CollaboratorError::transport(operation, e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::Status {
                operation: operation.to_string(),
                status: status.as_u16(),
                body: crate::util::truncate_chars(&body, 500),
            });
        }

        resp.json::<R>().await.map_err(|e| CollaboratorError::Decode {
            operation: operation.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl InferenceClient for HttpCollaborator {
    async fn complete(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, CollaboratorError> {
        let operation = format!("inference {}", request.model);
        self.post_json(&operation, &self.inference_path, request).await
    }
}

#[async_trait]
impl ToolExecutor for HttpCollaborator {
    async fn execute(&self, tool_id: &str, args: &Value) -> Result<Value, CollaboratorError> {
        let operation = format!("tool {}", tool_id);
        let body: Value = self
            .post_json(&operation, &format!("/tool/{}", tool_id), &json!({ "args": args }))
            .await?;
        tool_result(&operation, body)
    }
}

/// Unwrap a `{result} | {error}` tool response.
fn tool_result(operation: &str, body: Value) -> Result<Value, CollaboratorError> {
    match body {
        Value::Object(mut map) => {
            if let Some(error) = map.remove("error")
                && !error.is_null()
            {
                let message = match error {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                return Err(CollaboratorError::remote(operation, message));
            }
            Ok(map.remove("result").unwrap_or(Value::Null))
        }
        other => Err(CollaboratorError::Decode {
            operation: operation.to_string(),
            message: format!("expected an object, got {}", other),
        }),
    }
}

#[async_trait]
impl AgentDelegate for HttpCollaborator {
    async fn chat(
        &self,
        agent_id: &str,
        message: &str,
        thread_id: &str,
    ) -> Result<AgentReply, CollaboratorError> {
        let operation = format!("agent {}", agent_id);
        self.post_json(
            &operation,
            &format!("/agent/{}/chat", agent_id),
            &json!({ "message": message, "threadId": thread_id }),
        )
        .await
    }
}

#[derive(serde::Deserialize)]
struct SearchResponse {
    #[serde(default)]
    memories: Vec<MemoryRecord>,
}

#[async_trait]
impl LongTermMemory for HttpCollaborator {
    async fn add(&self, entry: &MemoryEntry) -> Result<(), CollaboratorError> {
        let _: Value = self.post_json("memory add", "/memory/add", entry).await?;
        Ok(())
    }

    async fn search(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>, CollaboratorError> {
        let resp: SearchResponse = self.post_json("memory search", "/memory/search", query).await?;
        Ok(resp.memories)
    }
}
