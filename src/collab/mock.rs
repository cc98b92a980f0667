//! Scripted collaborators for tests and dry runs.
//!
//! Each mock records the calls it receives so tests can assert on what the
//! engine dispatched.

use super::{
    AgentDelegate, AgentMessage, AgentReply, InferenceClient, InferenceRequest, InferenceResponse,
    ModelSpecSource, ToolExecutor,
};
use crate::errors::CollaboratorError;
use crate::ledger::TokenTotals;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Inference backend answering from per-model queues.
#[derive(Clone, Default)]
pub struct MockInference {
    queues: Arc<Mutex<HashMap<String, VecDeque<Result<InferenceResponse, CollaboratorError>>>>>,
    fallback: Option<String>,
    requests: Arc<Mutex<Vec<InferenceRequest>>>,
    delay: Option<Duration>,
}

impl MockInference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply used once a model's queue is exhausted. Without one, an exhausted
    /// queue is a remote error.
    pub fn with_fallback(mut self, content: &str) -> Self {
        self.fallback = Some(content.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_text(&self, model: &str, content: &str) -> &Self {
        self.push(model, Ok(InferenceResponse::text(content)))
    }

    pub fn push_with_usage(&self, model: &str, content: &str, usage: TokenTotals) -> &Self {
        self.push(
            model,
            Ok(InferenceResponse {
                content: content.to_string(),
                usage: Some(usage),
            }),
        )
    }

    pub fn push_error(&self, model: &str, error: CollaboratorError) -> &Self {
        self.push(model, Err(error))
    }

    pub fn push(&self, model: &str, response: Result<InferenceResponse, CollaboratorError>) -> &Self {
        lock(&self.queues)
            .entry(model.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<InferenceRequest> {
        lock(&self.requests).clone()
    }

    pub fn requests_for(&self, model: &str) -> Vec<InferenceRequest> {
        lock(&self.requests)
            .iter()
            .filter(|r| r.model == model)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl InferenceClient for MockInference {
    async fn complete(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, CollaboratorError> {
        lock(&self.requests).push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = lock(&self.queues)
            .get_mut(&request.model)
            .and_then(VecDeque::pop_front);
        match (scripted, &self.fallback) {
            (Some(response), _) => response,
            (None, Some(content)) => Ok(InferenceResponse::text(content.clone())),
            (None, None) => Err(CollaboratorError::remote(
                format!("inference {}", request.model),
                "no scripted response",
            )),
        }
    }
}

/// A recorded tool dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool_id: String,
    pub args: Value,
}

#[derive(Clone)]
enum ToolScript {
    Fixed(Result<Value, CollaboratorError>),
    Echo,
}

/// Tool backend with fixed per-tool results. Unscripted tools echo their args.
#[derive(Clone, Default)]
pub struct MockToolExecutor {
    scripts: Arc<Mutex<HashMap<String, ToolScript>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    calls: Arc<Mutex<Vec<ToolInvocation>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(self, tool_id: &str, result: Value) -> Self {
        lock(&self.scripts).insert(tool_id.to_string(), ToolScript::Fixed(Ok(result)));
        self
    }

    pub fn with_error(self, tool_id: &str, error: CollaboratorError) -> Self {
        lock(&self.scripts).insert(tool_id.to_string(), ToolScript::Fixed(Err(error)));
        self
    }

    pub fn with_delay(self, tool_id: &str, delay: Duration) -> Self {
        lock(&self.delays).insert(tool_id.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<ToolInvocation> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Highest number of calls observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn execute(&self, tool_id: &str, args: &Value) -> Result<Value, CollaboratorError> {
        lock(&self.calls).push(ToolInvocation {
            tool_id: tool_id.to_string(),
            args: args.clone(),
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = lock(&self.delays).get(tool_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let script = lock(&self.scripts)
            .get(tool_id)
            .cloned()
            .unwrap_or(ToolScript::Echo);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match script {
            ToolScript::Fixed(result) => result,
            ToolScript::Echo => Ok(serde_json::json!({ "tool": tool_id, "args": args })),
        }
    }
}

/// A recorded delegation.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentInvocation {
    pub agent_id: String,
    pub message: String,
    pub thread_id: String,
}

/// Sub-agent backend replying with fixed text per agent.
#[derive(Clone, Default)]
pub struct MockAgentDelegate {
    replies: Arc<Mutex<HashMap<String, Result<AgentReply, CollaboratorError>>>>,
    calls: Arc<Mutex<Vec<AgentInvocation>>>,
}

impl MockAgentDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, agent_id: &str, text: &str) -> Self {
        let reply = AgentReply {
            messages: vec![AgentMessage::Text(text.to_string())],
            multimodal_output: None,
        };
        lock(&self.replies).insert(agent_id.to_string(), Ok(reply));
        self
    }

    pub fn with_error(self, agent_id: &str, error: CollaboratorError) -> Self {
        lock(&self.replies).insert(agent_id.to_string(), Err(error));
        self
    }

    pub fn calls(&self) -> Vec<AgentInvocation> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl AgentDelegate for MockAgentDelegate {
    async fn chat(
        &self,
        agent_id: &str,
        message: &str,
        thread_id: &str,
    ) -> Result<AgentReply, CollaboratorError> {
        lock(&self.calls).push(AgentInvocation {
            agent_id: agent_id.to_string(),
            message: message.to_string(),
            thread_id: thread_id.to_string(),
        });
        lock(&self.replies)
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| {
                Err(CollaboratorError::remote(
                    format!("agent {}", agent_id),
                    "unknown agent",
                ))
            })
    }
}

/// Model-spec source backed by a fixed table. Counts lookups.
#[derive(Clone, Default)]
pub struct MockModelSpecs {
    windows: HashMap<String, u64>,
    failing: bool,
    lookups: Arc<AtomicUsize>,
}

impl MockModelSpecs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, model: &str, window: u64) -> Self {
        self.windows.insert(model.to_string(), window);
        self
    }

    /// Every lookup fails with a transport error.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelSpecSource for MockModelSpecs {
    async fn context_window(&self, model: &str) -> Result<Option<u64>, CollaboratorError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(CollaboratorError::transport("model specs", "unreachable"));
        }
        Ok(self.windows.get(model).copied())
    }
}
