//! Step handlers.
//!
//! Each node of the state machine has one handler. A handler reads the current
//! state, talks to collaborators, and returns a [`StepOutput`]: the partial
//! update to merge and the events to emit. Handlers never fail; collaborator
//! errors become observations in the conversation.

use super::dispatch::plan_waves;
use super::events::EngineEvent;
use super::machine::Node;
use super::prompt::{CoordinatorReply, coordinator_messages, parse_reply};
use super::settings::EngineSettings;
use crate::collab::{Collaborators, InferenceRequest, MemoryQuery, with_timeout};
use crate::compaction::{
    ContextWindowMonitor, CurationOutcome, MemoryCurator, ModelSpecCache,
};
use crate::errors::CollaboratorError;
use crate::ledger::{RunLedger, TokenTotals};
use crate::state::{Message, OrchestrationState, Role, StateUpdate, ToolCall};
use crate::tools::{BindingTarget, ToolBinding, ToolBindingManager, suggest};
use crate::util::{estimate_tokens, truncate_chars};
use crate::workflow::Workflow;
use futures::future::join_all;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Ledger agent id for coordinator usage.
pub const COORDINATOR_AGENT: &str = "coordinator";

/// Messages from the tail of the conversation scored by tool-boxing.
const RECENT_MESSAGES: usize = 6;

/// Prefix of every error observation.
const ERROR_PREFIX: &str = "error:";

/// Result of one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    pub update: StateUpdate,
    pub events: Vec<EngineEvent>,
}

impl StepOutput {
    fn new(update: StateUpdate) -> Self {
        Self {
            update,
            events: Vec::new(),
        }
    }

    fn event(mut self, event: EngineEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// Runs steps for a single run.
pub struct StepRunner {
    workflow: Arc<Workflow>,
    collaborators: Collaborators,
    monitor: ContextWindowMonitor,
    curator: MemoryCurator,
    ledger: RunLedger,
    settings: EngineSettings,
    thread_id: String,
}

impl StepRunner {
    pub fn new(
        workflow: Arc<Workflow>,
        collaborators: Collaborators,
        specs: Arc<ModelSpecCache>,
        ledger: RunLedger,
        settings: EngineSettings,
        thread_id: &str,
    ) -> Self {
        let curator = MemoryCurator::new(
            collaborators.inference.clone(),
            collaborators.memory.clone(),
            workflow.summarizer_model(),
        )
        .with_timeouts(settings.timeouts.summarize, settings.timeouts.memory);
        Self {
            monitor: ContextWindowMonitor::new(specs),
            curator,
            workflow,
            collaborators,
            ledger,
            settings,
            thread_id: thread_id.to_string(),
        }
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run the handler for `node`. The update always carries the ledger's
    /// per-agent totals.
    pub async fn step(&self, node: Node, state: &OrchestrationState) -> StepOutput {
        let mut output = match node {
            Node::Coordinating => self.coordinating(state).await,
            Node::ExecutingTools => self.executing_tools(state).await,
            Node::NoteTaking => self.note_taking(state),
            Node::WindowTracking => self.window_tracking(state).await,
            Node::MemoryWipe => self.memory_wipe(state).await,
            Node::ToolBoxing => self.tool_boxing(state),
            Node::GraphOptimizing => self.graph_optimizing(state),
            Node::End => StepOutput::default(),
        };
        output.update = output.update.with_token_metrics(self.ledger.totals_by_agent());
        output
    }

    fn bindings(&self, state: &OrchestrationState) -> ToolBindingManager {
        ToolBindingManager::new(self.workflow.bindings()).with_suggestions(&state.suggested_tools)
    }

    async fn coordinating(&self, state: &OrchestrationState) -> StepOutput {
        let mut update = StateUpdate::new();

        // First pass: seed the conversation with the goal and anything
        // long-term memory knows about it.
        let seeded;
        let view = if state.messages.is_empty() {
            update = update.append_messages([Message::user(state.active_goal.as_str())]);
            for note in self.recall(state).await {
                update = update.with_enhancement(note);
            }
            seeded = state.clone().apply(update.clone());
            &seeded
        } else {
            state
        };

        let model = &self.workflow.coordinator.model;
        let messages = coordinator_messages(&self.workflow, view, &self.bindings(state));
        let prompt_tokens: u64 = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        let request = InferenceRequest {
            model: model.clone(),
            messages,
            temperature: self.workflow.coordinator.temperature,
        };

        let response = match with_timeout(
            "coordinator inference",
            self.settings.timeouts.inference,
            self.collaborators.inference.complete(&request),
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                let attempt = state.coordinator_failures + 1;
                update = update.append_messages([Message::system(format!(
                    "{} coordinator call failed (attempt {}): {}",
                    ERROR_PREFIX, attempt, e
                ))]);
                update.coordinator_failures = Some(attempt);
                return StepOutput::new(update).event(EngineEvent::CoordinatorFailed {
                    run_id: state.run_id.clone(),
                    attempt,
                    error: e.to_string(),
                });
            }
        };

        let usage = response.usage.unwrap_or_else(|| {
            TokenTotals::new(prompt_tokens, estimate_tokens(&response.content))
        });
        self.ledger.record(
            COORDINATOR_AGENT,
            model,
            "coordinate",
            usage.input_tokens,
            usage.output_tokens,
        );

        update = update.append_messages([Message::assistant(response.content.as_str())]);
        update.coordinator_failures = Some(0);

        let cap = self.settings.limits.max_round_trips;
        match parse_reply(&response.content, state.round_trips + 1) {
            CoordinatorReply::ToolCalls(calls) if state.round_trips >= cap => {
                let dropped = calls.len();
                update = update.append_messages([Message::system(format!(
                    "Round-trip limit of {} reached; {} requested tool call(s) were not executed.",
                    cap, dropped
                ))]);
                update.pending_tool_calls = Some(Vec::new());
                StepOutput::new(update).event(EngineEvent::RoundTripCapReached {
                    run_id: state.run_id.clone(),
                    cap,
                    dropped_calls: dropped,
                })
            }
            CoordinatorReply::ToolCalls(calls) => {
                let count = calls.len();
                update.pending_tool_calls = Some(calls);
                StepOutput::new(update).event(EngineEvent::CoordinatorReplied {
                    run_id: state.run_id.clone(),
                    tool_calls: count,
                })
            }
            CoordinatorReply::FinalAnswer(answer) => {
                update.pending_tool_calls = Some(Vec::new());
                update.final_output = Some(answer);
                StepOutput::new(update).event(EngineEvent::CoordinatorReplied {
                    run_id: state.run_id.clone(),
                    tool_calls: 0,
                })
            }
        }
    }

    /// Long-term memory hits for the goal. Best effort.
    async fn recall(&self, state: &OrchestrationState) -> Vec<String> {
        if self.settings.memory_search_limit == 0 {
            return Vec::new();
        }
        let query = MemoryQuery {
            query: state.active_goal.clone(),
            agent_id: state.workflow_id.clone(),
            run_id: None,
            filters: json!({}),
            limit: self.settings.memory_search_limit,
        };
        match with_timeout(
            "memory search",
            self.settings.timeouts.memory,
            self.collaborators.memory.search(&query),
        )
        .await
        {
            Ok(records) => records
                .into_iter()
                .take(self.settings.memory_search_limit)
                .map(|r| format!("recalled: {}", truncate_chars(&r.content, 500)))
                .collect(),
            Err(e) => {
                tracing::warn!(run_id = %state.run_id, error = %e, "Long-term memory search failed");
                Vec::new()
            }
        }
    }

    async fn executing_tools(&self, state: &OrchestrationState) -> StepOutput {
        let calls = &state.pending_tool_calls;
        let bindings = self.bindings(state);
        let run_id = &state.run_id;
        let mut events = Vec::new();

        let mut observations: Vec<Option<Message>> = vec![None; calls.len()];
        let mut actions: Vec<Option<String>> = vec![None; calls.len()];
        let mut resolved: Vec<Option<ToolBinding>> = vec![None; calls.len()];
        let mut failed: HashSet<usize> = HashSet::new();

        for (i, call) in calls.iter().enumerate() {
            let binding = match bindings.executable(&call.name) {
                Ok(binding) => binding,
                Err(refusal) => {
                    observations[i] = Some(error_observation(call, refusal.to_string()));
                    failed.insert(i);
                    events.push(EngineEvent::ToolRefused {
                        run_id: run_id.clone(),
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        reason: refusal.to_string(),
                    });
                    continue;
                }
            };
            if let Err(violations) = binding.schema.validate(&call.args) {
                let detail = violations
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                observations[i] = Some(error_observation(
                    call,
                    format!("invalid arguments for '{}': {}", call.name, detail),
                ));
                failed.insert(i);
                continue;
            }
            resolved[i] = Some(binding.clone());
        }

        let plan = plan_waves(calls);
        for rejection in &plan.rejected {
            let call = &calls[rejection.index];
            if observations[rejection.index].is_none() {
                observations[rejection.index] = Some(error_observation(
                    call,
                    format!("call '{}' was not dispatched: {}", call.id, rejection.reason),
                ));
            }
            failed.insert(rejection.index);
        }

        let index_of: HashMap<&str, usize> = calls
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.as_str(), i))
            .collect();

        for (wave, indices) in plan.waves.iter().enumerate() {
            let mut runnable: Vec<(usize, ToolBinding)> = Vec::new();
            for &i in indices {
                if failed.contains(&i) {
                    continue;
                }
                let call = &calls[i];
                let failed_dep = call
                    .depends_on
                    .iter()
                    .find(|d| index_of.get(d.as_str()).is_some_and(|j| failed.contains(j)));
                if let Some(dep) = failed_dep {
                    observations[i] = Some(error_observation(
                        call,
                        format!("skipped because dependency '{}' failed", dep),
                    ));
                    failed.insert(i);
                    continue;
                }
                if let Some(binding) = resolved[i].take() {
                    events.push(EngineEvent::ToolDispatched {
                        run_id: run_id.clone(),
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        wave,
                    });
                    runnable.push((i, binding));
                }
            }

            let results = join_all(
                runnable
                    .iter()
                    .map(|(i, binding)| self.invoke(binding, &calls[*i])),
            )
            .await;

            for ((i, binding), result) in runnable.iter().zip(results) {
                let call = &calls[*i];
                let ok = result.is_ok();
                match result {
                    Ok(text) => {
                        observations[*i] = Some(Message::tool(&call.name, &call.id, text));
                        actions[*i] = Some(action_label(binding));
                    }
                    Err(e) => {
                        tracing::warn!(%run_id, call_id = %call.id, name = %call.name, error = %e, "Tool call failed");
                        observations[*i] = Some(error_observation(call, e.to_string()));
                        failed.insert(*i);
                    }
                }
                events.push(EngineEvent::ToolCompleted {
                    run_id: run_id.clone(),
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    ok,
                });
            }
        }

        let mut update = StateUpdate::new().append_messages(observations.into_iter().flatten());
        for action in actions.into_iter().flatten() {
            update = update.with_completed_action(action);
        }
        update.round_trips = Some(state.round_trips + 1);
        update.pending_tool_calls = Some(Vec::new());

        StepOutput { update, events }
    }

    async fn invoke(&self, binding: &ToolBinding, call: &ToolCall) -> Result<String, CollaboratorError> {
        let text = match &binding.target {
            BindingTarget::Tool(tool_id) => {
                let value = with_timeout(
                    &format!("tool {}", tool_id),
                    self.settings.timeouts.tool,
                    self.collaborators.tools.execute(tool_id, &call.args),
                )
                .await?;
                match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                }
            }
            BindingTarget::Agent(agent_id) => {
                let message = call
                    .args
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let reply = with_timeout(
                    &format!("agent {}", agent_id),
                    self.settings.timeouts.agent,
                    self.collaborators.agents.chat(agent_id, message, &self.thread_id),
                )
                .await?;
                let text = reply.text();
                self.ledger.record(
                    agent_id,
                    agent_id,
                    "delegate",
                    estimate_tokens(message),
                    estimate_tokens(&text),
                );
                text
            }
        };
        Ok(truncate_chars(&text, self.settings.max_observation_chars))
    }

    fn note_taking(&self, state: &OrchestrationState) -> StepOutput {
        let answer = state.final_output.clone().or_else(|| {
            state
                .last_assistant_message()
                .filter(|m| matches!(parse_reply(&m.content, 0), CoordinatorReply::FinalAnswer(_)))
                .map(|m| m.content.trim().to_string())
        });

        let update = match answer {
            Some(answer) => {
                let note = format!("note: final answer recorded ({} chars)", answer.chars().count());
                let mut update = StateUpdate::new().with_enhancement(note);
                update.final_output = Some(answer);
                update
            }
            None => StateUpdate::new().with_enhancement("note: no final answer was produced"),
        };
        StepOutput::new(update)
    }

    async fn window_tracking(&self, state: &OrchestrationState) -> StepOutput {
        let tokens = self
            .ledger
            .cumulative_total()
            .saturating_sub(state.context_baseline);
        let usage = self
            .monitor
            .evaluate(
                &self.workflow.coordinator.model,
                tokens,
                self.settings.cleanup_threshold,
            )
            .await;
        StepOutput::new(StateUpdate::new().with_needs_cleanup(usage.needs_cleanup)).event(
            EngineEvent::WindowChecked {
                run_id: state.run_id.clone(),
                usage,
            },
        )
    }

    async fn memory_wipe(&self, state: &OrchestrationState) -> StepOutput {
        match self.curator.curate(state, &self.ledger).await {
            CurationOutcome::Skipped => StepOutput::default(),
            CurationOutcome::Aborted { error } => StepOutput::new(
                StateUpdate::new().with_enhancement(format!("memory wipe aborted: {}", error)),
            )
            .event(EngineEvent::WipeAborted {
                run_id: state.run_id.clone(),
                error: error.to_string(),
            }),
            CurationOutcome::Wiped {
                wiped_messages,
                memory_persisted,
                update,
                ..
            } => StepOutput::new(update).event(EngineEvent::MemoryWiped {
                run_id: state.run_id.clone(),
                wiped_messages,
                memory_persisted,
            }),
        }
    }

    fn tool_boxing(&self, state: &OrchestrationState) -> StepOutput {
        let mut context = state.active_goal.clone();
        for message in state.messages.iter().rev().take(RECENT_MESSAGES) {
            context.push('\n');
            context.push_str(&message.content);
        }

        let workflow_names: Vec<String> = self
            .workflow
            .bindings()
            .into_iter()
            .map(|b| b.name)
            .collect();
        let exclude: Vec<&str> = workflow_names.iter().map(String::as_str).collect();
        let suggestions = suggest(
            &self.workflow.catalog,
            &context,
            &exclude,
            self.settings.suggestion_top_k,
        );

        let names = suggestions.iter().map(|s| s.name.clone()).collect();
        let mut update = StateUpdate::new();
        update.suggested_tools = Some(suggestions);
        StepOutput::new(update).event(EngineEvent::ToolsSuggested {
            run_id: state.run_id.clone(),
            names,
        })
    }

    fn graph_optimizing(&self, state: &OrchestrationState) -> StepOutput {
        let mut update = StateUpdate::new();
        let limits = &self.settings.limits;

        if state.round_trips >= limits.max_round_trips {
            update = update.with_enhancement(format!(
                "hint: round-trip cap of {} reached; raise max_round_trips or split the goal",
                limits.max_round_trips
            ));
        }

        let mut failures: BTreeMap<&str, usize> = BTreeMap::new();
        for message in &state.messages {
            if message.role == Role::Tool
                && message.content.starts_with(ERROR_PREFIX)
                && let Some(name) = &message.name
            {
                *failures.entry(name.as_str()).or_default() += 1;
            }
        }
        for (name, count) in failures {
            update = update.with_enhancement(format!(
                "hint: tool '{}' failed {} time(s) this run",
                name, count
            ));
        }

        if state.coordinator_failures > limits.max_coordinator_retries {
            update = update.with_enhancement(format!(
                "hint: coordinator failed {} consecutive time(s); check the inference backend",
                state.coordinator_failures
            ));
        }

        if state.wipe_count > 0 {
            update = update.with_enhancement(format!(
                "hint: context was wiped {} time(s); consider a larger-window model or fewer round trips",
                state.wipe_count
            ));
        }

        StepOutput::new(update)
    }
}

fn error_observation(call: &ToolCall, detail: String) -> Message {
    Message::tool(&call.name, &call.id, format!("{} {}", ERROR_PREFIX, detail))
}

fn action_label(binding: &ToolBinding) -> String {
    match binding.target {
        BindingTarget::Tool(_) => format!("tool:{}", binding.name),
        BindingTarget::Agent(_) => format!("agent:{}", binding.name),
    }
}
