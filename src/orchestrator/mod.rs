//! Run execution.
//!
//! The [`Orchestrator`] owns the collaborators and shared services and drives
//! a run through the state machine one step at a time:
//!
//! 1. register a [`TrackedRun`] and validate the workflow
//! 2. run the step for the current node and merge its update
//! 3. pick the next node and checkpoint a [`RunSnapshot`]
//! 4. finalize the tracked run once `end` is reached, the run is cancelled,
//!    or a checkpoint write fails
//!
//! Runs are independent. One orchestrator can drive many at once; clone it
//! into spawned tasks.

pub mod dispatch;
pub mod events;
pub mod machine;
pub mod prompt;
pub mod runner;
pub mod settings;

pub use events::{ChannelSink, CollectingSink, EngineEvent, EventSink, TracingSink};
pub use machine::{Limits, Node, next_node};
pub use runner::{COORDINATOR_AGENT, StepOutput, StepRunner};
pub use settings::{EngineSettings, ModelRates, Timeouts};

use crate::checkpoint::{Checkpoint, CheckpointMetadata, CheckpointPointer, CheckpointStore};
use crate::collab::Collaborators;
use crate::compaction::ModelSpecCache;
use crate::errors::{CheckpointError, OrchestratorError};
use crate::ledger::{RunLedger, TokenCheckpoint, TokenLedger};
use crate::runs::{NewRun, RunTracker, TrackedRun, TriggeredBy};
use crate::state::OrchestrationState;
use crate::workflow::Workflow;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// What a checkpoint holds: everything needed to continue the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub state: OrchestrationState,
    /// Node to run on resume.
    pub next_node: Node,
    /// Steps completed so far.
    pub step: u64,
    #[serde(default)]
    pub ledger: Vec<TokenCheckpoint>,
}

/// Result of a run.
#[derive(Debug)]
pub struct RunOutcome {
    /// The finalized record.
    pub run: TrackedRun,
    /// Final state; `None` when the run failed before its first step.
    pub state: Option<OrchestrationState>,
    pub steps: u64,
    /// Why the run did not succeed.
    pub failure: Option<OrchestratorError>,
}

impl RunOutcome {
    pub fn output(&self) -> Option<&str> {
        self.run.output.as_deref()
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    workflow: Arc<Workflow>,
    collaborators: Collaborators,
    specs: Arc<ModelSpecCache>,
    ledger: TokenLedger,
    checkpoints: Arc<dyn CheckpointStore>,
    tracker: Arc<RunTracker>,
    settings: EngineSettings,
    sinks: Vec<Arc<dyn EventSink>>,
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl Orchestrator {
    pub fn new(
        workflow: Workflow,
        collaborators: Collaborators,
        specs: Arc<ModelSpecCache>,
        checkpoints: Arc<dyn CheckpointStore>,
        tracker: Arc<RunTracker>,
    ) -> Self {
        let settings = EngineSettings::default().for_workflow(&workflow);
        Self {
            workflow: Arc::new(workflow),
            collaborators,
            specs,
            ledger: TokenLedger::new(),
            checkpoints,
            tracker,
            settings,
            sinks: Vec::new(),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Global settings; the workflow's own overrides still win.
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings.for_workflow(&self.workflow);
        self
    }

    /// Share a ledger registry with other orchestrators.
    pub fn with_ledger(mut self, ledger: TokenLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    pub fn tracker(&self) -> &Arc<RunTracker> {
        &self.tracker
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Start a run on a fresh thread named after the run.
    pub async fn run(
        &self,
        goal: &str,
        trigger: TriggeredBy,
    ) -> Result<RunOutcome, OrchestratorError> {
        self.start(goal, None, trigger).await
    }

    /// Start a run whose checkpoints go to `thread_id`.
    ///
    /// A new thread starts from a blank state. A thread whose last run reached
    /// `end` is continued: the conversation, curated memory, pending cleanup
    /// flag and token ledger carry over and `goal` is appended as the next
    /// user message, so a wipe that was aborted earlier is retried. A thread
    /// stopped mid-run must be resumed instead.
    pub async fn run_on_thread(
        &self,
        goal: &str,
        thread_id: &str,
        trigger: TriggeredBy,
    ) -> Result<RunOutcome, OrchestratorError> {
        let Some((checkpoint_id, snapshot)) = self.latest_snapshot(thread_id).await? else {
            return self.start(goal, Some(thread_id.to_string()), trigger).await;
        };
        if snapshot.next_node != Node::End {
            return Err(OrchestratorError::ThreadInProgress {
                thread_id: thread_id.to_string(),
            });
        }

        let mut new = NewRun::new(&self.workflow.id, goal, trigger);
        new.thread_id = Some(thread_id.to_string());
        new.resumed_from = Some(snapshot.state.run_id.clone());
        let run = self.tracker.create_run(new).await?;

        if let Err(e) = self.check_thread_workflow(thread_id, &snapshot.state) {
            return self.reject(run, e).await;
        }
        if let Err(e) = self.workflow.validate() {
            return self.reject(run, e).await;
        }
        self.tracker.start_run(&run.run_id).await?;

        tracing::info!(
            run_id = %run.run_id,
            %thread_id,
            previous_run = %snapshot.state.run_id,
            needs_cleanup = snapshot.state.needs_cleanup,
            "Continuing finished thread"
        );

        let ledger = self.ledger.for_run(&run.run_id);
        ledger.import(snapshot.ledger);
        let state = snapshot.state.continue_with(&run.run_id, goal);
        self.drive(
            run,
            state,
            Node::Coordinating,
            snapshot.step,
            ledger,
            Some(checkpoint_id),
        )
        .await
    }

    async fn start(
        &self,
        goal: &str,
        thread_id: Option<String>,
        trigger: TriggeredBy,
    ) -> Result<RunOutcome, OrchestratorError> {
        let mut new = NewRun::new(&self.workflow.id, goal, trigger);
        new.thread_id = thread_id;
        let run = self.tracker.create_run(new).await?;

        if let Err(e) = self.workflow.validate() {
            return self.reject(run, e).await;
        }
        self.tracker.start_run(&run.run_id).await?;

        let state = OrchestrationState::new(&run.run_id, &self.workflow.id, goal);
        let ledger = self.ledger.for_run(&run.run_id);
        self.drive(run, state, Node::Coordinating, 0, ledger, None)
            .await
    }

    /// Continue a thread from its latest checkpoint as a new run.
    ///
    /// The new run keeps the thread, inherits the snapshot's ledger entries and
    /// records the run it resumed from.
    pub async fn resume(
        &self,
        thread_id: &str,
        trigger: TriggeredBy,
    ) -> Result<RunOutcome, OrchestratorError> {
        let (checkpoint_id, snapshot) = self.latest_snapshot(thread_id).await?.ok_or_else(|| {
            OrchestratorError::NothingToResume {
                thread_id: thread_id.to_string(),
            }
        })?;
        if snapshot.next_node == Node::End {
            return Err(OrchestratorError::ThreadFinished {
                thread_id: thread_id.to_string(),
            });
        }

        let mut new = NewRun::new(
            &self.workflow.id,
            &snapshot.state.active_goal,
            trigger,
        );
        new.thread_id = Some(thread_id.to_string());
        new.resumed_from = Some(snapshot.state.run_id.clone());
        let run = self.tracker.create_run(new).await?;

        if let Err(e) = self.check_thread_workflow(thread_id, &snapshot.state) {
            return self.reject(run, e).await;
        }
        if let Err(e) = self.workflow.validate() {
            return self.reject(run, e).await;
        }
        self.tracker.start_run(&run.run_id).await?;

        tracing::info!(
            run_id = %run.run_id,
            %thread_id,
            resumed_from = %snapshot.state.run_id,
            node = %snapshot.next_node,
            step = snapshot.step,
            "Resuming thread"
        );

        let ledger = self.ledger.for_run(&run.run_id);
        ledger.import(snapshot.ledger);
        let mut state = snapshot.state;
        state.run_id = run.run_id.clone();
        self.drive(
            run,
            state,
            snapshot.next_node,
            snapshot.step,
            ledger,
            Some(checkpoint_id),
        )
        .await
    }

    /// Latest checkpoint of a thread and its decoded snapshot.
    async fn latest_snapshot(
        &self,
        thread_id: &str,
    ) -> Result<Option<(String, RunSnapshot)>, OrchestratorError> {
        let limit = self.settings.timeouts.checkpoint;
        let record = tokio::time::timeout(limit, self.checkpoints.get(thread_id, None))
            .await
            .map_err(|_| CheckpointError::Timeout {
                operation: "get",
                secs: limit.as_secs(),
            })??;
        let Some(record) = record else {
            return Ok(None);
        };

        let snapshot: RunSnapshot = serde_json::from_value(record.checkpoint.snapshot)
            .map_err(|e| OrchestratorError::CorruptSnapshot {
                thread_id: thread_id.to_string(),
                message: e.to_string(),
            })?;
        Ok(Some((record.checkpoint.checkpoint_id, snapshot)))
    }

    fn check_thread_workflow(
        &self,
        thread_id: &str,
        state: &OrchestrationState,
    ) -> Result<(), OrchestratorError> {
        if state.workflow_id == self.workflow.id {
            return Ok(());
        }
        Err(OrchestratorError::Configuration(format!(
            "thread {} belongs to workflow '{}', not '{}'",
            thread_id, state.workflow_id, self.workflow.id
        )))
    }

    /// Request cancellation. Returns `false` when the run is not active here.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.active_runs().get(run_id) {
            Some(token) => {
                tracing::info!(%run_id, "Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, run_id: &str) -> bool {
        self.active_runs().contains_key(run_id)
    }

    fn active_runs(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail a run that never reached its first step.
    async fn reject(
        &self,
        run: TrackedRun,
        error: OrchestratorError,
    ) -> Result<RunOutcome, OrchestratorError> {
        tracing::error!(run_id = %run.run_id, %error, "Run rejected before its first step");
        let run = self
            .tracker
            .fail_run(&run.run_id, &error.to_string(), Default::default(), 0.0)
            .await?;
        self.emit(&EngineEvent::RunFinished {
            run_id: run.run_id.clone(),
            status: run.status,
        });
        Ok(RunOutcome {
            run,
            state: None,
            steps: 0,
            failure: Some(error),
        })
    }

    async fn drive(
        &self,
        run: TrackedRun,
        mut state: OrchestrationState,
        mut node: Node,
        mut step: u64,
        ledger: RunLedger,
        mut parent: Option<String>,
    ) -> Result<RunOutcome, OrchestratorError> {
        let run_id = run.run_id.clone();
        let thread_id = run.thread_id.clone();
        let token = CancellationToken::new();
        self.active_runs().insert(run_id.clone(), token.clone());

        self.emit(&EngineEvent::RunStarted {
            run_id: run_id.clone(),
            workflow_id: self.workflow.id.clone(),
            thread_id: thread_id.clone(),
        });

        let runner = StepRunner::new(
            self.workflow.clone(),
            self.collaborators.clone(),
            self.specs.clone(),
            ledger.clone(),
            self.settings.clone(),
            &thread_id,
        );

        let result: Result<(), OrchestratorError> = loop {
            if token.is_cancelled() {
                break Err(OrchestratorError::Cancelled {
                    run_id: run_id.clone(),
                });
            }
            if node == Node::End {
                break Ok(());
            }

            self.emit(&EngineEvent::StepStarted {
                run_id: run_id.clone(),
                step,
                node,
            });

            let output = tokio::select! {
                output = runner.step(node, &state) => Some(output),
                _ = token.cancelled() => None,
            };
            let Some(output) = output else {
                break Err(OrchestratorError::Cancelled {
                    run_id: run_id.clone(),
                });
            };

            for event in &output.events {
                self.emit(event);
            }
            state = state.apply(output.update);
            let next = next_node(node, &state, &self.settings.limits);
            step += 1;

            self.emit(&EngineEvent::StepCompleted {
                run_id: run_id.clone(),
                step,
                node,
                next,
            });

            match self
                .save_checkpoint(&thread_id, &state, node, next, step, &ledger, parent.take())
                .await
            {
                Ok(pointer) => {
                    self.emit(&EngineEvent::CheckpointSaved {
                        run_id: run_id.clone(),
                        thread_id: thread_id.clone(),
                        checkpoint_id: pointer.checkpoint_id.clone(),
                    });
                    parent = Some(pointer.checkpoint_id);
                }
                Err(e) => {
                    tracing::error!(%run_id, %thread_id, error = %e, "Checkpoint write failed");
                    break Err(e.into());
                }
            }
            node = next;
        };

        self.active_runs().remove(&run_id);

        let totals = ledger.totals();
        let cost = self.settings.cost_usd(&ledger.totals_by_model());
        let finished = match &result {
            Ok(()) => {
                self.tracker
                    .complete_run(&run_id, state.final_output.clone(), totals, cost)
                    .await
            }
            Err(OrchestratorError::Cancelled { .. }) => {
                self.tracker
                    .cancel_run(&run_id, "cancelled by request", totals, cost)
                    .await
            }
            Err(e) => {
                self.tracker
                    .fail_run(&run_id, &e.to_string(), totals, cost)
                    .await
            }
        };
        self.ledger.release(&run_id);
        let finished = finished?;

        self.emit(&EngineEvent::RunFinished {
            run_id: run_id.clone(),
            status: finished.status,
        });

        Ok(RunOutcome {
            run: finished,
            state: Some(state),
            steps: step,
            failure: result.err(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn save_checkpoint(
        &self,
        thread_id: &str,
        state: &OrchestrationState,
        node: Node,
        next: Node,
        step: u64,
        ledger: &RunLedger,
        parent: Option<String>,
    ) -> Result<CheckpointPointer, CheckpointError> {
        let snapshot = RunSnapshot {
            state: state.clone(),
            next_node: next,
            step,
            ledger: ledger.export(),
        };
        let checkpoint = Checkpoint::new(serde_json::to_value(&snapshot)?, parent);
        let metadata = CheckpointMetadata {
            run_id: state.run_id.clone(),
            step,
            node: node.to_string(),
            note: None,
        };

        let limit = self.settings.timeouts.checkpoint;
        tokio::time::timeout(limit, self.checkpoints.put(thread_id, checkpoint, metadata))
            .await
            .map_err(|_| CheckpointError::Timeout {
                operation: "put",
                secs: limit.as_secs(),
            })?
    }

    fn emit(&self, event: &EngineEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::collab::mock::{MockAgentDelegate, MockInference, MockModelSpecs, MockToolExecutor};
    use crate::collab::NoopLongTerm;
    use crate::runs::RunStatus;
    use std::time::Duration;

    fn orchestrator(workflow: &str, inference: MockInference) -> Orchestrator {
        let collaborators = Collaborators {
            inference: Arc::new(inference),
            tools: Arc::new(MockToolExecutor::new()),
            agents: Arc::new(MockAgentDelegate::new()),
            memory: Arc::new(NoopLongTerm),
        };
        let specs = ModelSpecCache::new(
            Arc::new(MockModelSpecs::new().with_window("m", 100_000)),
            Duration::from_secs(60),
        );
        Orchestrator::new(
            Workflow::parse(workflow).unwrap(),
            collaborators,
            Arc::new(specs),
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(RunTracker::in_memory()),
        )
    }

    const WORKFLOW: &str = "id = \"wf\"\n[coordinator]\nmodel = \"m\"";

    #[tokio::test]
    async fn test_direct_answer_walks_shadow_pipeline() {
        let inference = MockInference::new();
        inference.push_text("m", "42");
        let sink = CollectingSink::new();
        let orch = orchestrator(WORKFLOW, inference).with_sink(Arc::new(sink.clone()));

        let outcome = orch.run("answer", TriggeredBy::Manual).await.unwrap();
        assert_eq!(outcome.run.status, RunStatus::Success);
        assert_eq!(outcome.output(), Some("42"));
        assert_eq!(
            sink.visited_nodes(),
            vec![
                Node::Coordinating,
                Node::NoteTaking,
                Node::WindowTracking,
                Node::ToolBoxing,
                Node::GraphOptimizing,
            ]
        );
        assert_eq!(outcome.steps, 5);
        assert!(orch.ledger().active_runs().is_empty());
        assert!(!orch.is_active(&outcome.run.run_id));
    }

    #[tokio::test]
    async fn test_checkpoint_after_every_step() {
        let inference = MockInference::new();
        inference.push_text("m", "done");
        let orch = orchestrator(WORKFLOW, inference);
        let outcome = orch.run("goal", TriggeredBy::Manual).await.unwrap();

        let records = orch
            .checkpoints()
            .list(&outcome.run.thread_id, &Default::default())
            .await
            .unwrap();
        assert_eq!(records.len() as u64, outcome.steps);
        let latest: RunSnapshot =
            serde_json::from_value(records[0].checkpoint.snapshot.clone()).unwrap();
        assert_eq!(latest.next_node, Node::End);
        assert_eq!(
            records[0].checkpoint.parent_checkpoint_id.as_deref(),
            Some(records[1].checkpoint.checkpoint_id.as_str())
        );
    }

    #[tokio::test]
    async fn test_missing_coordinator_model_fails_before_any_step() {
        let sink = CollectingSink::new();
        let orch = orchestrator("id = \"wf\"", MockInference::new()).with_sink(Arc::new(sink.clone()));
        let outcome = orch.run("goal", TriggeredBy::Manual).await.unwrap();
        assert_eq!(outcome.run.status, RunStatus::Error);
        assert_eq!(outcome.steps, 0);
        assert!(outcome.run.error.unwrap().contains("coordinator model"));
        assert!(matches!(outcome.failure, Some(OrchestratorError::Configuration(_))));
        assert!(sink.visited_nodes().is_empty());
    }

    #[tokio::test]
    async fn test_resume_finished_thread_is_refused() {
        let inference = MockInference::new();
        inference.push_text("m", "done");
        let orch = orchestrator(WORKFLOW, inference);
        let outcome = orch.run("goal", TriggeredBy::Manual).await.unwrap();
        let err = orch
            .resume(&outcome.run.thread_id, TriggeredBy::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ThreadFinished { .. }));
        assert!(matches!(
            orch.resume("nobody", TriggeredBy::Manual).await.unwrap_err(),
            OrchestratorError::NothingToResume { .. }
        ));
    }

    #[test]
    fn test_cancel_unknown_run() {
        let orch = orchestrator(WORKFLOW, MockInference::new());
        assert!(!orch.cancel("nope"));
    }
}
