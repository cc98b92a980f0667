//! Integration tests for baton
//!
//! Engine scenarios drive complete runs against scripted collaborators; the
//! CLI tests exercise the binary in a scratch project directory.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a baton Command isolated from the caller's environment
fn baton(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("baton");
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join("xdg"))
        .env_remove("BATON_BASE_URL")
        .env_remove("BATON_CLEANUP_THRESHOLD")
        .env_remove("BATON_MAX_ROUND_TRIPS")
        .env_remove("BATON_LOG_LEVEL")
        .env_remove("BATON_LOG_FORMAT")
        .env_remove("RUST_LOG");
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

// =============================================================================
// Engine scenarios
// =============================================================================

mod engine {
    use async_trait::async_trait;
    use baton::checkpoint::{
        Checkpoint, CheckpointMetadata, CheckpointPointer, CheckpointRecord, CheckpointStore,
        ListOptions, MemoryCheckpointStore,
    };
    use baton::collab::mock::{MockAgentDelegate, MockInference, MockModelSpecs, MockToolExecutor};
    use baton::collab::{Collaborators, InMemoryLongTerm, NoopLongTerm};
    use baton::compaction::ModelSpecCache;
    use baton::errors::{CheckpointError, OrchestratorError};
    use baton::ledger::{TokenLedger, TokenTotals};
    use baton::orchestrator::{ChannelSink, CollectingSink, EngineEvent, Node};
    use baton::runs::{RunStatus, RunTracker, TriggeredBy};
    use baton::state::Role;
    use baton::workflow::Workflow;
    use baton::Orchestrator;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const COORDINATOR: &str = "coord";
    const SUMMARIZER: &str = "summ";

    const WORKFLOW: &str = r#"
id = "research"
summarizer_model = "summ"

[coordinator]
model = "coord"

[[tools]]
name = "search"
description = "Search the web"
schema = { type = "object", properties = { query = { type = "string" } }, required = ["query"] }

[[tools]]
name = "fetch"
description = "Fetch a page"

[[catalog]]
name = "translate"
description = "Translate text between languages"
keywords = ["french", "german"]
"#;

    const TWO_CALLS: &str = r#"{"tool_calls": [
        {"id": "a", "name": "search", "args": {"query": "rust"}},
        {"id": "b", "name": "fetch", "args": {"url": "https://example.com"}}
    ]}"#;

    const SEARCH_CALL: &str =
        r#"{"tool_calls": [{"name": "search", "args": {"query": "again"}}]}"#;

    const SUMMARY: &str = r#"Here you go:
{"summary": "Searched twice and found three books.", "keyFacts": ["three books found"], "preservedContext": {"best": "The Book"}}"#;

    struct Scenario {
        inference: MockInference,
        tools: MockToolExecutor,
        memory: InMemoryLongTerm,
        checkpoints: Arc<dyn CheckpointStore>,
        tracker: Arc<RunTracker>,
        window: u64,
    }

    impl Scenario {
        fn new() -> Self {
            Self {
                inference: MockInference::new(),
                tools: MockToolExecutor::new(),
                memory: InMemoryLongTerm::default(),
                checkpoints: Arc::new(MemoryCheckpointStore::new()),
                tracker: Arc::new(RunTracker::in_memory()),
                window: 8_000,
            }
        }

        fn orchestrator(&self, workflow: &str) -> Orchestrator {
            let collaborators = Collaborators {
                inference: Arc::new(self.inference.clone()),
                tools: Arc::new(self.tools.clone()),
                agents: Arc::new(MockAgentDelegate::new()),
                memory: Arc::new(self.memory.clone()),
            };
            let specs = ModelSpecCache::new(
                Arc::new(MockModelSpecs::new().with_window(COORDINATOR, self.window)),
                Duration::from_secs(60),
            );
            Orchestrator::new(
                Workflow::parse(workflow).unwrap(),
                collaborators,
                Arc::new(specs),
                self.checkpoints.clone(),
                self.tracker.clone(),
            )
        }
    }

    #[tokio::test]
    async fn test_tool_calls_run_before_final_answer() {
        let scenario = Scenario::new();
        scenario.inference.push_text(COORDINATOR, TWO_CALLS);
        scenario.inference.push_text(COORDINATOR, "Three books.");
        let sink = CollectingSink::new();
        let orch = scenario.orchestrator(WORKFLOW).with_sink(Arc::new(sink.clone()));

        let outcome = orch.run("find rust books", TriggeredBy::Manual).await.unwrap();
        assert_eq!(outcome.run.status, RunStatus::Success);
        assert_eq!(outcome.output(), Some("Three books."));
        assert_eq!(scenario.tools.call_count(), 2);

        let state = outcome.state.unwrap();
        assert_eq!(state.completed_actions, vec!["tool:search", "tool:fetch"]);
        assert_eq!(state.round_trips, 1);
        assert_eq!(
            sink.visited_nodes()[..3],
            [Node::Coordinating, Node::ExecutingTools, Node::Coordinating]
        );

        // The second coordinator call sees both observations.
        let second = &scenario.inference.requests_for(COORDINATOR)[1];
        let observations = second
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .count();
        assert_eq!(observations, 2);
    }

    #[tokio::test]
    async fn test_direct_answer_never_touches_tools() {
        let scenario = Scenario::new();
        scenario.inference.push_text(COORDINATOR, "Nothing to look up.");
        let sink = CollectingSink::new();
        let orch = scenario.orchestrator(WORKFLOW).with_sink(Arc::new(sink.clone()));

        let outcome = orch.run("say hi", TriggeredBy::Manual).await.unwrap();
        assert_eq!(outcome.run.status, RunStatus::Success);
        assert_eq!(scenario.tools.call_count(), 0);
        assert!(!sink.visited_nodes().contains(&Node::ExecutingTools));
        assert!(outcome.state.unwrap().completed_actions.is_empty());
    }

    #[tokio::test]
    async fn test_window_pressure_wipes_and_persists_memory() {
        let scenario = Scenario::new();
        // Three tool round trips, then the answer: 6_800 of 8_000 tokens is
        // 85%, over the default 80% threshold.
        let calls = [
            r#"{"tool_calls": [{"name": "search", "args": {"query": "rust books"}}]}"#,
            r#"{"tool_calls": [{"name": "fetch", "args": {"url": "https://example.com/books"}}]}"#,
            r#"{"tool_calls": [{"name": "search", "args": {"query": "rust book reviews"}}]}"#,
        ];
        for call in calls {
            scenario
                .inference
                .push_with_usage(COORDINATOR, call, TokenTotals::new(1_500, 100));
        }
        scenario.inference.push_with_usage(
            COORDINATOR,
            "Three books.",
            TokenTotals::new(1_900, 100),
        );
        scenario.inference.push_text(SUMMARIZER, SUMMARY);
        let sink = CollectingSink::new();
        let orch = scenario.orchestrator(WORKFLOW).with_sink(Arc::new(sink.clone()));

        let outcome = orch.run("find rust books", TriggeredBy::Manual).await.unwrap();
        assert_eq!(outcome.run.status, RunStatus::Success);
        assert_eq!(outcome.output(), Some("Three books."));
        assert_eq!(scenario.tools.call_count(), 3);
        assert!(sink.visited_nodes().contains(&Node::MemoryWipe));

        // The summarizer is told about every completed action.
        let summarize = &scenario.inference.requests_for(SUMMARIZER)[0];
        let listed: Vec<&str> = summarize
            .messages
            .iter()
            .flat_map(|m| m.content.lines())
            .filter(|line| line.starts_with("- tool:"))
            .collect();
        assert_eq!(listed, vec!["- tool:search", "- tool:fetch", "- tool:search"]);

        let state = outcome.state.unwrap();
        assert_eq!(
            state.completed_actions,
            vec!["tool:search", "tool:fetch", "tool:search"]
        );
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].role, Role::System);
        assert!(state.messages[0].content.contains("Searched twice"));
        assert!(state.messages[0].content.contains("three books found"));
        assert!(!state.needs_cleanup);
        assert_eq!(state.wipe_count, 1);
        assert_eq!(state.preserved_facts, vec!["three books found"]);
        assert_eq!(scenario.memory.len().await, 1);

        // Goal, three call/observation pairs and the answer.
        let wiped = sink.events().into_iter().any(|e| {
            matches!(
                e,
                EngineEvent::MemoryWiped {
                    wiped_messages: 8,
                    memory_persisted: true,
                    ..
                }
            )
        });
        assert!(wiped);
        // The summarizer's tokens count toward the run.
        assert!(outcome.run.token_totals.total() > 6_800);
    }

    #[tokio::test]
    async fn test_below_threshold_keeps_conversation() {
        let scenario = Scenario::new();
        scenario.inference.push_with_usage(
            COORDINATOR,
            "Three books.",
            TokenTotals::new(5_000, 100),
        );
        let sink = CollectingSink::new();
        let orch = scenario.orchestrator(WORKFLOW).with_sink(Arc::new(sink.clone()));

        let outcome = orch.run("find rust books", TriggeredBy::Manual).await.unwrap();
        assert!(!sink.visited_nodes().contains(&Node::MemoryWipe));
        assert!(scenario.inference.requests_for(SUMMARIZER).is_empty());
        assert_eq!(outcome.state.unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_summary_leaves_messages_alone() {
        let scenario = Scenario::new();
        scenario.inference.push_with_usage(
            COORDINATOR,
            "Three books.",
            TokenTotals::new(6_000, 800),
        );
        scenario
            .inference
            .push_text(SUMMARIZER, "I could not summarize that, sorry.");
        let sink = CollectingSink::new();
        let orch = scenario.orchestrator(WORKFLOW).with_sink(Arc::new(sink.clone()));

        let outcome = orch.run("find rust books", TriggeredBy::Manual).await.unwrap();
        assert_eq!(outcome.run.status, RunStatus::Success);
        assert_eq!(outcome.output(), Some("Three books."));

        let state = outcome.state.unwrap();
        assert_eq!(state.messages.len(), 2);
        assert!(state.needs_cleanup);
        assert_eq!(state.wipe_count, 0);
        assert!(scenario.memory.is_empty().await);
        assert!(
            sink.events()
                .iter()
                .any(|e| matches!(e, EngineEvent::WipeAborted { .. }))
        );
    }

    #[tokio::test]
    async fn test_aborted_wipe_is_retried_on_next_pass_of_thread() {
        let scenario = Scenario::new();
        scenario.inference.push_with_usage(
            COORDINATOR,
            "Three books.",
            TokenTotals::new(6_000, 800),
        );
        scenario
            .inference
            .push_text(SUMMARIZER, "I could not summarize that, sorry.");
        let orch = scenario.orchestrator(WORKFLOW);

        let first = orch
            .run_on_thread("find rust books", "shelf", TriggeredBy::Manual)
            .await
            .unwrap();
        assert_eq!(first.run.status, RunStatus::Success);
        let first_state = first.state.unwrap();
        assert!(first_state.needs_cleanup);
        assert_eq!(first_state.wipe_count, 0);

        scenario.inference.push_text(COORDINATOR, "The Book is the best.");
        scenario.inference.push_text(SUMMARIZER, SUMMARY);
        let sink = CollectingSink::new();
        let orch = orch.with_sink(Arc::new(sink.clone()));

        let second = orch
            .run_on_thread("which one is best?", "shelf", TriggeredBy::Manual)
            .await
            .unwrap();
        assert_eq!(second.run.status, RunStatus::Success);
        assert_eq!(second.run.thread_id, "shelf");
        assert_eq!(
            second.run.resumed_from.as_deref(),
            Some(first.run.run_id.as_str())
        );
        assert_eq!(second.output(), Some("The Book is the best."));

        // The coordinator saw the earlier exchange followed by the new goal.
        let asked = &scenario.inference.requests_for(COORDINATOR)[1];
        let user_turns: Vec<&str> = asked
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect();
        assert!(user_turns.contains(&"find rust books"));
        assert_eq!(user_turns.last(), Some(&"which one is best?"));

        assert_eq!(scenario.inference.requests_for(SUMMARIZER).len(), 2);
        assert!(sink.visited_nodes().contains(&Node::MemoryWipe));
        let state = second.state.unwrap();
        assert!(!state.needs_cleanup);
        assert_eq!(state.wipe_count, 1);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.preserved_facts, vec!["three books found"]);
        assert!(sink.events().iter().any(|e| matches!(
            e,
            EngineEvent::MemoryWiped {
                wiped_messages: 4,
                ..
            }
        )));

        // The thread's checkpoint chain continues from the first run.
        let records = orch
            .checkpoints()
            .list("shelf", &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(records.len() as u64, second.steps);
        assert!(second.steps > first.steps);
    }

    #[tokio::test]
    async fn test_round_trip_cap_stops_tool_loop() {
        let scenario = Scenario {
            inference: MockInference::new().with_fallback(SEARCH_CALL),
            ..Scenario::new()
        };
        let workflow = format!("max_round_trips = 2\n{}", WORKFLOW);
        let sink = CollectingSink::new();
        let orch = scenario.orchestrator(&workflow).with_sink(Arc::new(sink.clone()));

        let outcome = orch.run("search forever", TriggeredBy::Manual).await.unwrap();
        assert_eq!(outcome.run.status, RunStatus::Success);
        assert_eq!(scenario.tools.call_count(), 2);
        assert_eq!(scenario.inference.requests_for(COORDINATOR).len(), 3);

        let state = outcome.state.unwrap();
        assert_eq!(state.round_trips, 2);
        assert!(state.pending_tool_calls.is_empty());
        assert!(state.final_output.is_none());
        assert!(
            state
                .context_enhancements
                .iter()
                .any(|e| e.starts_with("hint: round-trip cap of 2"))
        );
        assert!(sink.events().iter().any(|e| matches!(
            e,
            EngineEvent::RoundTripCapReached { cap: 2, .. }
        )));
    }

    #[tokio::test]
    async fn test_suggested_tool_is_refused_when_called() {
        let scenario = Scenario::new();
        scenario.inference.push_text(
            COORDINATOR,
            r#"{"tool_calls": [{"name": "translate", "args": {"text": "bonjour"}}]}"#,
        );
        scenario.inference.push_text(COORDINATOR, "I cannot translate here.");
        let sink = CollectingSink::new();
        let orch = scenario.orchestrator(WORKFLOW).with_sink(Arc::new(sink.clone()));

        let outcome = orch
            .run("translate my notes into french", TriggeredBy::Manual)
            .await
            .unwrap();
        assert_eq!(outcome.run.status, RunStatus::Success);
        assert_eq!(scenario.tools.call_count(), 0);

        let state = outcome.state.unwrap();
        let observation = state
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert!(observation.content.starts_with("error:"));
        assert!(state.completed_actions.is_empty());
        // Still surfaced as a suggestion for the next pass.
        assert!(state.suggested_tools.iter().any(|t| t.name == "translate"));
        assert!(
            sink.events()
                .iter()
                .any(|e| matches!(e, EngineEvent::ToolRefused { name, .. } if name == "translate"))
        );
    }

    #[tokio::test]
    async fn test_shared_ledger_keeps_runs_apart() {
        let ledger = TokenLedger::new();
        let a = Scenario {
            inference: MockInference::new().with_delay(Duration::from_millis(30)),
            ..Scenario::new()
        };
        a.inference
            .push_with_usage(COORDINATOR, "A done.", TokenTotals::new(100, 10));
        let b = Scenario {
            inference: MockInference::new().with_delay(Duration::from_millis(30)),
            ..Scenario::new()
        };
        b.inference
            .push_with_usage(COORDINATOR, "B done.", TokenTotals::new(500, 50));

        let orch_a = a.orchestrator(WORKFLOW).with_ledger(ledger.clone());
        let orch_b = b.orchestrator(WORKFLOW).with_ledger(ledger.clone());
        let (run_a, run_b) = tokio::join!(
            orch_a.run("goal a", TriggeredBy::Manual),
            orch_b.run("goal b", TriggeredBy::Cron {
                trigger_id: "nightly".into()
            }),
        );
        let (run_a, run_b) = (run_a.unwrap(), run_b.unwrap());

        assert_eq!(run_a.run.token_totals, TokenTotals::new(100, 10));
        assert_eq!(run_b.run.token_totals, TokenTotals::new(500, 50));
        assert_eq!(run_a.output(), Some("A done."));
        assert_eq!(run_b.output(), Some("B done."));
        assert!(ledger.active_runs().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_runs_on_one_orchestrator() {
        let scenario = Scenario {
            inference: MockInference::new()
                .with_fallback("ok")
                .with_delay(Duration::from_millis(10)),
            ..Scenario::new()
        };
        let orch = scenario.orchestrator(WORKFLOW);

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let orch = orch.clone();
                tokio::spawn(async move {
                    orch.run(&format!("goal {}", i), TriggeredBy::Manual).await
                })
            })
            .collect();

        let mut threads = std::collections::HashSet::new();
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome.run.status, RunStatus::Success);
            threads.insert(outcome.run.thread_id.clone());
        }
        assert_eq!(threads.len(), 5);
        assert_eq!(orch.tracker().stats(&Default::default()).total, 5);
        assert!(orch.ledger().active_runs().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_run() {
        let scenario = Scenario {
            inference: MockInference::new()
                .with_fallback("late")
                .with_delay(Duration::from_secs(30)),
            ..Scenario::new()
        };
        let (sink, mut events) = ChannelSink::new();
        let orch = scenario.orchestrator(WORKFLOW).with_sink(Arc::new(sink));

        let task = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.run("slow goal", TriggeredBy::Manual).await })
        };

        let run_id = loop {
            match events.recv().await.unwrap() {
                EngineEvent::RunStarted { run_id, .. } => break run_id,
                _ => continue,
            }
        };
        assert!(orch.is_active(&run_id));
        assert!(orch.cancel(&run_id));

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome.run.status, RunStatus::Cancelled);
        assert!(matches!(outcome.failure, Some(OrchestratorError::Cancelled { .. })));
        assert!(!orch.is_active(&run_id));
        assert!(!orch.cancel(&run_id));
    }

    #[tokio::test]
    async fn test_invalid_workflow_fails_before_first_step() {
        let scenario = Scenario::new();
        let sink = CollectingSink::new();
        let orch = scenario
            .orchestrator("id = \"broken\"\n[[tools]]\nname = \"search\"")
            .with_sink(Arc::new(sink.clone()));

        let outcome = orch.run("anything", TriggeredBy::Manual).await.unwrap();
        assert_eq!(outcome.run.status, RunStatus::Error);
        assert_eq!(outcome.steps, 0);
        assert!(outcome.state.is_none());
        assert!(matches!(
            outcome.failure,
            Some(OrchestratorError::Configuration(_))
        ));
        assert!(sink.visited_nodes().is_empty());
        assert!(scenario.inference.requests().is_empty());
        assert_eq!(
            orch.tracker().get(&outcome.run.run_id).unwrap().status,
            RunStatus::Error
        );
    }

    /// Store that starts refusing writes after `allowed` puts.
    struct FlakyStore {
        inner: MemoryCheckpointStore,
        puts: AtomicUsize,
        allowed: AtomicUsize,
    }

    #[async_trait]
    impl CheckpointStore for FlakyStore {
        async fn put(
            &self,
            thread_id: &str,
            checkpoint: Checkpoint,
            metadata: CheckpointMetadata,
        ) -> Result<CheckpointPointer, CheckpointError> {
            if self.puts.fetch_add(1, Ordering::SeqCst) >= self.allowed.load(Ordering::SeqCst) {
                return Err(CheckpointError::Io {
                    path: "flaky".into(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.inner.put(thread_id, checkpoint, metadata).await
        }

        async fn get(
            &self,
            thread_id: &str,
            checkpoint_id: Option<&str>,
        ) -> Result<Option<CheckpointRecord>, CheckpointError> {
            self.inner.get(thread_id, checkpoint_id).await
        }

        async fn list(
            &self,
            thread_id: &str,
            options: &ListOptions,
        ) -> Result<Vec<CheckpointRecord>, CheckpointError> {
            self.inner.list(thread_id, options).await
        }

        async fn delete_thread(&self, thread_id: &str) -> Result<usize, CheckpointError> {
            self.inner.delete_thread(thread_id).await
        }

        async fn list_threads(&self) -> Result<Vec<String>, CheckpointError> {
            self.inner.list_threads().await
        }
    }

    #[tokio::test]
    async fn test_checkpoint_failure_then_resume() {
        let store = Arc::new(FlakyStore {
            inner: MemoryCheckpointStore::new(),
            puts: AtomicUsize::new(0),
            allowed: AtomicUsize::new(2),
        });
        let scenario = Scenario {
            checkpoints: store.clone(),
            ..Scenario::new()
        };
        scenario.inference.push_text(COORDINATOR, "42");
        let orch = scenario.orchestrator(WORKFLOW);

        let first = orch
            .run_on_thread("answer", "thread-7", TriggeredBy::Manual)
            .await
            .unwrap();
        assert_eq!(first.run.status, RunStatus::Error);
        assert_eq!(first.steps, 3);
        assert!(matches!(
            first.failure,
            Some(OrchestratorError::CheckpointIo(_))
        ));
        assert!(first.run.error.as_deref().unwrap().contains("disk full"));

        // A thread stopped mid-run takes no new goal until it is resumed.
        assert!(matches!(
            orch.run_on_thread("another goal", "thread-7", TriggeredBy::Manual)
                .await,
            Err(OrchestratorError::ThreadInProgress { .. })
        ));

        store.allowed.store(usize::MAX, Ordering::SeqCst);
        let resumed = orch.resume("thread-7", TriggeredBy::Manual).await.unwrap();
        assert_eq!(resumed.run.status, RunStatus::Success);
        assert_eq!(resumed.run.thread_id, "thread-7");
        assert_eq!(
            resumed.run.resumed_from.as_deref(),
            Some(first.run.run_id.as_str())
        );
        assert_eq!(resumed.output(), Some("42"));
        assert_eq!(resumed.steps, 5);
        // The coordinator's answer came from the first run; nothing is re-asked.
        assert_eq!(scenario.inference.requests_for(COORDINATOR).len(), 1);
        // The resumed run carries the first run's token usage.
        assert_eq!(resumed.run.token_totals, first.run.token_totals);

        let records = store
            .list("thread-7", &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 5);

        let again = orch.resume("thread-7", TriggeredBy::Manual).await;
        assert!(matches!(
            again,
            Err(OrchestratorError::ThreadFinished { .. })
        ));
    }

    #[tokio::test]
    async fn test_wiped_run_remembers_across_runs() {
        let scenario = Scenario::new();
        scenario.inference.push_with_usage(
            COORDINATOR,
            "Three books.",
            TokenTotals::new(6_000, 800),
        );
        scenario.inference.push_text(SUMMARIZER, SUMMARY);
        scenario.inference.push_text(COORDINATOR, "Still three books.");
        let orch = scenario.orchestrator(WORKFLOW);

        orch.run("find rust books", TriggeredBy::Manual).await.unwrap();
        let second = orch.run("find rust books", TriggeredBy::Manual).await.unwrap();

        let state = second.state.unwrap();
        assert!(
            state
                .context_enhancements
                .iter()
                .any(|e| e.starts_with("recalled:"))
        );
    }

    #[tokio::test]
    async fn test_noop_memory_recalls_nothing() {
        let scenario = Scenario::new();
        scenario.inference.push_text(COORDINATOR, "ok");
        let collaborators = Collaborators {
            inference: Arc::new(scenario.inference.clone()),
            tools: Arc::new(scenario.tools.clone()),
            agents: Arc::new(MockAgentDelegate::new()),
            memory: Arc::new(NoopLongTerm),
        };
        let specs = ModelSpecCache::new(Arc::new(MockModelSpecs::new()), Duration::from_secs(60));
        let orch = Orchestrator::new(
            Workflow::parse(WORKFLOW).unwrap(),
            collaborators,
            Arc::new(specs),
            scenario.checkpoints.clone(),
            scenario.tracker.clone(),
        );

        let outcome = orch.run("goal", TriggeredBy::Manual).await.unwrap();
        let state = outcome.state.unwrap();
        assert!(
            !state
                .context_enhancements
                .iter()
                .any(|e| e.starts_with("recalled:"))
        );
    }
}

// =============================================================================
// CLI
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_baton_help() {
        let dir = create_temp_project();
        baton(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Run a workflow"));
    }

    #[test]
    fn test_baton_version() {
        let dir = create_temp_project();
        baton(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_run_requires_goal() {
        let dir = create_temp_project();
        baton(&dir)
            .args(["run", "--workflow", "wf.toml"])
            .assert()
            .failure();
    }
}

mod cli_config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();
        baton(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using defaults"))
            .stdout(predicate::str::contains("cleanup_threshold = \"80%\""));
    }

    #[test]
    fn test_config_show_applies_cli_overrides() {
        let dir = create_temp_project();
        baton(&dir)
            .args(["--base-url", "http://collab:9000", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("http://collab:9000"));
    }

    #[test]
    fn test_config_init_writes_file_once() {
        let dir = create_temp_project();
        baton(&dir).args(["config", "init"]).assert().success();
        let path = dir.path().join(".baton").join("baton.toml");
        assert!(path.exists());
        assert!(fs::read_to_string(&path).unwrap().contains("[engine]"));

        baton(&dir)
            .args(["config", "init"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--force"));
        baton(&dir)
            .args(["config", "init", "--force"])
            .assert()
            .success();
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".baton")).unwrap();
        fs::write(
            dir.path().join(".baton/baton.toml"),
            "[engine]\ncleanup_threshold = \"150%\"\n",
        )
        .unwrap();

        baton(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Invalid cleanup_threshold"))
            .stdout(predicate::str::contains("base_url"));
    }

    #[test]
    fn test_config_validate_clean() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".baton")).unwrap();
        fs::write(
            dir.path().join(".baton/baton.toml"),
            "[collaborators]\nbase_url = \"http://localhost:8080\"\n",
        )
        .unwrap();

        baton(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_broken_config_file_is_an_error() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".baton")).unwrap();
        fs::write(dir.path().join(".baton/baton.toml"), "[engine\n").unwrap();

        baton(&dir)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("could not be loaded"));
    }
}

mod cli_history {
    use super::*;

    const BROKEN_WORKFLOW: &str = "id = \"broken\"\n";

    #[test]
    fn test_runs_list_empty() {
        let dir = create_temp_project();
        baton(&dir)
            .args(["runs", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No runs found."));
    }

    #[test]
    fn test_runs_show_unknown() {
        let dir = create_temp_project();
        baton(&dir)
            .args(["runs", "show", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not found"));
    }

    #[test]
    fn test_runs_list_rejects_unknown_status() {
        let dir = create_temp_project();
        baton(&dir)
            .args(["runs", "list", "--status", "sideways"])
            .assert()
            .failure();
    }

    #[test]
    fn test_checkpoints_empty_thread() {
        let dir = create_temp_project();
        baton(&dir)
            .args(["checkpoints", "list", "t1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No checkpoints for thread 't1'."));
        baton(&dir)
            .args(["checkpoints", "threads"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No checkpoint threads found."));
    }

    #[test]
    fn test_checkpoints_delete_requires_force() {
        let dir = create_temp_project();
        baton(&dir)
            .args(["checkpoints", "delete", "t1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--force"));
        baton(&dir)
            .args(["checkpoints", "delete", "t1", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Deleted 0 checkpoint(s)"));
    }

    #[test]
    fn test_run_without_base_url_fails() {
        let dir = create_temp_project();
        fs::write(dir.path().join("wf.toml"), "id = \"wf\"\n[coordinator]\nmodel = \"m\"\n")
            .unwrap();
        baton(&dir)
            .args(["run", "--workflow", "wf.toml", "hello"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No collaborator base URL"));
    }

    #[test]
    fn test_run_with_missing_workflow_file_fails() {
        let dir = create_temp_project();
        baton(&dir)
            .args(["--base-url", "http://127.0.0.1:9", "run", "-w", "missing.toml", "hi"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read workflow"));
    }

    #[test]
    fn test_rejected_run_is_recorded() {
        let dir = create_temp_project();
        fs::write(dir.path().join("wf.toml"), BROKEN_WORKFLOW).unwrap();

        // Validation fails before any collaborator is contacted.
        baton(&dir)
            .args([
                "--base-url",
                "http://127.0.0.1:9",
                "run",
                "--workflow",
                "wf.toml",
                "--cron",
                "nightly",
                "do",
                "things",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("status error"));

        baton(&dir)
            .args(["runs", "list", "--status", "error", "--trigger", "cron"])
            .assert()
            .success()
            .stdout(predicate::str::contains("broken"))
            .stdout(predicate::str::contains("cron(nightly)"));

        baton(&dir)
            .args(["runs", "stats"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Total runs:   1"));
    }
}
