//! Workflow execution commands: `baton run` and `baton resume`.

use anyhow::{Context, Result, bail};
use baton::checkpoint::FileCheckpointStore;
use baton::collab::http::HttpCollaborator;
use baton::collab::{Collaborators, LongTermMemory, NoopLongTerm};
use baton::compaction::ModelSpecCache;
use baton::config::BatonConfig;
use baton::orchestrator::{ChannelSink, EngineEvent, TracingSink};
use baton::runs::{RunStatus, RunTracker, TriggeredBy};
use baton::workflow::Workflow;
use baton::{Orchestrator, RunOutcome};
use console::style;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Wire the HTTP collaborators, file-backed stores and configured settings
/// around `workflow`.
pub async fn build_orchestrator(config: &BatonConfig, workflow: Workflow) -> Result<Orchestrator> {
    let toml = &config.toml;
    let base_url = toml.collaborators.base_url.as_deref().context(
        "No collaborator base URL configured. Set [collaborators] base_url, BATON_BASE_URL or --base-url",
    )?;

    // Per-call limits are applied by the engine; the client limit only has to
    // cover the longest of them.
    let timeouts = toml.timeouts.to_timeouts();
    let client_timeout = [
        timeouts.inference,
        timeouts.tool,
        timeouts.agent,
        timeouts.summarize,
    ]
    .into_iter()
    .max()
    .unwrap_or(timeouts.inference);

    let http = Arc::new(
        HttpCollaborator::new(base_url, client_timeout)?
            .with_inference_path(&toml.collaborators.inference_path),
    );
    let memory: Arc<dyn LongTermMemory> = if toml.collaborators.memory_enabled {
        http.clone()
    } else {
        Arc::new(NoopLongTerm)
    };
    let collaborators = Collaborators {
        inference: http.clone(),
        tools: http.clone(),
        agents: http,
        memory,
    };

    let specs = ModelSpecCache::new(
        Arc::new(toml.model_specs()),
        Duration::from_secs(toml.engine.model_spec_ttl_secs),
    )
    .with_default_window(toml.engine.default_context_window)
    .with_lookup_timeout(Duration::from_secs(toml.timeouts.model_spec_secs));

    let checkpoints = Arc::new(FileCheckpointStore::new(config.checkpoint_dir()));
    let tracker = Arc::new(
        RunTracker::open(&config.runs_dir())
            .await
            .context("Failed to open the run history")?,
    );

    Ok(
        Orchestrator::new(workflow, collaborators, Arc::new(specs), checkpoints, tracker)
            .with_settings(toml.engine_settings()?)
            .with_sink(Arc::new(TracingSink)),
    )
}

pub async fn cmd_run(
    config: &BatonConfig,
    workflow_path: &Path,
    goal: &str,
    thread: Option<String>,
    cron: Option<String>,
    json: bool,
) -> Result<()> {
    let workflow = Workflow::load(workflow_path)?;
    let (sink, events) = ChannelSink::new();
    let orchestrator = build_orchestrator(config, workflow)
        .await?
        .with_sink(Arc::new(sink));
    let trigger = match cron {
        Some(trigger_id) => TriggeredBy::Cron { trigger_id },
        None => TriggeredBy::Manual,
    };

    if !json {
        println!(
            "{} {} {}",
            style("▶").cyan().bold(),
            style(&orchestrator.workflow().id).bold(),
            style(goal).dim()
        );
    }

    let task = {
        let orchestrator = orchestrator.clone();
        let goal = goal.to_string();
        tokio::spawn(async move {
            match thread {
                Some(thread) => orchestrator.run_on_thread(&goal, &thread, trigger).await,
                None => orchestrator.run(&goal, trigger).await,
            }
        })
    };

    let outcome = watch(&orchestrator, task, events, json).await?;
    finish(&outcome, json)
}

pub async fn cmd_resume(
    config: &BatonConfig,
    workflow_path: &Path,
    thread: &str,
    json: bool,
) -> Result<()> {
    let workflow = Workflow::load(workflow_path)?;
    let (sink, events) = ChannelSink::new();
    let orchestrator = build_orchestrator(config, workflow)
        .await?
        .with_sink(Arc::new(sink));

    if !json {
        println!(
            "{} Resuming thread {}",
            style("▶").cyan().bold(),
            style(thread).bold()
        );
    }

    let task = {
        let orchestrator = orchestrator.clone();
        let thread = thread.to_string();
        tokio::spawn(async move { orchestrator.resume(&thread, TriggeredBy::Manual).await })
    };

    let outcome = watch(&orchestrator, task, events, json).await?;
    finish(&outcome, json)
}

type RunTask = tokio::task::JoinHandle<Result<RunOutcome, baton::errors::OrchestratorError>>;

/// Print events while the run task is alive; Ctrl-C cancels the run.
async fn watch(
    orchestrator: &Orchestrator,
    mut task: RunTask,
    mut events: UnboundedReceiver<EngineEvent>,
    json: bool,
) -> Result<RunOutcome> {
    let mut run_id: Option<String> = None;

    let joined = loop {
        tokio::select! {
            joined = &mut task => break joined,
            Some(event) = events.recv() => {
                if let EngineEvent::RunStarted { run_id: id, .. } = &event {
                    run_id = Some(id.clone());
                }
                print_event(&event, json)?;
            }
            _ = tokio::signal::ctrl_c() => {
                match &run_id {
                    Some(id) if orchestrator.cancel(id) => {
                        eprintln!("{} cancelling {}", style("⏹").yellow(), id);
                    }
                    _ => eprintln!("{} run has not started yet", style("⚠").yellow()),
                }
            }
        }
    };

    while let Ok(event) = events.try_recv() {
        print_event(&event, json)?;
    }

    let outcome = joined.context("Run task panicked")??;
    Ok(outcome)
}

fn print_event(event: &EngineEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        EngineEvent::ToolDispatched { name, wave, .. } => {
            println!("  {} {} (wave {})", style("→").dim(), name, wave)
        }
        EngineEvent::ToolRefused { name, reason, .. } => {
            println!("  {} {}: {}", style("✗").red(), name, reason)
        }
        EngineEvent::CoordinatorFailed { attempt, error, .. } => {
            println!("  {} coordinator attempt {}: {}", style("⚠").yellow(), attempt, error)
        }
        EngineEvent::RoundTripCapReached { cap, .. } => {
            println!("  {} round-trip cap of {} reached", style("⚠").yellow(), cap)
        }
        EngineEvent::MemoryWiped { wiped_messages, .. } => println!(
            "  {} context wiped ({} messages summarized)",
            style("♻").cyan(),
            wiped_messages
        ),
        EngineEvent::WipeAborted { error, .. } => {
            println!("  {} wipe aborted: {}", style("⚠").yellow(), error)
        }
        _ => {}
    }
    Ok(())
}

fn finish(outcome: &RunOutcome, json: bool) -> Result<()> {
    let run = &outcome.run;
    if !json {
        println!();
        if let Some(output) = outcome.output() {
            println!("{}", output);
            println!();
        }
        let status = match run.status {
            RunStatus::Success => style(run.status.as_str()).green().bold(),
            RunStatus::Cancelled => style(run.status.as_str()).yellow().bold(),
            _ => style(run.status.as_str()).red().bold(),
        };
        println!("Run:     {} ({})", run.run_id, status);
        println!("Thread:  {}", run.thread_id);
        println!("Steps:   {}", outcome.steps);
        println!(
            "Tokens:  {} in / {} out",
            run.token_totals.input_tokens, run.token_totals.output_tokens
        );
        if run.cost_usd > 0.0 {
            println!("Cost:    ${:.4}", run.cost_usd);
        }
    }

    match run.status {
        RunStatus::Success => Ok(()),
        _ => bail!(
            "Run {} ended with status {}: {}",
            run.run_id,
            run.status,
            run.error.as_deref().unwrap_or("no error recorded")
        ),
    }
}
