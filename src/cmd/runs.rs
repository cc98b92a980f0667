//! Run history commands: `baton runs`.

use anyhow::{Context, Result, bail};
use baton::config::BatonConfig;
use baton::runs::{RunFilter, RunStatus, RunTracker, TrackedRun};
use console::style;

use super::super::RunsCommands;

pub async fn cmd_runs(config: &BatonConfig, command: RunsCommands) -> Result<()> {
    let tracker = RunTracker::open(&config.runs_dir())
        .await
        .context("Failed to open the run history")?;

    match command {
        RunsCommands::List {
            workflow,
            status,
            trigger,
            since,
            until,
            limit,
        } => {
            let filter = RunFilter {
                workflow_id: workflow,
                status,
                trigger,
                since,
                until,
            };
            let runs = tracker.list(&filter);
            if runs.is_empty() {
                println!("No runs found.");
                return Ok(());
            }

            println!(
                "{:<38} {:<16} {:<10} {:<14} {:<20} {:>8}",
                "Run", "Workflow", "Status", "Trigger", "Created", "Tokens"
            );
            for run in runs.iter().take(limit) {
                println!(
                    "{:<38} {:<16} {:<10} {:<14} {:<20} {:>8}",
                    run.run_id,
                    run.workflow_id,
                    status_cell(run.status),
                    run.triggered_by.to_string(),
                    run.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    run.token_totals.total()
                );
            }
            if runs.len() > limit {
                println!();
                println!(
                    "{}",
                    style(format!("{} more (use --limit)", runs.len() - limit)).dim()
                );
            }
        }
        RunsCommands::Show { run_id } => {
            let Some(run) = tracker.get(&run_id) else {
                bail!("Run '{}' not found", run_id);
            };
            print_run(&run);
        }
        RunsCommands::Stats { workflow } => {
            let filter = RunFilter {
                workflow_id: workflow,
                ..Default::default()
            };
            let stats = tracker.stats(&filter);
            if stats.total == 0 {
                println!("No runs found.");
                return Ok(());
            }

            println!("{}", style("Run statistics").bold().cyan());
            println!();
            print!("{}", stats.render_table());
            println!();
            println!("Total runs:   {}", stats.total);
            for (status, count) in &stats.by_status {
                println!("  {:<10} {}", status, count);
            }
            println!("Success rate: {:.0}%", stats.success_rate() * 100.0);
            if let Some(avg) = stats.avg_duration_secs {
                println!("Avg duration: {:.1}s", avg);
            }
            println!(
                "Tokens:       {} in / {} out",
                stats.token_totals.input_tokens, stats.token_totals.output_tokens
            );
            println!("Cost:         ${:.4}", stats.cost_usd);
        }
    }
    Ok(())
}

fn status_cell(status: RunStatus) -> String {
    // Pad before styling so ANSI codes don't break alignment.
    let padded = format!("{:<10}", status.as_str());
    match status {
        RunStatus::Success => style(padded).green().to_string(),
        RunStatus::Error => style(padded).red().to_string(),
        RunStatus::Cancelled => style(padded).yellow().to_string(),
        RunStatus::Pending | RunStatus::Running => style(padded).dim().to_string(),
    }
}

fn print_run(run: &TrackedRun) {
    println!("{}", style(&run.run_id).bold());
    println!("  workflow:     {}", run.workflow_id);
    println!("  thread:       {}", run.thread_id);
    println!("  status:       {}", run.status);
    println!("  triggered by: {}", run.triggered_by);
    if let Some(parent) = &run.resumed_from {
        println!("  resumed from: {}", parent);
    }
    println!("  created:      {}", run.created_at.to_rfc3339());
    if let Some(started) = run.started_at {
        println!("  started:      {}", started.to_rfc3339());
    }
    if let Some(ended) = run.ended_at {
        println!("  ended:        {}", ended.to_rfc3339());
    }
    if let Some(d) = run.duration() {
        println!("  duration:     {:.1}s", d.num_milliseconds() as f64 / 1000.0);
    }
    println!(
        "  tokens:       {} in / {} out",
        run.token_totals.input_tokens, run.token_totals.output_tokens
    );
    println!("  cost:         ${:.4}", run.cost_usd);
    println!();
    println!("{}", style("Input").bold());
    println!("{}", run.input);
    if let Some(output) = &run.output {
        println!();
        println!("{}", style("Output").bold());
        println!("{}", output);
    }
    if let Some(error) = &run.error {
        println!();
        println!("{} {}", style("Error:").red().bold(), error);
    }
}
