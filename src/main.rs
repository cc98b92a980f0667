use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "baton")]
#[command(version, about = "Workflow orchestration engine for coordinator models")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Collaborator base URL. Overrides baton.toml and BATON_BASE_URL.
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Cleanup threshold (e.g., "80%" or "6000" tokens). Overrides baton.toml.
    #[arg(long, global = true)]
    pub cleanup_threshold: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a workflow against a goal
    Run {
        /// Workflow definition (TOML)
        #[arg(short, long)]
        workflow: PathBuf,

        /// Checkpoint thread (defaults to the run id)
        #[arg(long)]
        thread: Option<String>,

        /// Record the run as cron-triggered with this trigger id
        #[arg(long)]
        cron: Option<String>,

        /// Stream engine events as JSON lines on stdout
        #[arg(long)]
        json: bool,

        /// The goal
        #[arg(required = true, num_args = 1..)]
        goal: Vec<String>,
    },
    /// Continue a thread from its latest checkpoint
    Resume {
        #[arg(short, long)]
        workflow: PathBuf,

        thread: String,

        #[arg(long)]
        json: bool,
    },
    /// Inspect tracked runs
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },
    /// Inspect or delete checkpoints
    Checkpoints {
        #[command(subcommand)]
        command: CheckpointsCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum RunsCommands {
    /// List runs, newest first
    List {
        #[arg(long)]
        workflow: Option<String>,

        /// pending, running, success, error or cancelled
        #[arg(long)]
        status: Option<baton::runs::RunStatus>,

        /// manual or cron
        #[arg(long)]
        trigger: Option<baton::runs::TriggerKind>,

        /// Only runs created at or after this time (RFC 3339)
        #[arg(long)]
        since: Option<chrono::DateTime<chrono::Utc>>,

        /// Only runs created before this time (RFC 3339)
        #[arg(long)]
        until: Option<chrono::DateTime<chrono::Utc>>,

        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show one run
    Show { run_id: String },
    /// Aggregate statistics
    Stats {
        #[arg(long)]
        workflow: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum CheckpointsCommands {
    /// List threads that have checkpoints
    Threads,
    /// List a thread's checkpoints, newest first
    List {
        thread: String,

        #[arg(long, default_value = "20")]
        limit: usize,

        /// Only checkpoints older than this id
        #[arg(long)]
        before: Option<String>,
    },
    /// Print a checkpoint record (latest when no id is given)
    Show {
        thread: String,

        #[arg(long)]
        id: Option<String>,
    },
    /// Delete a thread and all of its checkpoints
    Delete {
        thread: String,

        /// Required; deletion cannot be undone
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Write a default .baton/baton.toml
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Validate configuration and report warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // Config subcommands must work even when the file is broken.
    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(&cli, &project_dir, command.clone());
    }

    let config = cmd::load_config(&cli, project_dir)?;
    let _log_guard = baton::logging::init(
        &config.toml.logging,
        config.log_file().as_deref(),
        cli.verbose,
    );

    match &cli.command {
        Commands::Run {
            workflow,
            thread,
            cron,
            json,
            goal,
        } => {
            cmd::cmd_run(
                &config,
                workflow,
                &goal.join(" "),
                thread.clone(),
                cron.clone(),
                *json,
            )
            .await?
        }
        Commands::Resume {
            workflow,
            thread,
            json,
        } => cmd::cmd_resume(&config, workflow, thread, *json).await?,
        Commands::Runs { command } => cmd::cmd_runs(&config, command.clone()).await?,
        Commands::Checkpoints { command } => cmd::cmd_checkpoints(&config, command.clone()).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
