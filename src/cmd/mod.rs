//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                 |
//! |-----------------|----------------------------------|
//! | `run`           | `Run`, `Resume`                  |
//! | `runs`          | `Runs`                           |
//! | `checkpoints`   | `Checkpoints`                    |
//! | `config`        | `Config`                         |

pub mod checkpoints;
pub mod config;
pub mod run;
pub mod runs;

pub use checkpoints::cmd_checkpoints;
pub use config::cmd_config;
pub use run::{cmd_resume, cmd_run};
pub use runs::cmd_runs;

use anyhow::Result;
use baton::config::BatonConfig;
use std::path::PathBuf;

use super::Cli;

/// Resolve configuration for `project_dir` with the global CLI overrides applied.
pub fn load_config(cli: &Cli, project_dir: PathBuf) -> Result<BatonConfig> {
    let mut config = BatonConfig::new(project_dir)?;
    if let Some(url) = &cli.base_url {
        config.toml.collaborators.base_url = Some(url.clone());
    }
    if let Some(threshold) = &cli.cleanup_threshold {
        config.toml.engine.cleanup_threshold = threshold.clone();
    }
    Ok(config)
}
