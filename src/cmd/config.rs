//! Configuration view and validation commands: `baton config`.

use anyhow::{Context, Result, bail};
use baton::config::{BatonToml, global_config_path};
use console::style;
use std::path::Path;

use super::super::{Cli, ConfigCommands};
use super::load_config;

pub fn cmd_config(cli: &Cli, project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => show(cli, project_dir),
        Some(ConfigCommands::Init { force }) => init(project_dir, force),
        Some(ConfigCommands::Validate) => validate(cli, project_dir),
    }
}

fn show(cli: &Cli, project_dir: &Path) -> Result<()> {
    let config = load_config(cli, project_dir.to_path_buf())?;

    println!();
    println!("{}", style("Baton Configuration").bold().cyan());
    println!("===================");
    println!();
    match &config.source {
        Some(path) => println!("Config file: {}", path.display()),
        None => {
            println!("No baton.toml found at {}", config.project_file().display());
            if let Some(global) = global_config_path() {
                println!("             or {}", global.display());
            }
            println!("Using defaults.");
        }
    }
    println!();
    println!("Effective values (with env/CLI overrides):");
    println!();
    let rendered =
        toml::to_string_pretty(&config.toml).context("Failed to render configuration")?;
    for line in rendered.lines() {
        println!("  {}", line);
    }
    println!();
    println!("Checkpoints: {}", config.checkpoint_dir().display());
    println!("Runs:        {}", config.runs_dir().display());
    if let Some(log) = config.log_file() {
        println!("Log file:    {}", log.display());
    }
    Ok(())
}

fn init(project_dir: &Path, force: bool) -> Result<()> {
    let path = project_dir
        .join(baton::config::BATON_DIR)
        .join(baton::config::CONFIG_FILE);
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    BatonToml::default().save(&path)?;
    println!(
        "{} Wrote default configuration to {}",
        style("✓").green().bold(),
        path.display()
    );
    Ok(())
}

fn validate(cli: &Cli, project_dir: &Path) -> Result<()> {
    let config = load_config(cli, project_dir.to_path_buf())
        .context("Configuration could not be loaded")?;

    match &config.source {
        Some(path) => println!("Validating {}", path.display()),
        None => println!("No config file found; validating defaults"),
    }

    let warnings = config.toml.validate();
    if warnings.is_empty() {
        println!("{} Configuration is valid", style("✓").green().bold());
        return Ok(());
    }

    println!();
    for warning in &warnings {
        println!("  {} {}", style("⚠").yellow(), warning);
    }
    println!();
    println!(
        "{}",
        style(format!("{} warning(s)", warnings.len())).yellow()
    );
    Ok(())
}
