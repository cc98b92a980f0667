//! Checkpoint inspection commands: `baton checkpoints`.

use anyhow::{Result, bail};
use baton::checkpoint::{CheckpointStore, FileCheckpointStore, ListOptions};
use baton::config::BatonConfig;
use console::style;

use super::super::CheckpointsCommands;

pub async fn cmd_checkpoints(config: &BatonConfig, command: CheckpointsCommands) -> Result<()> {
    let store = FileCheckpointStore::new(config.checkpoint_dir());

    match command {
        CheckpointsCommands::Threads => {
            let threads = store.list_threads().await?;
            if threads.is_empty() {
                println!("No checkpoint threads found.");
                return Ok(());
            }
            for thread in threads {
                println!("{}", thread);
            }
        }
        CheckpointsCommands::List {
            thread,
            limit,
            before,
        } => {
            let options = ListOptions {
                before,
                limit: Some(limit),
            };
            let records = store.list(&thread, &options).await?;
            if records.is_empty() {
                println!("No checkpoints for thread '{}'.", thread);
                return Ok(());
            }

            println!(
                "{:<22} {:<22} {:<6} {:<18} {:<38}",
                "Checkpoint", "Parent", "Step", "Node", "Run"
            );
            for record in records {
                println!(
                    "{:<22} {:<22} {:<6} {:<18} {:<38}",
                    record.checkpoint.checkpoint_id,
                    record
                        .checkpoint
                        .parent_checkpoint_id
                        .as_deref()
                        .unwrap_or("-"),
                    record.metadata.step,
                    record.metadata.node,
                    record.metadata.run_id
                );
            }
        }
        CheckpointsCommands::Show { thread, id } => {
            let Some(record) = store.get(&thread, id.as_deref()).await? else {
                match id {
                    Some(id) => bail!("Checkpoint '{}' not found in thread '{}'", id, thread),
                    None => bail!("Thread '{}' has no checkpoints", thread),
                }
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        CheckpointsCommands::Delete { thread, force } => {
            if !force {
                bail!(
                    "Refusing to delete thread '{}' without --force",
                    thread
                );
            }
            let removed = store.delete_thread(&thread).await?;
            println!(
                "{} Deleted {} checkpoint(s) from thread '{}'",
                style("✓").green().bold(),
                removed,
                thread
            );
        }
    }
    Ok(())
}
