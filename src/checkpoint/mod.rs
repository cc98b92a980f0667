//! Durable, append-only checkpoint storage.
//!
//! Checkpoints are namespaced by thread id. Within a thread, ids are
//! time-ordered zero-padded strings, so lexical order is creation order and
//! listings are returned newest first.
//!
//! Each checkpoint is one record of `{config, checkpoint, metadata}`.
//! Records are never rewritten; `put` on an existing id fails.

mod file;
mod memory;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

use crate::errors::CheckpointError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// Generate a checkpoint id strictly greater than every id generated before it
/// in this process.
pub fn next_checkpoint_id() -> String {
    let now = Utc::now().timestamp_micros().max(0) as u64;
    let mut last = LAST_ID.load(Ordering::SeqCst);
    loop {
        let next = now.max(last + 1);
        match LAST_ID.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return format!("{:020}", next),
            Err(actual) => last = actual,
        }
    }
}

/// Address of a stored checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointPointer {
    pub thread_id: String,
    pub checkpoint_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_checkpoint_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Serialized run snapshot.
    pub snapshot: Value,
}

impl Checkpoint {
    pub fn new(snapshot: Value, parent_checkpoint_id: Option<String>) -> Self {
        Self {
            checkpoint_id: next_checkpoint_id(),
            parent_checkpoint_id,
            created_at: Utc::now(),
            snapshot,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub run_id: String,
    /// Step counter within the run.
    pub step: u64,
    /// Node that produced this checkpoint.
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub config: CheckpointPointer,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Only ids strictly older than this one.
    pub before: Option<String>,
    pub limit: Option<usize>,
}

impl ListOptions {
    pub fn limit(limit: usize) -> Self {
        Self {
            before: None,
            limit: Some(limit),
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn put(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointPointer, CheckpointError>;

    /// A specific checkpoint, or the latest one when `checkpoint_id` is `None`.
    async fn get(
        &self,
        thread_id: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<Option<CheckpointRecord>, CheckpointError>;

    /// Strictly descending by checkpoint id.
    async fn list(
        &self,
        thread_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<CheckpointRecord>, CheckpointError>;

    /// Remove a thread and every checkpoint in it. Returns the number removed.
    async fn delete_thread(&self, thread_id: &str) -> Result<usize, CheckpointError>;

    async fn list_threads(&self) -> Result<Vec<String>, CheckpointError>;
}

/// Thread and checkpoint ids double as path segments.
pub(crate) fn validate_id(id: &str) -> Result<(), CheckpointError> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(CheckpointError::InvalidThreadId(id.to_string()))
    }
}

/// Apply `before` / `limit` to ids already sorted newest first.
pub(crate) fn select_ids<'a>(ids: &'a [String], options: &ListOptions) -> Vec<&'a String> {
    ids.iter()
        .filter(|id| options.before.as_ref().is_none_or(|b| id.as_str() < b.as_str()))
        .take(options.limit.unwrap_or(usize::MAX))
        .collect()
}
