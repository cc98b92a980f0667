use super::{
    Checkpoint, CheckpointMetadata, CheckpointPointer, CheckpointRecord, CheckpointStore,
    ListOptions, select_ids, validate_id,
};
use crate::errors::CheckpointError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Process-local checkpoint store.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    threads: Arc<RwLock<HashMap<String, BTreeMap<String, CheckpointRecord>>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointPointer, CheckpointError> {
        validate_id(thread_id)?;
        validate_id(&checkpoint.checkpoint_id)?;
        let pointer = CheckpointPointer {
            thread_id: thread_id.to_string(),
            checkpoint_id: checkpoint.checkpoint_id.clone(),
        };

        let mut threads = self.threads.write().await;
        let thread = threads.entry(thread_id.to_string()).or_default();
        if thread.contains_key(&pointer.checkpoint_id) {
            return Err(CheckpointError::AlreadyExists {
                thread_id: pointer.thread_id,
                checkpoint_id: pointer.checkpoint_id,
            });
        }
        thread.insert(
            pointer.checkpoint_id.clone(),
            CheckpointRecord {
                config: pointer.clone(),
                checkpoint,
                metadata,
            },
        );
        Ok(pointer)
    }

    async fn get(
        &self,
        thread_id: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<Option<CheckpointRecord>, CheckpointError> {
        validate_id(thread_id)?;
        let threads = self.threads.read().await;
        let Some(thread) = threads.get(thread_id) else {
            return Ok(None);
        };
        Ok(match checkpoint_id {
            Some(id) => thread.get(id).cloned(),
            None => thread.values().next_back().cloned(),
        })
    }

    async fn list(
        &self,
        thread_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        validate_id(thread_id)?;
        let threads = self.threads.read().await;
        let Some(thread) = threads.get(thread_id) else {
            return Ok(Vec::new());
        };
        let ids: Vec<String> = thread.keys().rev().cloned().collect();
        Ok(select_ids(&ids, options)
            .into_iter()
            .filter_map(|id| thread.get(id).cloned())
            .collect())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<usize, CheckpointError> {
        validate_id(thread_id)?;
        Ok(self
            .threads
            .write()
            .await
            .remove(thread_id)
            .map(|t| t.len())
            .unwrap_or(0))
    }

    async fn list_threads(&self) -> Result<Vec<String>, CheckpointError> {
        let mut ids: Vec<String> = self.threads.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
