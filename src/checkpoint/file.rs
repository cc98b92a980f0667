use super::{
    Checkpoint, CheckpointMetadata, CheckpointPointer, CheckpointRecord, CheckpointStore,
    ListOptions, select_ids, validate_id,
};
use crate::errors::CheckpointError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Filesystem checkpoint store.
///
/// Layout: `<root>/<thread_id>/<checkpoint_id>.json`. Records are written to a
/// `.tmp` sibling and renamed into place, so a reader never sees a partial
/// record.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CheckpointError + '_ {
    move |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn thread_dir(&self, thread_id: &str) -> PathBuf {
        self.root.join(thread_id)
    }

    fn record_path(&self, thread_id: &str, checkpoint_id: &str) -> PathBuf {
        self.thread_dir(thread_id).join(format!("{}.json", checkpoint_id))
    }

    /// Checkpoint ids in a thread, newest first. Temp files are ignored.
    async fn ids(&self, thread_id: &str) -> Result<Vec<String>, CheckpointError> {
        let dir = self.thread_dir(thread_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&dir)(e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&dir))? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    async fn read_record(&self, path: &Path) -> Result<Option<CheckpointRecord>, CheckpointError> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(path)(e)),
        }
    }
}

async fn atomic_write(path: &Path, content: &str) -> Result<(), CheckpointError> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)
        .await
        .map_err(io_err(&temp_path))?;
    fs::rename(&temp_path, path).await.map_err(io_err(path))?;
    Ok(())
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn put(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointPointer, CheckpointError> {
        validate_id(thread_id)?;
        validate_id(&checkpoint.checkpoint_id)?;

        let dir = self.thread_dir(thread_id);
        fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;

        let path = self.record_path(thread_id, &checkpoint.checkpoint_id);
        if fs::try_exists(&path).await.map_err(io_err(&path))? {
            return Err(CheckpointError::AlreadyExists {
                thread_id: thread_id.to_string(),
                checkpoint_id: checkpoint.checkpoint_id,
            });
        }

        let pointer = CheckpointPointer {
            thread_id: thread_id.to_string(),
            checkpoint_id: checkpoint.checkpoint_id.clone(),
        };
        let record = CheckpointRecord {
            config: pointer.clone(),
            checkpoint,
            metadata,
        };
        let content = serde_json::to_string_pretty(&record)?;
        atomic_write(&path, &content).await?;

        tracing::debug!(thread_id, checkpoint_id = %pointer.checkpoint_id, "Checkpoint written");
        Ok(pointer)
    }

    async fn get(
        &self,
        thread_id: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<Option<CheckpointRecord>, CheckpointError> {
        validate_id(thread_id)?;
        let id = match checkpoint_id {
            Some(id) => {
                validate_id(id)?;
                id.to_string()
            }
            None => match self.ids(thread_id).await?.into_iter().next() {
                Some(id) => id,
                None => return Ok(None),
            },
        };
        self.read_record(&self.record_path(thread_id, &id)).await
    }

    async fn list(
        &self,
        thread_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        validate_id(thread_id)?;
        let ids = self.ids(thread_id).await?;
        let mut records = Vec::new();
        for id in select_ids(&ids, options) {
            if let Some(record) = self.read_record(&self.record_path(thread_id, id)).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<usize, CheckpointError> {
        validate_id(thread_id)?;
        let count = self.ids(thread_id).await?.len();
        let dir = self.thread_dir(thread_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(io_err(&dir)(e)),
        }
    }

    async fn list_threads(&self) -> Result<Vec<String>, CheckpointError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.root)(e)),
        };
        let mut threads = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&self.root))? {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                threads.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        threads.sort();
        Ok(threads)
    }
}
