use super::{RunFilter, RunStats, RunStatus, TrackedRun, TriggeredBy};
use crate::errors::TrackerError;
use crate::ledger::TokenTotals;
use chrono::Utc;
use std::collections::HashMap;
use tokio::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Error recorded on runs found unfinished when the tracker is reopened.
pub const INTERRUPTED: &str = "interrupted: process exited before the run finished";

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> TrackerError + '_ {
    move |source| TrackerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Parameters for a new tracked run.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub workflow_id: String,
    /// Checkpoint thread; defaults to the run id.
    pub thread_id: Option<String>,
    pub input: String,
    pub triggered_by: TriggeredBy,
    pub resumed_from: Option<String>,
}

impl NewRun {
    pub fn new(workflow_id: &str, input: &str, triggered_by: TriggeredBy) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            thread_id: None,
            input: input.to_string(),
            triggered_by,
            resumed_from: None,
        }
    }
}

/// Owns every [`TrackedRun`] and enforces the lifecycle.
///
/// With a directory, each run is mirrored to `<dir>/<run_id>.json` on every
/// transition and reloaded on open.
#[derive(Debug)]
pub struct RunTracker {
    runs: RwLock<HashMap<String, TrackedRun>>,
    dir: Option<PathBuf>,
}

impl RunTracker {
    pub fn in_memory() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            dir: None,
        }
    }

    /// Open a persistent tracker, loading existing records from `dir`.
    ///
    /// A record still `pending` or `running` belongs to a process that exited
    /// mid-run; it is closed out as an error before the tracker is returned.
    pub async fn open(dir: &Path) -> Result<Self, TrackerError> {
        fs::create_dir_all(dir).await.map_err(io_err(dir))?;

        let mut runs = HashMap::new();
        let mut interrupted = Vec::new();
        let mut entries = fs::read_dir(dir).await.map_err(io_err(dir))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err(dir))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).await.map_err(io_err(&path))?;
            match serde_json::from_str::<TrackedRun>(&content) {
                Ok(mut run) => {
                    if !run.status.is_terminal() {
                        run.status = RunStatus::Error;
                        run.error = Some(INTERRUPTED.to_string());
                        run.ended_at = Some(Utc::now());
                        interrupted.push(run.clone());
                    }
                    runs.insert(run.run_id.clone(), run);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable run record");
                }
            }
        }

        let tracker = Self {
            runs: RwLock::new(runs),
            dir: Some(dir.to_path_buf()),
        };
        for run in &interrupted {
            tracing::warn!(run_id = %run.run_id, workflow_id = %run.workflow_id, "Closing out interrupted run");
            tracker.persist(run).await?;
        }
        Ok(tracker)
    }

    pub async fn create_run(&self, new: NewRun) -> Result<TrackedRun, TrackerError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let run = TrackedRun {
            thread_id: new.thread_id.unwrap_or_else(|| run_id.clone()),
            run_id,
            workflow_id: new.workflow_id,
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            input: new.input,
            output: None,
            error: None,
            token_totals: TokenTotals::default(),
            cost_usd: 0.0,
            triggered_by: new.triggered_by,
            resumed_from: new.resumed_from,
        };

        {
            let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
            if runs.contains_key(&run.run_id) {
                return Err(TrackerError::DuplicateRun(run.run_id));
            }
            runs.insert(run.run_id.clone(), run.clone());
        }
        self.persist(&run).await?;
        tracing::debug!(run_id = %run.run_id, workflow_id = %run.workflow_id, "Run created");
        Ok(run)
    }

    pub async fn start_run(&self, run_id: &str) -> Result<TrackedRun, TrackerError> {
        self.transition(run_id, RunStatus::Running, |run| {
            run.started_at = Some(Utc::now());
        })
        .await
    }

    pub async fn complete_run(
        &self,
        run_id: &str,
        output: Option<String>,
        totals: TokenTotals,
        cost_usd: f64,
    ) -> Result<TrackedRun, TrackerError> {
        self.transition(run_id, RunStatus::Success, |run| {
            run.output = output;
            run.token_totals = totals;
            run.cost_usd = cost_usd;
        })
        .await
    }

    pub async fn fail_run(
        &self,
        run_id: &str,
        error: &str,
        totals: TokenTotals,
        cost_usd: f64,
    ) -> Result<TrackedRun, TrackerError> {
        self.transition(run_id, RunStatus::Error, |run| {
            run.error = Some(error.to_string());
            run.token_totals = totals;
            run.cost_usd = cost_usd;
        })
        .await
    }

    pub async fn cancel_run(
        &self,
        run_id: &str,
        reason: &str,
        totals: TokenTotals,
        cost_usd: f64,
    ) -> Result<TrackedRun, TrackerError> {
        self.transition(run_id, RunStatus::Cancelled, |run| {
            run.error = Some(reason.to_string());
            run.token_totals = totals;
            run.cost_usd = cost_usd;
        })
        .await
    }

    pub fn get(&self, run_id: &str) -> Option<TrackedRun> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
            .cloned()
    }

    /// Matching runs, newest first.
    pub fn list(&self, filter: &RunFilter) -> Vec<TrackedRun> {
        let mut runs: Vec<TrackedRun> = self
            .runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.run_id.cmp(&b.run_id)));
        runs
    }

    pub fn stats(&self, filter: &RunFilter) -> RunStats {
        RunStats::from_runs(&self.list(filter))
    }

    async fn transition(
        &self,
        run_id: &str,
        next: RunStatus,
        apply: impl FnOnce(&mut TrackedRun),
    ) -> Result<TrackedRun, TrackerError> {
        let updated = {
            let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
            let run = runs
                .get_mut(run_id)
                .ok_or_else(|| TrackerError::RunNotFound(run_id.to_string()))?;
            if !run.status.can_transition_to(next) {
                return Err(TrackerError::InvalidTransition {
                    run_id: run_id.to_string(),
                    from: run.status.to_string(),
                    to: next.to_string(),
                });
            }
            run.status = next;
            if next.is_terminal() {
                run.ended_at = Some(Utc::now());
            }
            apply(run);
            run.clone()
        };
        self.persist(&updated).await?;
        tracing::debug!(run_id, status = %next, "Run transitioned");
        Ok(updated)
    }

    async fn persist(&self, run: &TrackedRun) -> Result<(), TrackerError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = dir.join(format!("{}.json", run.run_id));
        let temp_path = path.with_extension("tmp");
        let json = serde_json::to_string_pretty(run)?;
        fs::write(&temp_path, json).await.map_err(io_err(&temp_path))?;
        fs::rename(&temp_path, &path).await.map_err(io_err(&path))
    }
}
