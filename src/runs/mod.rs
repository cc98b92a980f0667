//! Run lifecycle tracking.
//!
//! Every run gets a [`TrackedRun`] that moves
//! `pending → running → {success, error, cancelled}`. Terminal records are
//! immutable.

mod stats;
mod tracker;

pub use stats::{RunStats, TriggerStats};
pub use tracker::{NewRun, RunTracker};

use crate::ledger::TokenTotals;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Error,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Error | RunStatus::Cancelled
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Success)
                | (RunStatus::Pending | RunStatus::Running, RunStatus::Error)
                | (RunStatus::Pending | RunStatus::Running, RunStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "error" => Ok(RunStatus::Error),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// What started a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TriggeredBy {
    Manual,
    Cron { trigger_id: String },
}

impl TriggeredBy {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggeredBy::Manual => TriggerKind::Manual,
            TriggeredBy::Cron { .. } => TriggerKind::Cron,
        }
    }
}

impl std::fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggeredBy::Manual => write!(f, "manual"),
            TriggeredBy::Cron { trigger_id } => write!(f, "cron({})", trigger_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Manual,
    Cron,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::Cron => "cron",
        }
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggerKind::Manual),
            "cron" => Ok(TriggerKind::Cron),
            other => Err(format!("unknown trigger type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedRun {
    pub run_id: String,
    pub workflow_id: String,
    pub thread_id: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub input: String,
    pub output: Option<String>,
    pub error: Option<String>,
    pub token_totals: TokenTotals,
    pub cost_usd: f64,
    pub triggered_by: TriggeredBy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<String>,
}

impl TrackedRun {
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.ended_at? - self.started_at?)
    }
}

/// Query over tracked runs. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFilter {
    pub workflow_id: Option<String>,
    pub status: Option<RunStatus>,
    pub trigger: Option<TriggerKind>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub until: Option<DateTime<Utc>>,
}

impl RunFilter {
    pub fn matches(&self, run: &TrackedRun) -> bool {
        self.workflow_id.as_ref().is_none_or(|w| *w == run.workflow_id)
            && self.status.is_none_or(|s| s == run.status)
            && self.trigger.is_none_or(|t| t == run.triggered_by.kind())
            && self.since.is_none_or(|since| run.created_at >= since)
            && self.until.is_none_or(|until| run.created_at < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Error,
            RunStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_transitions() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Success));
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Error));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Cancelled));
        assert!(!RunStatus::Pending.can_transition_to(RunStatus::Success));
        assert!(!RunStatus::Success.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Cancelled.can_transition_to(RunStatus::Error));
    }

    #[test]
    fn test_triggered_by_serde() {
        let cron = TriggeredBy::Cron {
            trigger_id: "nightly".to_string(),
        };
        let json = serde_json::to_value(&cron).unwrap();
        assert_eq!(json["type"], "cron");
        assert_eq!(json["trigger_id"], "nightly");
        assert_eq!(cron.to_string(), "cron(nightly)");
        assert_eq!(cron.kind(), TriggerKind::Cron);
    }
}
