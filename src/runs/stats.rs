//! Aggregate statistics over tracked runs.

use super::{RunStatus, TrackedRun, TriggerKind};
use crate::ledger::TokenTotals;
use serde::Serialize;
use std::collections::BTreeMap;

/// Outcome counts for one trigger type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TriggerStats {
    pub runs: usize,
    pub success: usize,
    pub error: usize,
    pub cancelled: usize,
}

impl TriggerStats {
    /// Successes over finished runs; 0 when nothing has finished.
    pub fn success_rate(&self) -> f64 {
        let finished = self.success + self.error + self.cancelled;
        if finished == 0 {
            0.0
        } else {
            self.success as f64 / finished as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_trigger: BTreeMap<TriggerKind, TriggerStats>,
    pub token_totals: TokenTotals,
    pub cost_usd: f64,
    /// Mean wall-clock seconds of finished runs that were started.
    pub avg_duration_secs: Option<f64>,
}

impl RunStats {
    pub fn from_runs(runs: &[TrackedRun]) -> Self {
        let mut stats = RunStats {
            total: runs.len(),
            ..Default::default()
        };
        let mut durations = Vec::new();

        for run in runs {
            *stats.by_status.entry(run.status.to_string()).or_default() += 1;

            let trigger = stats.by_trigger.entry(run.triggered_by.kind()).or_default();
            trigger.runs += 1;
            match run.status {
                RunStatus::Success => trigger.success += 1,
                RunStatus::Error => trigger.error += 1,
                RunStatus::Cancelled => trigger.cancelled += 1,
                RunStatus::Pending | RunStatus::Running => {}
            }

            stats.token_totals.add(run.token_totals);
            stats.cost_usd += run.cost_usd;
            if let Some(d) = run.duration() {
                durations.push(d.num_milliseconds() as f64 / 1000.0);
            }
        }

        if !durations.is_empty() {
            stats.avg_duration_secs = Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        stats
    }

    /// Success rate across every trigger type.
    pub fn success_rate(&self) -> f64 {
        let mut all = TriggerStats::default();
        for t in self.by_trigger.values() {
            all.success += t.success;
            all.error += t.error;
            all.cancelled += t.cancelled;
        }
        all.success_rate()
    }

    /// Render the per-trigger table printed by `baton runs stats`.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:<10} {:<8} {:<8} {:<8} {:<10} {:<10}\n",
            "Trigger", "Runs", "Success", "Error", "Cancelled", "Rate"
        ));
        out.push_str(&format!(
            "{:<10} {:<8} {:<8} {:<8} {:<10} {:<10}\n",
            "----------", "--------", "--------", "--------", "----------", "----------"
        ));
        for (kind, t) in &self.by_trigger {
            out.push_str(&format!(
                "{:<10} {:<8} {:<8} {:<8} {:<10} {:.0}%\n",
                kind.as_str(),
                t.runs,
                t.success,
                t.error,
                t.cancelled,
                t.success_rate() * 100.0
            ));
        }
        out
    }
}
