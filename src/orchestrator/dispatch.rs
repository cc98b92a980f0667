//! Wave planning for a batch of tool calls.
//!
//! Calls with no dependencies share the first wave and run concurrently. A
//! call runs in the wave after its last dependency. Calls whose dependencies
//! cannot be satisfied are rejected up front so nothing waits forever.

use crate::state::ToolCall;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchPlan {
    /// Indices into the call list, grouped by wave.
    pub waves: Vec<Vec<usize>>,
    pub rejected: Vec<Rejection>,
}

pub fn plan_waves(calls: &[ToolCall]) -> DispatchPlan {
    let index_of: HashMap<&str, usize> = calls
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();

    let mut rejected: HashMap<usize, String> = HashMap::new();
    for (i, call) in calls.iter().enumerate() {
        if let Some(dep) = call.depends_on.iter().find(|d| !index_of.contains_key(d.as_str())) {
            rejected.insert(i, format!("depends on unknown call '{}'", dep));
        } else if call.depends_on.iter().any(|d| d == &call.id) {
            rejected.insert(i, "depends on itself".to_string());
        }
    }

    // Rejection spreads to dependents.
    loop {
        let newly: Vec<(usize, String)> = calls
            .iter()
            .enumerate()
            .filter(|(i, _)| !rejected.contains_key(i))
            .filter_map(|(i, call)| {
                call.depends_on
                    .iter()
                    .find(|d| rejected.contains_key(&index_of[d.as_str()]))
                    .map(|d| (i, format!("depends on rejected call '{}'", d)))
            })
            .collect();
        if newly.is_empty() {
            break;
        }
        rejected.extend(newly);
    }

    let mut waves = Vec::new();
    let mut scheduled: HashSet<usize> = HashSet::new();
    loop {
        let ready: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(i, _)| !scheduled.contains(i) && !rejected.contains_key(i))
            .filter(|(_, call)| {
                call.depends_on
                    .iter()
                    .all(|d| scheduled.contains(&index_of[d.as_str()]))
            })
            .map(|(i, _)| i)
            .collect();

        if ready.is_empty() {
            break;
        }
        scheduled.extend(ready.iter().copied());
        waves.push(ready);
    }

    // Whatever is left waits on a cycle.
    for i in 0..calls.len() {
        if !scheduled.contains(&i) && !rejected.contains_key(&i) {
            rejected.insert(i, "dependency cycle".to_string());
        }
    }

    let mut rejected: Vec<Rejection> = rejected
        .into_iter()
        .map(|(index, reason)| Rejection { index, reason })
        .collect();
    rejected.sort_by_key(|r| r.index);

    DispatchPlan { waves, rejected }
}
