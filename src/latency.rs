//! Identify-call latency, split by what each call did to the store.
//!
//! A call that only reads costs far less than one that demotes a primary and
//! relinks its secondaries, so each outcome keeps its own bounded sample
//! window. Calls that had to repair broken links are counted separately.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::resolver::ResolutionOutcome;

const WINDOW_SIZE: usize = 256;

/// What one identify call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    /// No match; a new primary was inserted.
    Created,
    /// Clusters were merged or links rewritten.
    Merged,
    /// A secondary was added to an existing cluster.
    Inserted,
    /// The observation was already fully known.
    Unchanged,
    /// The call returned an error.
    Failed,
}

impl From<&ResolutionOutcome> for CallKind {
    fn from(outcome: &ResolutionOutcome) -> Self {
        if outcome.created_primary {
            CallKind::Created
        } else if outcome.relinked > 0 {
            CallKind::Merged
        } else if outcome.inserted_secondary.is_some() {
            CallKind::Inserted
        } else {
            CallKind::Unchanged
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallKindRollup {
    pub kind: CallKind,
    pub calls: u64,
    pub sample_count: usize,
    pub p50_ms: u128,
    pub p95_ms: u128,
    pub max_ms: u128,
    pub over_budget: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyRollupsPayload {
    pub generated_at: String,
    pub budget_ms: u128,
    /// Calls that found broken or multi-hop links and repaired them.
    pub anomaly_count: u64,
    pub last_anomaly_at: Option<String>,
    pub kinds: Vec<CallKindRollup>,
}

#[derive(Debug, Default)]
struct Window {
    samples_ms: VecDeque<u128>,
    calls: u64,
    over_budget: u64,
}

#[derive(Debug, Default)]
struct RecorderState {
    windows: BTreeMap<CallKind, Window>,
    anomaly_count: u64,
    last_anomaly_at: Option<DateTime<Utc>>,
}

/// Per-service latency recorder. Shared across threads by reference.
#[derive(Debug)]
pub struct LatencyRecorder {
    budget_ms: u128,
    state: Mutex<RecorderState>,
}

impl LatencyRecorder {
    pub fn new(budget_ms: u64) -> Self {
        Self {
            budget_ms: u128::from(budget_ms),
            state: Mutex::new(RecorderState::default()),
        }
    }

    pub fn record(&self, kind: CallKind, elapsed_ms: u128, anomaly: bool) {
        let mut state = self.state.lock();
        if anomaly {
            state.anomaly_count += 1;
            state.last_anomaly_at = Some(Utc::now());
        }
        let window = state.windows.entry(kind).or_default();
        window.calls += 1;
        if elapsed_ms > self.budget_ms {
            window.over_budget += 1;
        }
        if window.samples_ms.len() == WINDOW_SIZE {
            window.samples_ms.pop_front();
        }
        window.samples_ms.push_back(elapsed_ms);
    }

    pub fn snapshot(&self) -> LatencyRollupsPayload {
        let state = self.state.lock();
        let kinds = state
            .windows
            .iter()
            .map(|(kind, window)| {
                let mut sorted: Vec<u128> = window.samples_ms.iter().copied().collect();
                sorted.sort_unstable();
                CallKindRollup {
                    kind: *kind,
                    calls: window.calls,
                    sample_count: sorted.len(),
                    p50_ms: nearest_rank(&sorted, 50),
                    p95_ms: nearest_rank(&sorted, 95),
                    max_ms: sorted.last().copied().unwrap_or(0),
                    over_budget: window.over_budget,
                }
            })
            .collect();

        LatencyRollupsPayload {
            generated_at: Utc::now().to_rfc3339(),
            budget_ms: self.budget_ms,
            anomaly_count: state.anomaly_count,
            last_anomaly_at: state.last_anomaly_at.map(|at| at.to_rfc3339()),
            kinds,
        }
    }
}

/// Nearest-rank percentile of an ascending slice; 0 when empty.
fn nearest_rank(sorted: &[u128], pct: usize) -> u128 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (pct * sorted.len()).div_ceil(100).max(1);
    sorted[rank - 1]
}
