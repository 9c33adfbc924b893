//! Executor eligibility weighting.
//!
//! Weights move only when an executor reports an outcome. Declining a task
//! is not an input here at all: there is no method that could record one.

use dashmap::DashMap;
use tracing::debug;

use crate::contract::ResultStatus;

const BASE_WEIGHT: f64 = 1.0;
const MIN_WEIGHT: f64 = 0.1;
const MAX_WEIGHT: f64 = 2.0;

/// Per-executor eligibility weights.
#[derive(Debug, Default)]
pub struct EligibilityBook {
    weights: DashMap<String, f64>,
}

impl EligibilityBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current weight (base weight for unseen executors).
    pub fn weight(&self, executor_id: &str) -> f64 {
        self.weights
            .get(executor_id)
            .map(|w| *w.value())
            .unwrap_or(BASE_WEIGHT)
    }

    /// Adjust the weight for a reported outcome.
    pub fn record_outcome(&self, executor_id: &str, status: ResultStatus) {
        let delta = match status {
            ResultStatus::Completed => 0.1,
            ResultStatus::CompletedWithIssues => 0.05,
            ResultStatus::Failed => -0.1,
            ResultStatus::Partial | ResultStatus::Blocked | ResultStatus::Withdrawn => 0.0,
        };
        let mut entry = self
            .weights
            .entry(executor_id.to_string())
            .or_insert(BASE_WEIGHT);
        *entry = (*entry + delta).clamp(MIN_WEIGHT, MAX_WEIGHT);
        debug!(executor_id = %executor_id, status = status.as_str(), weight = *entry, "Eligibility updated");
    }

    /// Candidates ordered by weight (desc), then id.
    pub fn rank<'a>(&self, candidates: impl IntoIterator<Item = &'a str>) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = candidates
            .into_iter()
            .map(|id| (id.to_string(), self.weight(id)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }
}
