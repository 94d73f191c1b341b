//! Trial search: search spaces, the trial log and (with the `search`
//! feature) the engine, samplers and pruner.

#[cfg(feature = "search")]
pub mod engine;
#[cfg(feature = "search")]
pub mod pruner;
#[cfg(feature = "search")]
pub mod sampler;
pub mod space;

#[cfg(feature = "search")]
pub use engine::SearchEngine;
#[cfg(feature = "search")]
pub use pruner::MedianPruner;
#[cfg(feature = "search")]
pub use sampler::{RandomSampler, Sampler, TpeSampler, TpeSettings};
pub use space::{FamilySpace, ParamDistribution, ParamSpec, SearchSpace};

use crate::params::HyperParams;
use crate::registry::Family;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome class of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// Every fold was scored.
    Complete,
    /// Evaluation failed and the penalty score was recorded.
    Penalized,
    /// Stopped early by the pruner after at least one fold.
    Pruned,
}

/// One evaluated (family, hyperparameters) pair. Immutable once logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub index: usize,
    pub family: Family,
    pub params: HyperParams,
    /// Normalized score, lower is better. The penalty sentinel when penalized.
    pub score: f64,
    /// Metric value in its natural orientation. `None` when penalized.
    pub raw_score: Option<f64>,
    pub status: TrialStatus,
    pub fold_scores: Vec<f64>,
    pub elapsed_ms: u64,
    /// Failure reason for penalized trials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl Trial {
    /// Whether the trial produced a real score.
    pub fn is_valid(&self) -> bool {
        self.status != TrialStatus::Penalized
    }
}

/// Append-only, index-ordered record of every trial in one search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrialLog {
    trials: Vec<Trial>,
}

impl TrialLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a trial. Its index must be the next one.
    pub(crate) fn push(&mut self, trial: Trial) {
        debug_assert_eq!(trial.index, self.trials.len());
        self.trials.push(trial);
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// Best trial: the lowest score among complete trials, falling back to
    /// pruned trials when none completed. Ties go to the earliest trial.
    pub fn best(&self) -> Option<&Trial> {
        let pick = |status: TrialStatus| {
            self.trials
                .iter()
                .filter(|t| t.status == status)
                .fold(None::<&Trial>, |best, t| match best {
                    Some(b) if b.score <= t.score => Some(b),
                    _ => Some(t),
                })
        };
        pick(TrialStatus::Complete).or_else(|| pick(TrialStatus::Pruned))
    }

    pub fn count(&self, status: TrialStatus) -> usize {
        self.trials.iter().filter(|t| t.status == status).count()
    }

    pub fn penalized(&self) -> usize {
        self.count(TrialStatus::Penalized)
    }

    pub fn pruned(&self) -> usize {
        self.count(TrialStatus::Pruned)
    }

    /// The (family, params) sequence, in trial order.
    pub fn sampled(&self) -> Vec<(Family, HyperParams)> {
        self.trials
            .iter()
            .map(|t| (t.family, t.params.clone()))
            .collect()
    }
}

/// Result of a finished search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub best: Trial,
    pub log: TrialLog,
    pub elapsed: Duration,
    /// Whether the timeout stopped the search before `n_trials`.
    pub timed_out: bool,
}

impl SearchOutcome {
    pub fn penalized(&self) -> usize {
        self.log.penalized()
    }

    pub fn pruned(&self) -> usize {
        self.log.pruned()
    }
}

#[cfg(test)]
pub(crate) fn trial(index: usize, family: Family, score: f64, status: TrialStatus) -> Trial {
    Trial {
        index,
        family,
        params: HyperParams::new(),
        score,
        raw_score: Some(score),
        status,
        fold_scores: vec![score],
        elapsed_ms: 0,
        failure: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_prefers_complete_and_earliest() {
        let mut log = TrialLog::new();
        log.push(trial(0, Family::Linear, 0.5, TrialStatus::Complete));
        log.push(trial(1, Family::RandomForest, 0.1, TrialStatus::Pruned));
        log.push(trial(2, Family::RandomForest, 0.5, TrialStatus::Complete));
        log.push(trial(3, Family::Linear, 1e12, TrialStatus::Penalized));
        let best = log.best().unwrap();
        assert_eq!(best.index, 0);
        assert_eq!(log.penalized(), 1);
        assert_eq!(log.pruned(), 1);
    }

    #[test]
    fn test_best_falls_back_to_pruned() {
        let mut log = TrialLog::new();
        log.push(trial(0, Family::Linear, 1e12, TrialStatus::Penalized));
        log.push(trial(1, Family::Linear, 0.7, TrialStatus::Pruned));
        assert_eq!(log.best().unwrap().index, 1);

        let mut failed = TrialLog::new();
        failed.push(trial(0, Family::Linear, 1e12, TrialStatus::Penalized));
        assert!(failed.best().is_none());
    }
}
