//! Median pruning between cross-validation folds.

use super::{Trial, TrialStatus};

/// Stops a trial whose running mean after a fold is worse than the median of
/// earlier complete trials at the same fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MedianPruner {
    /// Complete trials required before any pruning happens.
    pub n_warmup_trials: usize,
}

impl MedianPruner {
    pub fn new(n_warmup_trials: usize) -> Self {
        Self { n_warmup_trials }
    }

    pub fn should_prune(&self, fold: usize, running_mean: f64, history: &[Trial]) -> bool {
        let mut reference: Vec<f64> = history
            .iter()
            .filter(|t| t.status == TrialStatus::Complete && t.fold_scores.len() > fold)
            .map(|t| t.fold_scores[..=fold].iter().sum::<f64>() / (fold + 1) as f64)
            .collect();
        if reference.len() < self.n_warmup_trials.max(1) {
            return false;
        }
        reference.sort_by(f64::total_cmp);
        let mid = reference.len() / 2;
        let median = if reference.len() % 2 == 0 {
            (reference[mid - 1] + reference[mid]) / 2.0
        } else {
            reference[mid]
        };
        running_mean > median
    }
}
