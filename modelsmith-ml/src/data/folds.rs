//! Cross-validation fold plans and holdout splits.

use super::{ClassIndex, TaskType};
use crate::seed::stream_rng;
use ndarray::Array1;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// How rows were assigned to folds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldStrategy {
    KFold,
    Stratified,
}

/// One train/validation split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// A complete k-fold partition of `0..n`.
#[derive(Debug, Clone)]
pub struct FoldPlan {
    pub strategy: FoldStrategy,
    pub requested: usize,
    pub folds: Vec<Fold>,
}

/// Fold count actually used for `n` samples when `k` were requested.
///
/// Every fold needs at least two samples, so small datasets get
/// `max(2, n / 2)` folds instead of an error.
pub fn effective_folds(n: usize, k: usize) -> usize {
    let k = k.max(2);
    if n < 2 * k { (n / 2).max(2) } else { k }
}

impl FoldPlan {
    /// Plan folds for target `y`.
    ///
    /// Classification targets with at least two classes, each having at least
    /// k members, are stratified. Everything else uses shuffled k-fold.
    pub fn new(task: TaskType, y: &Array1<f64>, requested: usize, seed: u64) -> Self {
        let n = y.len();
        let k = effective_folds(n, requested);
        let mut rng = stream_rng(seed, 0xF01D);

        let stratified_groups = match task {
            TaskType::Classification => stratify(y, k),
            TaskType::Regression => None,
        };

        let mut assignment = vec![0usize; n];
        let strategy = match stratified_groups {
            Some(mut groups) => {
                let mut offset = 0;
                for group in groups.iter_mut() {
                    group.shuffle(&mut rng);
                    for (i, &row) in group.iter().enumerate() {
                        assignment[row] = (offset + i) % k;
                    }
                    offset = (offset + group.len()) % k;
                }
                FoldStrategy::Stratified
            }
            None => {
                let mut order: Vec<usize> = (0..n).collect();
                order.shuffle(&mut rng);
                for (i, &row) in order.iter().enumerate() {
                    assignment[row] = i % k;
                }
                FoldStrategy::KFold
            }
        };

        let folds = (0..k)
            .map(|f| {
                let (test, train): (Vec<usize>, Vec<usize>) =
                    (0..n).partition(|&row| assignment[row] == f);
                Fold { train, test }
            })
            .collect();

        Self {
            strategy,
            requested,
            folds,
        }
    }

    pub fn k(&self) -> usize {
        self.folds.len()
    }

    /// Fold index of every row.
    pub fn assignment(&self, n: usize) -> Vec<usize> {
        let mut out = vec![0; n];
        for (f, fold) in self.folds.iter().enumerate() {
            for &row in &fold.test {
                out[row] = f;
            }
        }
        out
    }
}

/// Rows grouped by class, or `None` when stratification is not possible.
fn stratify(y: &Array1<f64>, k: usize) -> Option<Vec<Vec<usize>>> {
    let classes = ClassIndex::from_targets(y).ok()?;
    if classes.len() < 2 {
        return None;
    }
    let encoded = classes.encode(y).ok()?;
    let mut groups = vec![Vec::new(); classes.len()];
    for (row, c) in encoded.into_iter().enumerate() {
        groups[c].push(row);
    }
    groups.iter().all(|g| g.len() >= k).then_some(groups)
}

/// Split rows into `(train, holdout)` with roughly `fraction` held out.
///
/// Stratified by class for classification. Returns `None` when the holdout
/// or the training side would be empty.
pub fn holdout_split(
    task: TaskType,
    y: &Array1<f64>,
    fraction: f64,
    seed: u64,
) -> Option<(Vec<usize>, Vec<usize>)> {
    let n = y.len();
    if !(fraction > 0.0 && fraction < 1.0) || n < 2 {
        return None;
    }
    let mut rng = stream_rng(seed, 0x401D);

    let groups: Vec<Vec<usize>> = match task {
        TaskType::Classification => stratify(y, 2).unwrap_or_else(|| vec![(0..n).collect()]),
        TaskType::Regression => vec![(0..n).collect()],
    };

    let mut train = Vec::with_capacity(n);
    let mut holdout = Vec::new();
    for mut group in groups {
        group.shuffle(&mut rng);
        let take = ((group.len() as f64 * fraction).round() as usize).min(group.len() - 1);
        holdout.extend_from_slice(&group[..take]);
        train.extend_from_slice(&group[take..]);
    }
    if holdout.is_empty() || train.is_empty() {
        return None;
    }
    train.sort_unstable();
    holdout.sort_unstable();
    Some((train, holdout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn covers_exactly_once(plan: &FoldPlan, n: usize) {
        let mut seen = vec![0; n];
        for fold in &plan.folds {
            for &row in &fold.test {
                seen[row] += 1;
            }
            assert_eq!(fold.train.len() + fold.test.len(), n);
            assert!(fold.train.iter().all(|r| !fold.test.contains(r)));
        }
        assert!(seen.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_effective_folds() {
        assert_eq!(effective_folds(100, 5), 5);
        assert_eq!(effective_folds(10, 5), 5);
        assert_eq!(effective_folds(9, 5), 4);
        assert_eq!(effective_folds(3, 5), 2);
        assert_eq!(effective_folds(50, 1), 2);
    }

    #[test]
    fn test_kfold_regression() {
        let y = Array1::from_iter((0..23).map(|v| v as f64));
        let plan = FoldPlan::new(TaskType::Regression, &y, 5, 7);
        assert_eq!(plan.strategy, FoldStrategy::KFold);
        assert_eq!(plan.k(), 5);
        covers_exactly_once(&plan, 23);
    }

    #[test]
    fn test_stratified_keeps_class_balance() {
        let y = Array1::from_iter((0..40).map(|i| if i < 30 { 0.0 } else { 1.0 }));
        let plan = FoldPlan::new(TaskType::Classification, &y, 5, 1);
        assert_eq!(plan.strategy, FoldStrategy::Stratified);
        covers_exactly_once(&plan, 40);
        for fold in &plan.folds {
            let positives = fold.test.iter().filter(|&&r| y[r] == 1.0).count();
            assert_eq!(positives, 2);
        }
    }

    #[test]
    fn test_rare_class_falls_back_to_kfold() {
        let mut labels = vec![0.0; 20];
        labels[0] = 1.0;
        let y = Array1::from(labels);
        let plan = FoldPlan::new(TaskType::Classification, &y, 5, 1);
        assert_eq!(plan.strategy, FoldStrategy::KFold);
        covers_exactly_once(&plan, 20);
    }

    #[test]
    fn test_plan_is_seeded() {
        let y = Array1::from_iter((0..30).map(|v| v as f64));
        let a = FoldPlan::new(TaskType::Regression, &y, 3, 99);
        let b = FoldPlan::new(TaskType::Regression, &y, 3, 99);
        assert_eq!(a.folds, b.folds);
    }

    #[test]
    fn test_holdout_split() {
        let y = Array1::from_iter((0..50).map(|i| (i % 2) as f64));
        let (train, holdout) = holdout_split(TaskType::Classification, &y, 0.2, 3).unwrap();
        assert_eq!(train.len() + holdout.len(), 50);
        assert_eq!(holdout.len(), 10);
        assert_eq!(holdout.iter().filter(|&&r| y[r] == 1.0).count(), 5);
        assert!(holdout_split(TaskType::Regression, &y, 0.0, 3).is_none());
    }
}
