//! CART decision trees used as forest members.

use ndarray::{Array2, ArrayView1};
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::index::sample;

/// Target a tree is grown against.
pub(crate) enum TreeTarget<'a> {
    Regression(&'a [f64]),
    /// Labels are class indices in `0..n_classes`.
    Classification { labels: &'a [usize], n_classes: usize },
}

#[derive(Debug, Clone)]
pub(crate) struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered at each split.
    pub max_features: usize,
}

#[derive(Debug, Clone)]
enum Node {
    /// Mean target for regression, class distribution for classification.
    Leaf(Vec<f64>),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct DecisionTree {
    root: Node,
    importances: Vec<f64>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Grower<'a> {
    x: &'a Array2<f64>,
    target: &'a TreeTarget<'a>,
    params: &'a TreeParams,
    importances: Vec<f64>,
}

impl DecisionTree {
    /// Grow a tree on `rows` of `x`. Rows may repeat (bootstrap samples).
    pub(crate) fn fit(
        x: &Array2<f64>,
        target: &TreeTarget<'_>,
        rows: &[usize],
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let mut grower = Grower {
            x,
            target,
            params,
            importances: vec![0.0; x.ncols()],
        };
        let mut rows = rows.to_vec();
        let root = grower.build(&mut rows, 0, rng);
        Self {
            root,
            importances: grower.importances,
        }
    }

    /// Leaf payload reached by `row`.
    pub(crate) fn predict_row(&self, row: ArrayView1<'_, f64>) -> &[f64] {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf(value) => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    /// Unnormalized impurity decrease per feature.
    pub(crate) fn importances(&self) -> &[f64] {
        &self.importances
    }
}

impl Grower<'_> {
    fn build(&mut self, rows: &mut [usize], depth: usize, rng: &mut StdRng) -> Node {
        let leaf = self.leaf_value(rows);
        if depth >= self.params.max_depth
            || rows.len() < self.params.min_samples_split
            || rows.len() < 2 * self.params.min_samples_leaf
            || self.is_pure(rows)
        {
            return Node::Leaf(leaf);
        }

        let Some(best) = self.best_split(rows, rng) else {
            return Node::Leaf(leaf);
        };
        self.importances[best.feature] += best.gain;

        let split_at = partition(rows, |&r| self.x[[r, best.feature]] <= best.threshold);
        let (left_rows, right_rows) = rows.split_at_mut(split_at);
        let left = self.build(left_rows, depth + 1, rng);
        let right = self.build(right_rows, depth + 1, rng);
        Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn leaf_value(&self, rows: &[usize]) -> Vec<f64> {
        match self.target {
            TreeTarget::Regression(y) => {
                let sum: f64 = rows.iter().map(|&r| y[r]).sum();
                vec![sum / rows.len().max(1) as f64]
            }
            TreeTarget::Classification { labels, n_classes } => {
                let mut dist = vec![0.0; *n_classes];
                for &r in rows {
                    dist[labels[r]] += 1.0;
                }
                let n = rows.len().max(1) as f64;
                dist.iter_mut().for_each(|d| *d /= n);
                dist
            }
        }
    }

    fn is_pure(&self, rows: &[usize]) -> bool {
        match self.target {
            TreeTarget::Regression(y) => {
                let first = y[rows[0]];
                rows.iter().all(|&r| y[r] == first)
            }
            TreeTarget::Classification { labels, .. } => {
                let first = labels[rows[0]];
                rows.iter().all(|&r| labels[r] == first)
            }
        }
    }

    fn best_split(&self, rows: &[usize], rng: &mut StdRng) -> Option<SplitCandidate> {
        let n_features = self.x.ncols();
        let k = self.params.max_features.clamp(1, n_features);
        let mut features: Vec<usize> = sample(rng, n_features, k).into_vec();
        features.sort_unstable();

        let mut best: Option<SplitCandidate> = None;
        let mut sorted = rows.to_vec();
        for feature in features {
            sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));
            if let Some(candidate) = self.scan_feature(&sorted, feature) {
                if best.as_ref().is_none_or(|b| candidate.gain > b.gain) {
                    best = Some(candidate);
                }
            }
        }
        best.filter(|b| b.gain > 1e-12)
    }

    /// Sweep thresholds over rows sorted by `feature`.
    fn scan_feature(&self, sorted: &[usize], feature: usize) -> Option<SplitCandidate> {
        let n = sorted.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let value = |i: usize| self.x[[sorted[i], feature]];
        let mut best: Option<SplitCandidate> = None;

        let consider = |i: usize, gain: f64, best: &mut Option<SplitCandidate>| {
            // split between sorted[i] and sorted[i + 1]
            let left_n = i + 1;
            if left_n < min_leaf || n - left_n < min_leaf {
                return;
            }
            let (lo, hi) = (value(i), value(i + 1));
            if lo >= hi {
                return;
            }
            if best.as_ref().is_none_or(|b| gain > b.gain) {
                *best = Some(SplitCandidate {
                    feature,
                    threshold: lo + (hi - lo) / 2.0,
                    gain,
                });
            }
        };

        match self.target {
            TreeTarget::Regression(y) => {
                let total: f64 = sorted.iter().map(|&r| y[r]).sum();
                let parent = total * total / n as f64;
                let mut left_sum = 0.0;
                for i in 0..n - 1 {
                    left_sum += y[sorted[i]];
                    let left_n = (i + 1) as f64;
                    let right_n = (n - i - 1) as f64;
                    let right_sum = total - left_sum;
                    // SSE reduction
                    let gain =
                        left_sum * left_sum / left_n + right_sum * right_sum / right_n - parent;
                    consider(i, gain, &mut best);
                }
            }
            TreeTarget::Classification { labels, n_classes } => {
                let mut total = vec![0.0; *n_classes];
                for &r in sorted {
                    total[labels[r]] += 1.0;
                }
                let weighted_gini = |counts: &[f64], m: f64| -> f64 {
                    if m == 0.0 {
                        return 0.0;
                    }
                    m - counts.iter().map(|c| c * c).sum::<f64>() / m
                };
                let parent = weighted_gini(&total, n as f64);
                let mut left = vec![0.0; *n_classes];
                let mut right = total.clone();
                for i in 0..n - 1 {
                    let c = labels[sorted[i]];
                    left[c] += 1.0;
                    right[c] -= 1.0;
                    let left_n = (i + 1) as f64;
                    let gain = parent
                        - weighted_gini(&left, left_n)
                        - weighted_gini(&right, n as f64 - left_n);
                    consider(i, gain, &mut best);
                }
            }
        }
        best
    }
}

/// Reorder `rows` so every element matching `pred` comes first. Returns the
/// number of matching elements.
fn partition<F: Fn(&usize) -> bool>(rows: &mut [usize], pred: F) -> usize {
    let mut next = 0;
    for i in 0..rows.len() {
        if pred(&rows[i]) {
            rows.swap(i, next);
            next += 1;
        }
    }
    next
}

/// Draw `n` row indices with replacement.
pub(crate) fn bootstrap(n: usize, rng: &mut StdRng) -> Vec<usize> {
    (0..n).map(|_| rng.gen_range(0..n)).collect()
}
