//! Gradient boosted trees with second-order (Newton) leaf values.
//!
//! Two growth policies back two families. Depth-wise growth expands every
//! node of a level before the next (bounded by `max_depth`). Leaf-wise growth
//! always expands the leaf with the largest gain (bounded by `num_leaves`).

use super::{
    Model, check_features, labels_from_proba, normalize_importances, sigmoid, softmax_rows,
    training_metrics,
};
use crate::data::{ClassIndex, TaskType, check_xy};
use crate::error::{MlError, Result};
use crate::metrics::Metrics;
use crate::params::{HyperParams, ParamReader};
use crate::seed::stream_rng;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::seq::index::sample;
use std::collections::VecDeque;

pub const DEPTHWISE_TAG: &str = "gbt_depthwise";
pub const LEAFWISE_TAG: &str = "gbt_leafwise";

const MIN_HESSIAN: f64 = 1e-6;

/// Order in which tree nodes are expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthPolicy {
    DepthWise,
    LeafWise,
}

impl GrowthPolicy {
    pub fn tag(self) -> &'static str {
        match self {
            GrowthPolicy::DepthWise => DEPTHWISE_TAG,
            GrowthPolicy::LeafWise => LEAFWISE_TAG,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoostingParams {
    pub growth: GrowthPolicy,
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Leaf budget per tree. Only bounds leaf-wise growth.
    pub num_leaves: usize,
    /// Minimum hessian sum in a child.
    pub min_child_weight: f64,
    pub min_child_samples: usize,
    /// Row fraction drawn (without replacement) per round.
    pub subsample: f64,
    /// Feature fraction drawn per tree.
    pub colsample: f64,
    pub reg_lambda: f64,
}

impl BoostingParams {
    pub fn defaults(growth: GrowthPolicy) -> Self {
        match growth {
            GrowthPolicy::DepthWise => Self {
                growth,
                n_estimators: 100,
                learning_rate: 0.1,
                max_depth: 6,
                num_leaves: usize::MAX,
                min_child_weight: 1.0,
                min_child_samples: 1,
                subsample: 1.0,
                colsample: 1.0,
                reg_lambda: 1.0,
            },
            GrowthPolicy::LeafWise => Self {
                growth,
                n_estimators: 100,
                learning_rate: 0.1,
                max_depth: 16,
                num_leaves: 31,
                min_child_weight: 1e-3,
                min_child_samples: 20,
                subsample: 1.0,
                colsample: 1.0,
                reg_lambda: 0.0,
            },
        }
    }

    /// Parse the family's parameter map. The two policies accept different keys.
    pub fn from_params(growth: GrowthPolicy, params: &HyperParams) -> Result<Self> {
        let d = Self::defaults(growth);
        let mut r = ParamReader::new(growth.tag(), params);
        let mut parsed = Self {
            growth,
            n_estimators: r.usize_or("n_estimators", d.n_estimators, 1)?,
            learning_rate: r.fraction_or("learning_rate", d.learning_rate)?,
            max_depth: r.usize_or("max_depth", d.max_depth, 1)?,
            subsample: r.fraction_or("subsample", d.subsample)?,
            colsample: r.fraction_or("colsample_bytree", d.colsample)?,
            reg_lambda: r.f64_in("reg_lambda", d.reg_lambda, 0.0, 1e4)?,
            ..d
        };
        match growth {
            GrowthPolicy::DepthWise => {
                parsed.min_child_weight =
                    r.f64_in("min_child_weight", d.min_child_weight, 0.0, 1e4)?;
            }
            GrowthPolicy::LeafWise => {
                parsed.num_leaves = r.usize_or("num_leaves", d.num_leaves, 2)?;
                parsed.min_child_samples =
                    r.usize_or("min_child_samples", d.min_child_samples, 1)?;
            }
        }
        r.finish()?;
        Ok(parsed)
    }
}

#[derive(Debug, Clone)]
enum GNode {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// One regression tree over gradients, stored as an arena.
#[derive(Debug, Clone)]
struct GradientTree {
    nodes: Vec<GNode>,
}

impl GradientTree {
    fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                GNode::Leaf(v) => return *v,
                GNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => idx = if row[*feature] <= *threshold { *left } else { *right },
            }
        }
    }
}

struct SplitInfo {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Pending {
    node: usize,
    rows: Vec<usize>,
    depth: usize,
    split: SplitInfo,
}

/// Grows one tree against gradient statistics.
struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    params: &'a BoostingParams,
}

impl TreeBuilder<'_> {
    fn leaf_value(&self, rows: &[usize]) -> f64 {
        let (g, h) = self.sums(rows);
        -self.params.learning_rate * g / (h + self.params.reg_lambda).max(MIN_HESSIAN)
    }

    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter()
            .fold((0.0, 0.0), |(g, h), &r| (g + self.grad[r], h + self.hess[r]))
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.reg_lambda).max(MIN_HESSIAN)
    }

    fn find_split(&self, rows: &[usize]) -> Option<SplitInfo> {
        let min_samples = self.params.min_child_samples.max(1);
        if rows.len() < 2 * min_samples {
            return None;
        }
        let (g_total, h_total) = self.sums(rows);
        let parent = self.score(g_total, h_total);
        let mut best: Option<SplitInfo> = None;
        let mut sorted = rows.to_vec();

        for &feature in self.features {
            sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));
            let (mut gl, mut hl) = (0.0, 0.0);
            for i in 0..sorted.len() - 1 {
                gl += self.grad[sorted[i]];
                hl += self.hess[sorted[i]];
                let left_n = i + 1;
                if left_n < min_samples || sorted.len() - left_n < min_samples {
                    continue;
                }
                let (gr, hr) = (g_total - gl, h_total - hl);
                if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                    continue;
                }
                let lo = self.x[[sorted[i], feature]];
                let hi = self.x[[sorted[i + 1], feature]];
                if lo >= hi {
                    continue;
                }
                let gain = 0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent);
                if best.as_ref().is_none_or(|b| gain > b.gain) {
                    best = Some(SplitInfo {
                        feature,
                        threshold: lo + (hi - lo) / 2.0,
                        gain,
                    });
                }
            }
        }
        best.filter(|b| b.gain > 1e-12)
    }

    fn pending(&self, node: usize, rows: Vec<usize>, depth: usize) -> Option<Pending> {
        if depth >= self.params.max_depth {
            return None;
        }
        let split = self.find_split(&rows)?;
        Some(Pending {
            node,
            rows,
            depth,
            split,
        })
    }

    /// Grow from `rows`, adding split gains to `importances`.
    fn grow(&self, rows: Vec<usize>, importances: &mut [f64]) -> GradientTree {
        let mut nodes = vec![GNode::Leaf(self.leaf_value(&rows))];
        let mut queue: VecDeque<Pending> = self.pending(0, rows, 0).into_iter().collect();
        let mut leaves = 1;

        while leaves < self.params.num_leaves {
            let next = match self.params.growth {
                GrowthPolicy::DepthWise => queue.pop_front(),
                GrowthPolicy::LeafWise => {
                    let best = queue
                        .iter()
                        .enumerate()
                        .max_by(|a, b| a.1.split.gain.total_cmp(&b.1.split.gain))
                        .map(|(i, _)| i);
                    best.and_then(|i| queue.remove(i))
                }
            };
            let Some(Pending {
                node,
                rows,
                depth,
                split,
            }) = next
            else {
                break;
            };

            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                .into_iter()
                .partition(|&r| self.x[[r, split.feature]] <= split.threshold);
            let left = nodes.len();
            nodes.push(GNode::Leaf(self.leaf_value(&left_rows)));
            let right = nodes.len();
            nodes.push(GNode::Leaf(self.leaf_value(&right_rows)));
            nodes[node] = GNode::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };
            importances[split.feature] += split.gain;
            leaves += 1;

            queue.extend(self.pending(left, left_rows, depth + 1));
            queue.extend(self.pending(right, right_rows, depth + 1));
        }
        GradientTree { nodes }
    }
}

/// Loss driving the gradients.
#[derive(Debug, Clone, Copy)]
enum Loss {
    Squared,
    Logistic,
    Softmax(usize),
}

impl Loss {
    fn outputs(self) -> usize {
        match self {
            Loss::Squared | Loss::Logistic => 1,
            Loss::Softmax(k) => k,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GradientBoosting {
    params: BoostingParams,
    task: TaskType,
    seed: u64,
    base: Vec<f64>,
    /// One tree per output per round.
    rounds: Vec<Vec<GradientTree>>,
    classes: Option<ClassIndex>,
    loss: Option<Loss>,
    n_features: usize,
    importances: Vec<f64>,
}

impl GradientBoosting {
    pub fn new(params: BoostingParams, task: TaskType, seed: u64) -> Self {
        Self {
            params,
            task,
            seed,
            base: Vec::new(),
            rounds: Vec::new(),
            classes: None,
            loss: None,
            n_features: 0,
            importances: Vec::new(),
        }
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    /// Raw additive scores, one column per output.
    fn raw_scores(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let Some(loss) = self.loss else {
            return Err(MlError::not_fitted(self.params.growth.tag()));
        };
        check_features(self.params.growth.tag(), x, self.n_features)?;
        let k = loss.outputs();
        let mut scores = Array2::<f64>::zeros((x.nrows(), k));
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            for c in 0..k {
                scores[[i, c]] = self.base[c];
            }
            for round in &self.rounds {
                for (c, tree) in round.iter().enumerate() {
                    scores[[i, c]] += tree.predict_row(row);
                }
            }
        }
        Ok(scores)
    }

    fn initial_scores(loss: Loss, targets: &[f64], labels: &[usize]) -> Vec<f64> {
        let n = targets.len().max(1) as f64;
        match loss {
            Loss::Squared => vec![targets.iter().sum::<f64>() / n],
            Loss::Logistic => {
                let positives = labels.iter().filter(|&&l| l == 1).count() as f64;
                let p = (positives / n).clamp(1e-6, 1.0 - 1e-6);
                vec![(p / (1.0 - p)).ln()]
            }
            Loss::Softmax(k) => {
                let mut counts = vec![0.0; k];
                for &l in labels {
                    counts[l] += 1.0;
                }
                counts.iter().map(|c| (c / n).max(1e-6).ln()).collect()
            }
        }
    }

    /// Gradients and hessians for output `c` given current raw scores.
    fn gradients(
        loss: Loss,
        scores: &Array2<f64>,
        targets: &[f64],
        labels: &[usize],
        c: usize,
    ) -> (Vec<f64>, Vec<f64>) {
        let n = scores.nrows();
        match loss {
            Loss::Squared => ((0..n).map(|i| scores[[i, 0]] - targets[i]).collect(), vec![1.0; n]),
            Loss::Logistic => (0..n)
                .map(|i| {
                    let p = sigmoid(scores[[i, 0]]);
                    let y = if labels[i] == 1 { 1.0 } else { 0.0 };
                    (p - y, (p * (1.0 - p)).max(MIN_HESSIAN))
                })
                .unzip(),
            Loss::Softmax(_) => {
                let mut proba = scores.clone();
                softmax_rows(&mut proba);
                (0..n)
                    .map(|i| {
                        let p = proba[[i, c]];
                        let y = if labels[i] == c { 1.0 } else { 0.0 };
                        (p - y, (p * (1.0 - p)).max(MIN_HESSIAN))
                    })
                    .unzip()
            }
        }
    }
}

impl Model for GradientBoosting {
    fn name(&self) -> &str {
        self.params.growth.tag()
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Metrics> {
        check_xy(x, y)?;
        let n = x.nrows();
        let d = x.ncols();
        let targets = y.to_vec();

        let (classes, labels, loss) = match self.task {
            TaskType::Regression => (None, Vec::new(), Loss::Squared),
            TaskType::Classification => {
                let classes = ClassIndex::from_targets(y)?;
                let labels = classes.encode(y)?;
                let loss = match classes.len() {
                    0 | 1 => {
                        return Err(MlError::model(format!(
                            "{} needs at least two classes",
                            self.params.growth.tag()
                        )));
                    }
                    2 => Loss::Logistic,
                    k => Loss::Softmax(k),
                };
                (Some(classes), labels, loss)
            }
        };

        let k = loss.outputs();
        let base = Self::initial_scores(loss, &targets, &labels);
        let mut scores = Array2::<f64>::zeros((n, k));
        for c in 0..k {
            scores.column_mut(c).fill(base[c]);
        }

        let n_rows = ((n as f64 * self.params.subsample).round() as usize).clamp(1, n);
        let n_cols = ((d as f64 * self.params.colsample).round() as usize).clamp(1, d);
        let mut importances = vec![0.0; d];
        let mut rounds = Vec::with_capacity(self.params.n_estimators);

        for round in 0..self.params.n_estimators {
            let mut rng = stream_rng(self.seed, round as u64);
            let mut rows = sample(&mut rng, n, n_rows).into_vec();
            rows.sort_unstable();
            let mut trees = Vec::with_capacity(k);
            for c in 0..k {
                let mut features = sample(&mut rng, d, n_cols).into_vec();
                features.sort_unstable();
                let (grad, hess) = Self::gradients(loss, &scores, &targets, &labels, c);
                let builder = TreeBuilder {
                    x,
                    grad: &grad,
                    hess: &hess,
                    features: &features,
                    params: &self.params,
                };
                trees.push(builder.grow(rows.clone(), &mut importances));
            }
            for (c, tree) in trees.iter().enumerate() {
                for (i, row) in x.axis_iter(Axis(0)).enumerate() {
                    scores[[i, c]] += tree.predict_row(row);
                }
            }
            rounds.push(trees);
        }

        tracing::debug!(
            family = self.params.growth.tag(),
            rounds = rounds.len(),
            learning_rate = self.params.learning_rate,
            "gradient boosting fitted"
        );
        self.base = base;
        self.rounds = rounds;
        self.classes = classes;
        self.loss = Some(loss);
        self.n_features = d;
        self.importances = importances;
        training_metrics(self, self.task, x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match &self.classes {
            Some(classes) => Ok(labels_from_proba(&self.predict_proba(x)?, classes)),
            None => Ok(self.raw_scores(x)?.column(0).to_owned()),
        }
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let mut scores = self.raw_scores(x)?;
        match self.loss {
            Some(Loss::Logistic) => {
                let p = scores.column(0).mapv(sigmoid);
                let mut proba = Array2::<f64>::zeros((x.nrows(), 2));
                proba.column_mut(0).assign(&p.mapv(|v| 1.0 - v));
                proba.column_mut(1).assign(&p);
                Ok(proba)
            }
            Some(Loss::Softmax(_)) => {
                softmax_rows(&mut scores);
                Ok(scores)
            }
            _ => Err(MlError::model(format!(
                "{} regressor has no class probabilities",
                self.params.growth.tag()
            ))),
        }
    }

    fn classes(&self) -> Option<&ClassIndex> {
        self.classes.as_ref()
    }

    fn is_fitted(&self) -> bool {
        self.loss.is_some()
    }

    fn clone_unfitted(&self) -> Box<dyn Model> {
        Box::new(GradientBoosting::new(self.params.clone(), self.task, self.seed))
    }

    fn feature_importances(&self) -> Option<Array1<f64>> {
        self.loss?;
        Some(normalize_importances(Array1::from(self.importances.clone())))
    }
}
