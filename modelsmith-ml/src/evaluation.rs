//! Candidate evaluation under k-fold cross-validation.
//!
//! The evaluator is the failure boundary of a search: construction errors,
//! fit and predict errors, panics and non-finite metrics all become an
//! [`Evaluation::Penalized`] value rather than an error.

use crate::data::{Dataset, Fold, FoldPlan, TaskType};
use crate::error::{MlError, Result};
use crate::metrics::Metric;
use crate::params::HyperParams;
use crate::registry::{Family, ModelFactory, ModelRegistry};
use crate::search::TrialStatus;
use crate::seed::derive_seed;
use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Normalized score recorded for failed candidates. Worse than any real score.
pub const PENALTY_SCORE: f64 = 1e12;

/// Result of evaluating one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// All folds scored. `score` is the mean normalized fold score, `raw` the
    /// mean metric value in its natural orientation.
    Scored {
        score: f64,
        raw: f64,
        fold_scores: Vec<f64>,
    },
    /// Stopped by the pruner; the means cover the folds that ran.
    Pruned {
        score: f64,
        raw: f64,
        fold_scores: Vec<f64>,
    },
    Penalized { reason: String },
}

impl Evaluation {
    /// Normalized score, [`PENALTY_SCORE`] when penalized.
    pub fn score(&self) -> f64 {
        match self {
            Evaluation::Scored { score, .. } | Evaluation::Pruned { score, .. } => *score,
            Evaluation::Penalized { .. } => PENALTY_SCORE,
        }
    }

    pub fn raw(&self) -> Option<f64> {
        match self {
            Evaluation::Scored { raw, .. } | Evaluation::Pruned { raw, .. } => Some(*raw),
            Evaluation::Penalized { .. } => None,
        }
    }

    pub fn fold_scores(&self) -> &[f64] {
        match self {
            Evaluation::Scored { fold_scores, .. } | Evaluation::Pruned { fold_scores, .. } => {
                fold_scores
            }
            Evaluation::Penalized { .. } => &[],
        }
    }

    pub fn status(&self) -> TrialStatus {
        match self {
            Evaluation::Scored { .. } => TrialStatus::Complete,
            Evaluation::Pruned { .. } => TrialStatus::Pruned,
            Evaluation::Penalized { .. } => TrialStatus::Penalized,
        }
    }

    pub fn is_penalized(&self) -> bool {
        matches!(self, Evaluation::Penalized { .. })
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            Evaluation::Penalized { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Decides after each fold whether a trial should stop. Receives the fold
/// index and the running mean of normalized fold scores.
pub type PruneCheck<'a> = &'a (dyn Fn(usize, f64) -> bool + Sync);

/// Scores (family, hyperparameters) pairs by cross-validation.
#[derive(Clone)]
pub struct CandidateEvaluator {
    factory: Arc<dyn ModelFactory>,
    task: TaskType,
    metric: Metric,
    folds: usize,
    seed: u64,
}

impl std::fmt::Debug for CandidateEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateEvaluator")
            .field("task", &self.task)
            .field("metric", &self.metric)
            .field("folds", &self.folds)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl CandidateEvaluator {
    pub fn new(
        registry: ModelRegistry,
        task: TaskType,
        metric: Metric,
        folds: usize,
        seed: u64,
    ) -> Result<Self> {
        Self::with_factory(Arc::new(registry), task, metric, folds, seed)
    }

    /// Evaluate with a custom model factory.
    pub fn with_factory(
        factory: Arc<dyn ModelFactory>,
        task: TaskType,
        metric: Metric,
        folds: usize,
        seed: u64,
    ) -> Result<Self> {
        if !metric.supports(task) {
            return Err(MlError::config(format!("metric {metric} does not apply to {task}")));
        }
        if folds < 2 {
            return Err(MlError::config(format!("cv_folds must be >= 2, got {folds}")));
        }
        Ok(Self {
            factory,
            task,
            metric: metric.resolve(task),
            folds,
            seed,
        })
    }

    pub fn task(&self) -> TaskType {
        self.task
    }

    /// The resolved metric (never `Auto`).
    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn folds(&self) -> usize {
        self.folds
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn factory(&self) -> &Arc<dyn ModelFactory> {
        &self.factory
    }

    /// Fold plan shared by every trial of a search.
    pub fn plan(&self, dataset: &Dataset) -> FoldPlan {
        let plan = FoldPlan::new(self.task, dataset.y(), self.folds, self.seed);
        if plan.k() != self.folds {
            tracing::debug!(
                requested = self.folds,
                used = plan.k(),
                samples = dataset.n_samples(),
                "reduced fold count for small dataset"
            );
        }
        plan
    }

    /// Cross-validate one candidate with a fresh fold plan.
    pub fn evaluate(&self, family: Family, params: &HyperParams, dataset: &Dataset) -> Evaluation {
        let plan = self.plan(dataset);
        self.evaluate_planned(family, params, dataset, &plan, self.seed, None)
    }

    /// Cross-validate one candidate on `plan`.
    ///
    /// Fold models are seeded from `model_seed` and the fold index. Without a
    /// prune check folds run in parallel; with one they run in order so the
    /// check sees each running mean.
    pub fn evaluate_planned(
        &self,
        family: Family,
        params: &HyperParams,
        dataset: &Dataset,
        plan: &FoldPlan,
        model_seed: u64,
        prune: Option<PruneCheck<'_>>,
    ) -> Evaluation {
        if dataset.task() != self.task {
            return Evaluation::Penalized {
                reason: format!("dataset task {} does not match {}", dataset.task(), self.task),
            };
        }

        let mut raws = Vec::with_capacity(plan.k());
        match prune {
            None => {
                let results: Vec<std::result::Result<f64, String>> = plan
                    .folds
                    .par_iter()
                    .enumerate()
                    .map(|(i, fold)| {
                        let seed = derive_seed(model_seed, i as u64);
                        self.score_fold(family, params, dataset, fold, seed)
                    })
                    .collect();
                for (i, result) in results.into_iter().enumerate() {
                    match result {
                        Ok(raw) => raws.push(raw),
                        Err(reason) => return self.penalize(family, i, reason),
                    }
                }
            }
            Some(check) => {
                for (i, fold) in plan.folds.iter().enumerate() {
                    let seed = derive_seed(model_seed, i as u64);
                    match self.score_fold(family, params, dataset, fold, seed) {
                        Ok(raw) => raws.push(raw),
                        Err(reason) => return self.penalize(family, i, reason),
                    }
                    if i + 1 < plan.k() {
                        let running = self.summarize(&raws).0;
                        if check(i, running) {
                            let (score, raw, fold_scores) = self.summarize(&raws);
                            tracing::debug!(family = %family, fold = i, score, "trial pruned");
                            return Evaluation::Pruned {
                                score,
                                raw,
                                fold_scores,
                            };
                        }
                    }
                }
            }
        }

        let (score, raw, fold_scores) = self.summarize(&raws);
        Evaluation::Scored {
            score,
            raw,
            fold_scores,
        }
    }

    /// Mean normalized score, mean raw value and per-fold normalized scores.
    fn summarize(&self, raws: &[f64]) -> (f64, f64, Vec<f64>) {
        let fold_scores: Vec<f64> = raws.iter().map(|r| self.metric.normalize(*r)).collect();
        let n = raws.len().max(1) as f64;
        let score = fold_scores.iter().sum::<f64>() / n;
        let raw = raws.iter().sum::<f64>() / n;
        (score, raw, fold_scores)
    }

    fn penalize(&self, family: Family, fold: usize, reason: String) -> Evaluation {
        tracing::debug!(family = %family, fold, reason = %reason, "candidate penalized");
        Evaluation::Penalized {
            reason: format!("fold {fold}: {reason}"),
        }
    }

    fn score_fold(
        &self,
        family: Family,
        params: &HyperParams,
        dataset: &Dataset,
        fold: &Fold,
        seed: u64,
    ) -> std::result::Result<f64, String> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<f64> {
            let mut model = self.factory.construct(family, params, self.task, seed)?;
            let (x_train, y_train) = dataset.subset(&fold.train);
            let (x_test, y_test) = dataset.subset(&fold.test);
            model.fit(&x_train, &y_train)?;
            let pred = model.predict(&x_test)?;
            let proba = match self.metric {
                Metric::Auc => Some(model.predict_proba(&x_test)?),
                _ => None,
            };
            self.metric
                .compute(&y_test, &pred, proba.as_ref(), model.classes())
        }));
        match outcome {
            Ok(Ok(raw)) if raw.is_finite() => Ok(raw),
            Ok(Ok(raw)) => Err(format!("{} is not finite ({raw})", self.metric)),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
