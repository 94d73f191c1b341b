//! Sequential trial loop.

use super::pruner::MedianPruner;
use super::sampler::Sampler;
use super::space::SearchSpace;
use super::{SearchOutcome, Trial, TrialLog, TrialStatus};
use crate::data::Dataset;
use crate::error::{MlError, Result};
use crate::evaluation::{CandidateEvaluator, Evaluation};
use crate::seed::derive_seed;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Runs trials one after another until `n_trials` or the timeout.
///
/// The deadline is checked before each trial starts; a running trial always
/// finishes and is logged.
pub struct SearchEngine {
    evaluator: CandidateEvaluator,
    sampler: Box<dyn Sampler>,
    n_trials: usize,
    timeout: Option<Duration>,
    pruner: Option<MedianPruner>,
}

impl SearchEngine {
    pub fn new(evaluator: CandidateEvaluator, sampler: Box<dyn Sampler>, n_trials: usize) -> Self {
        Self {
            evaluator,
            sampler,
            n_trials,
            timeout: None,
            pruner: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_pruner(mut self, pruner: Option<MedianPruner>) -> Self {
        self.pruner = pruner;
        self
    }

    pub fn evaluator(&self) -> &CandidateEvaluator {
        &self.evaluator
    }

    pub fn run(&mut self, space: &SearchSpace, dataset: &Dataset) -> Result<SearchOutcome> {
        if space.is_empty() {
            return Err(MlError::UnknownFamily(
                "no model family is available to search".to_string(),
            ));
        }
        if self.n_trials == 0 {
            return Err(MlError::config("n_trials must be >= 1"));
        }

        let started = Instant::now();
        let plan = self.evaluator.plan(dataset);
        let mut log = TrialLog::new();
        let mut timed_out = false;

        info!(
            sampler = self.sampler.name(),
            n_trials = self.n_trials,
            families = space.families().len(),
            folds = plan.k(),
            "starting search"
        );

        for index in 0..self.n_trials {
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    timed_out = true;
                    info!(completed = index, "search timeout reached");
                    break;
                }
            }

            let family = self.sampler.sample_family(space, log.trials())?;
            let Some(family_space) = space.family(family) else {
                return Err(MlError::UnknownFamily(family.to_string()));
            };
            let params = self.sampler.sample_params(family_space, log.trials());
            debug!(trial = index, family = %family, ?params, "sampled candidate");

            let model_seed = derive_seed(self.evaluator.seed(), index as u64);
            let trial_started = Instant::now();
            let evaluation = match self.pruner {
                Some(pruner) => {
                    let history = log.trials();
                    let check =
                        |fold: usize, running: f64| pruner.should_prune(fold, running, history);
                    self.evaluator
                        .evaluate_planned(family, &params, dataset, &plan, model_seed, Some(&check))
                }
                None => self
                    .evaluator
                    .evaluate_planned(family, &params, dataset, &plan, model_seed, None),
            };
            let elapsed_ms = trial_started.elapsed().as_millis() as u64;

            match &evaluation {
                Evaluation::Penalized { reason } => {
                    warn!(trial = index, family = %family, reason = %reason, "trial penalized")
                }
                Evaluation::Pruned { score, .. } => {
                    info!(trial = index, family = %family, score, "trial pruned")
                }
                Evaluation::Scored { score, raw, .. } => {
                    info!(trial = index, family = %family, score, raw, elapsed_ms, "trial complete")
                }
            }

            log.push(Trial {
                index,
                family,
                params,
                score: evaluation.score(),
                raw_score: evaluation.raw(),
                status: evaluation.status(),
                fold_scores: evaluation.fold_scores().to_vec(),
                elapsed_ms,
                failure: evaluation.failure().map(str::to_string),
            });
        }

        let elapsed = started.elapsed();
        let Some(best) = log.best().cloned() else {
            return Err(MlError::NoValidTrial {
                attempted: log.len(),
                penalized: log.penalized(),
            });
        };

        info!(
            trials = log.len(),
            penalized = log.penalized(),
            pruned = log.count(TrialStatus::Pruned),
            best_family = %best.family,
            best_score = best.score,
            elapsed_ms = elapsed.as_millis() as u64,
            timed_out,
            "search finished"
        );

        Ok(SearchOutcome {
            best,
            log,
            elapsed,
            timed_out,
        })
    }
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("evaluator", &self.evaluator)
            .field("sampler", &self.sampler.name())
            .field("n_trials", &self.n_trials)
            .field("timeout", &self.timeout)
            .field("pruner", &self.pruner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TpeSettings;
    use crate::data::TaskType;
    use crate::metrics::Metric;
    use crate::registry::{Family, ModelRegistry};
    use crate::search::sampler::{RandomSampler, TpeSampler};
    use ndarray::Array2;

    fn dataset() -> Dataset {
        let x = Array2::from_shape_fn((60, 3), |(i, j)| ((i * (j + 3) + j) % 17) as f64 / 4.0);
        let y = x.column(0).mapv(|v| 2.0 * v + 1.0) + &x.column(1);
        Dataset::new(x, y, TaskType::Regression).unwrap()
    }

    fn engine(
        registry: &ModelRegistry,
        n_trials: usize,
        sampler: Box<dyn Sampler>,
    ) -> SearchEngine {
        let evaluator =
            CandidateEvaluator::new(registry.clone(), TaskType::Regression, Metric::Auto, 3, 9)
                .unwrap();
        SearchEngine::new(evaluator, sampler, n_trials)
    }

    #[test]
    fn test_runs_all_trials_and_tracks_best() {
        let registry =
            ModelRegistry::with_families([Family::Linear, Family::RandomForest]).unwrap();
        let space = SearchSpace::for_registry(&registry, TaskType::Regression);
        let outcome = engine(&registry, 6, Box::new(RandomSampler::new(1)))
            .run(&space, &dataset())
            .unwrap();
        assert_eq!(outcome.log.len(), 6);
        assert!(!outcome.timed_out);
        let min = outcome
            .log
            .trials()
            .iter()
            .filter(|t| t.status == TrialStatus::Complete)
            .map(|t| t.score)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(outcome.best.score, min);
        for (i, t) in outcome.log.trials().iter().enumerate() {
            assert_eq!(t.index, i);
        }
    }

    #[test]
    fn test_zero_timeout_runs_nothing() {
        let registry = ModelRegistry::with_families([Family::Linear]).unwrap();
        let space = SearchSpace::for_registry(&registry, TaskType::Regression);
        let err = engine(&registry, 5, Box::new(RandomSampler::new(1)))
            .with_timeout(Some(Duration::ZERO))
            .run(&space, &dataset())
            .unwrap_err();
        assert!(matches!(err, MlError::NoValidTrial { attempted: 0, penalized: 0 }));
    }

    #[test]
    fn test_tpe_run_is_deterministic() {
        let registry =
            ModelRegistry::with_families([Family::Linear, Family::RandomForest]).unwrap();
        let space = SearchSpace::for_registry(&registry, TaskType::Regression);
        let settings = TpeSettings {
            n_startup_trials: 3,
            ..TpeSettings::default()
        };
        let run = || {
            engine(&registry, 6, Box::new(TpeSampler::new(5, settings.clone())))
                .run(&space, &dataset())
                .unwrap()
        };
        let (a, b) = (run(), run());
        assert_eq!(a.log.sampled(), b.log.sampled());
        assert_eq!(a.best.index, b.best.index);
        assert_eq!(a.best.score, b.best.score);
    }

    #[test]
    fn test_pruner_marks_trials() {
        let registry = ModelRegistry::with_families([Family::Linear]).unwrap();
        let space = SearchSpace::for_registry(&registry, TaskType::Regression);
        let outcome = engine(&registry, 12, Box::new(RandomSampler::new(4)))
            .with_pruner(Some(MedianPruner::new(2)))
            .run(&space, &dataset())
            .unwrap();
        assert_eq!(outcome.log.len(), 12);
        assert_eq!(outcome.best.status, TrialStatus::Complete);
        for t in outcome.log.trials().iter().filter(|t| t.status == TrialStatus::Pruned) {
            assert!(t.fold_scores.len() < 3);
        }
    }

    #[test]
    fn test_empty_space_is_rejected() {
        let registry = ModelRegistry::with_families([Family::Linear]).unwrap();
        let space = SearchSpace::from_families(Vec::new()).unwrap();
        let err = engine(&registry, 2, Box::new(RandomSampler::new(0)))
            .run(&space, &dataset())
            .unwrap_err();
        assert!(matches!(err, MlError::UnknownFamily(_)));
    }
}
