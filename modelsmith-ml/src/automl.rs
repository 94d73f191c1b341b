//! The AutoML entry point.
//!
//! [`AutoMl`] searches the available families and their hyperparameters,
//! reports holdout metrics for the winner and keeps a final model fit on the
//! whole dataset.
//!
//! # Example
//!
//! ```no_run
//! use modelsmith_ml::{AutoMl, AutoMlOptions, TaskType};
//! # fn demo(x: ndarray::Array2<f64>, y: ndarray::Array1<f64>) -> modelsmith_ml::Result<()> {
//! let mut automl = AutoMl::new(AutoMlOptions::new(TaskType::Regression).with_n_trials(20))?;
//! let metrics = automl.fit(&x, &y)?;
//! println!("holdout rmse = {:?}", metrics.get("rmse"));
//! let best = automl.best_params()?;
//! println!("{} {:?}", best.family, best.params);
//! # Ok(())
//! # }
//! ```

use crate::algorithms::{Model, training_metrics};
use crate::config::{AutoMlConfig, PrunerSettings, SamplerKind, TpeSettings};
use crate::data::{Dataset, TaskType, holdout_split};
use crate::error::{MlError, Result};
use crate::metrics::{Metric, Metrics};
use crate::params::HyperParams;
use crate::registry::{Family, ModelFactory, ModelRegistry};
use crate::report::SearchReport;
use crate::search::SearchOutcome;
use crate::seed::derive_seed;
use chrono::Utc;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const SAMPLER_STREAM: u64 = 0x5A3;
const HOLDOUT_STREAM: u64 = 0x401D;
const FINAL_STREAM: u64 = 0xF17A;

/// Options for one AutoML run.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoMlOptions {
    pub task: TaskType,
    /// Families to search. `None` means every available family.
    pub model_types: Option<BTreeSet<Family>>,
    pub optimization_metric: Metric,
    pub n_trials: usize,
    pub cv_folds: usize,
    pub timeout: Option<Duration>,
    pub seed: u64,
    pub sampler: SamplerKind,
    pub tpe: TpeSettings,
    pub pruner: PrunerSettings,
    /// Share of rows held out to compute the metrics `fit` returns. Zero
    /// reports in-sample metrics of the final model instead.
    pub validation_fraction: f64,
    pub family_prior: BTreeMap<Family, f64>,
    /// Skip the search and fit the default family, as when the `search`
    /// feature is compiled out.
    pub disable_search: bool,
}

impl AutoMlOptions {
    pub fn new(task: TaskType) -> Self {
        Self::from_parts(task, &AutoMlConfig::default(), None)
    }

    /// Options from a loaded configuration. An empty `model_types` list
    /// means every available family.
    pub fn from_config(task: TaskType, config: &AutoMlConfig) -> Result<Self> {
        let timeout = match config.search.timeout_secs {
            Some(secs) => Some(
                Duration::try_from_secs_f64(secs)
                    .map_err(|e| MlError::config(format!("invalid timeout_secs {secs}: {e}")))?,
            ),
            None => None,
        };
        Ok(Self::from_parts(task, config, timeout))
    }

    fn from_parts(task: TaskType, config: &AutoMlConfig, timeout: Option<Duration>) -> Self {
        let model_types = (!config.search.model_types.is_empty())
            .then(|| config.search.model_types.iter().copied().collect());
        Self {
            task,
            model_types,
            optimization_metric: config.evaluation.metric,
            n_trials: config.search.n_trials,
            cv_folds: config.evaluation.cv_folds,
            timeout,
            seed: config.search.seed,
            sampler: config.search.sampler,
            tpe: config.search.tpe.clone(),
            pruner: config.search.pruner.clone(),
            validation_fraction: config.evaluation.validation_fraction,
            family_prior: config.search.family_prior.clone(),
            disable_search: false,
        }
    }

    pub fn with_model_types(mut self, families: impl IntoIterator<Item = Family>) -> Self {
        self.model_types = Some(families.into_iter().collect());
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.optimization_metric = metric;
        self
    }

    pub fn with_n_trials(mut self, n_trials: usize) -> Self {
        self.n_trials = n_trials;
        self
    }

    pub fn with_cv_folds(mut self, cv_folds: usize) -> Self {
        self.cv_folds = cv_folds;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerKind) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_tpe(mut self, tpe: TpeSettings) -> Self {
        self.tpe = tpe;
        self
    }

    pub fn with_pruner(mut self, n_warmup_trials: usize) -> Self {
        self.pruner = PrunerSettings {
            enabled: true,
            n_warmup_trials,
        };
        self
    }

    pub fn with_validation_fraction(mut self, fraction: f64) -> Self {
        self.validation_fraction = fraction;
        self
    }

    pub fn with_family_prior(mut self, prior: BTreeMap<Family, f64>) -> Self {
        self.family_prior = prior;
        self
    }

    pub fn without_search(mut self) -> Self {
        self.disable_search = true;
        self
    }

    /// Reject options no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.n_trials == 0 {
            return Err(MlError::config("n_trials must be >= 1"));
        }
        if self.cv_folds < 2 {
            return Err(MlError::config(format!("cv_folds must be >= 2, got {}", self.cv_folds)));
        }
        if !self.optimization_metric.supports(self.task) {
            return Err(MlError::config(format!(
                "metric {} does not apply to {}",
                self.optimization_metric, self.task
            )));
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(MlError::config(format!(
                "validation_fraction must be in [0, 1), got {}",
                self.validation_fraction
            )));
        }
        if self.model_types.as_ref().is_some_and(|m| m.is_empty()) {
            return Err(MlError::config("model_types is empty"));
        }
        let tpe = &self.tpe;
        if !(tpe.gamma > 0.0 && tpe.gamma <= 1.0) {
            return Err(MlError::config(format!("tpe.gamma must be in (0, 1], got {}", tpe.gamma)));
        }
        if tpe.n_ei_candidates == 0 {
            return Err(MlError::config("tpe.n_ei_candidates must be >= 1"));
        }
        if !(tpe.prior_weight.is_finite() && tpe.prior_weight > 0.0) {
            return Err(MlError::config(format!(
                "tpe.prior_weight must be positive, got {}",
                tpe.prior_weight
            )));
        }
        Ok(())
    }
}

/// The winning configuration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestConfig {
    pub family: Family,
    pub params: HyperParams,
    /// Best normalized cross-validation score. `None` when the search was
    /// skipped.
    pub score: Option<f64>,
    /// Metric the score is measured in.
    pub metric: Metric,
    /// Whether the default family was fit without a search.
    pub fallback: bool,
}

/// Adaptive model selection over the available families.
#[derive(Debug)]
pub struct AutoMl {
    options: AutoMlOptions,
    registry: ModelRegistry,
    model: Option<FinalModel>,
    best: Option<BestConfig>,
    outcome: Option<SearchOutcome>,
    report: Option<SearchReport>,
}

struct FinalModel(Box<dyn Model>);

impl std::fmt::Debug for FinalModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FinalModel").field(&self.0.name()).finish()
    }
}

impl AutoMl {
    pub fn new(options: AutoMlOptions) -> Result<Self> {
        options.validate()?;
        let registry = match &options.model_types {
            Some(families) => ModelRegistry::with_families(families.iter().copied())?,
            None => ModelRegistry::detect(),
        };
        if registry.is_empty() {
            return Err(MlError::UnknownFamily(
                "no model family is available".to_string(),
            ));
        }
        Ok(Self {
            options,
            registry,
            model: None,
            best: None,
            outcome: None,
            report: None,
        })
    }

    pub fn options(&self) -> &AutoMlOptions {
        &self.options
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Search, validate the winner on a holdout split and fit the final model
    /// on all rows. Returns holdout metrics.
    ///
    /// Results of an earlier `fit` are discarded first, so a failed call
    /// leaves the orchestrator unfitted.
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Metrics> {
        self.reset();
        let started_at = Utc::now();
        let dataset = Dataset::new(x.clone(), y.clone(), self.options.task)?;
        let task = self.options.task;
        let seed = self.options.seed;

        let (best, outcome) = self.select(&dataset)?;

        let validation = self.validate_winner(&best, &dataset)?;

        let mut model = self.registry.construct(
            best.family,
            &best.params,
            task,
            derive_seed(seed, FINAL_STREAM),
        )?;
        let training = model.fit(dataset.x(), dataset.y())?;
        info!(
            family = %best.family,
            fallback = best.fallback,
            samples = dataset.n_samples(),
            "final model fit"
        );

        let report = SearchReport::new(
            started_at,
            &self.options,
            &dataset,
            &self.registry,
            &best,
            outcome.as_ref(),
            validation.clone(),
        );

        self.model = Some(FinalModel(model));
        self.best = Some(best);
        self.outcome = outcome;
        self.report = Some(report);
        Ok(validation.unwrap_or(training))
    }

    fn reset(&mut self) {
        self.model = None;
        self.best = None;
        self.outcome = None;
        self.report = None;
    }

    /// Pick the winning family and params, by search when it is available.
    fn select(&self, dataset: &Dataset) -> Result<(BestConfig, Option<SearchOutcome>)> {
        let metric = self.options.optimization_metric.resolve(self.options.task);

        #[cfg(feature = "search")]
        {
            if !self.options.disable_search {
                let outcome = self.run_search(dataset)?;
                let best = BestConfig {
                    family: outcome.best.family,
                    params: outcome.best.params.clone(),
                    score: Some(outcome.best.score),
                    metric,
                    fallback: false,
                };
                return Ok((best, Some(outcome)));
            }
        }

        let family = if self.registry.contains(Family::RandomForest) {
            Family::RandomForest
        } else {
            self.registry
                .families()
                .iter()
                .next()
                .copied()
                .ok_or_else(|| {
                    MlError::UnknownFamily("no model family is available".to_string())
                })?
        };
        warn!(
            family = %family,
            samples = dataset.n_samples(),
            "search backend unavailable, fitting default family"
        );
        Ok((
            BestConfig {
                family,
                params: HyperParams::new(),
                score: None,
                metric,
                fallback: true,
            },
            None,
        ))
    }

    #[cfg(feature = "search")]
    fn run_search(&self, dataset: &Dataset) -> Result<SearchOutcome> {
        use crate::evaluation::CandidateEvaluator;
        use crate::search::{
            MedianPruner, RandomSampler, Sampler, SearchEngine, SearchSpace, TpeSampler,
        };

        let opts = &self.options;
        let evaluator = CandidateEvaluator::new(
            self.registry.clone(),
            opts.task,
            opts.optimization_metric,
            opts.cv_folds,
            opts.seed,
        )?;
        let space = SearchSpace::for_registry(&self.registry, opts.task)
            .with_prior(&opts.family_prior)?;
        let sampler_seed = derive_seed(opts.seed, SAMPLER_STREAM);
        let sampler: Box<dyn Sampler> = match opts.sampler {
            SamplerKind::Random => Box::new(RandomSampler::new(sampler_seed)),
            SamplerKind::Tpe => Box::new(TpeSampler::new(sampler_seed, opts.tpe.clone())),
        };
        let pruner = opts
            .pruner
            .enabled
            .then(|| MedianPruner::new(opts.pruner.n_warmup_trials));

        SearchEngine::new(evaluator, sampler, opts.n_trials)
            .with_timeout(opts.timeout)
            .with_pruner(pruner)
            .run(&space, dataset)
    }

    /// Holdout metrics of the winner trained on the remaining rows.
    fn validate_winner(&self, best: &BestConfig, dataset: &Dataset) -> Result<Option<Metrics>> {
        let task = self.options.task;
        let seed = self.options.seed;
        let Some((train, holdout)) =
            holdout_split(task, dataset.y(), self.options.validation_fraction, seed)
        else {
            return Ok(None);
        };
        let (x_train, y_train) = dataset.subset(&train);
        let (x_hold, y_hold) = dataset.subset(&holdout);
        let mut model = self.registry.construct(
            best.family,
            &best.params,
            task,
            derive_seed(seed, HOLDOUT_STREAM),
        )?;
        model.fit(&x_train, &y_train)?;
        let metrics = training_metrics(model.as_ref(), task, &x_hold, &y_hold)?;
        info!(
            family = %best.family,
            holdout = holdout.len(),
            metrics = ?metrics,
            "holdout evaluation"
        );
        Ok(Some(metrics))
    }

    fn fitted_model(&self) -> Result<&dyn Model> {
        self.model
            .as_ref()
            .map(|m| m.0.as_ref())
            .ok_or_else(|| MlError::not_fitted("AutoMl has not been fit"))
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.fitted_model()?.predict(x)
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fitted_model()?.predict_proba(x)
    }

    /// The final model, fit on all rows.
    pub fn model(&self) -> Result<&dyn Model> {
        self.fitted_model()
    }

    pub fn best_params(&self) -> Result<&BestConfig> {
        self.best
            .as_ref()
            .ok_or_else(|| MlError::not_fitted("AutoMl has not been fit"))
    }

    /// Trial log and counters of the last search. `None` before `fit` or when
    /// the search was skipped.
    pub fn search_outcome(&self) -> Option<&SearchOutcome> {
        self.outcome.as_ref()
    }

    pub fn feature_importances(&self) -> Option<Array1<f64>> {
        self.fitted_model().ok()?.feature_importances()
    }

    pub fn report(&self) -> Option<&SearchReport> {
        self.report.as_ref()
    }

    /// Write the report of the last run as JSON.
    pub fn save_report(&self, path: &Path) -> Result<()> {
        let report = self
            .report
            .as_ref()
            .ok_or_else(|| MlError::not_fitted("AutoMl has not been fit"))?;
        report.save(path)
    }
}
