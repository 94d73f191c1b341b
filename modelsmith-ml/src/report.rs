//! JSON record of one AutoML run.

use crate::automl::{AutoMlOptions, BestConfig};
use crate::data::{Dataset, TaskType};
use crate::error::Result;
use crate::metrics::{Metric, Metrics};
use crate::registry::{Family, ModelRegistry};
use crate::search::{SearchOutcome, TrialLog};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Search metadata and the full trial log. Holds no trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub task: TaskType,
    pub metric: Metric,
    pub n_samples: usize,
    pub n_features: usize,
    /// SHA-256 over the dataset shape and values.
    pub dataset_fingerprint: String,
    pub seed: u64,
    pub families: Vec<Family>,
    pub trials: TrialLog,
    pub best: BestConfig,
    pub penalized: usize,
    pub pruned: usize,
    pub timed_out: bool,
    pub fallback: bool,
    /// Holdout metrics of the winner, when a holdout was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Metrics>,
}

impl SearchReport {
    pub(crate) fn new(
        started_at: DateTime<Utc>,
        options: &AutoMlOptions,
        dataset: &Dataset,
        registry: &ModelRegistry,
        best: &BestConfig,
        outcome: Option<&SearchOutcome>,
        validation: Option<Metrics>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            task: options.task,
            metric: options.optimization_metric.resolve(options.task),
            n_samples: dataset.n_samples(),
            n_features: dataset.n_features(),
            dataset_fingerprint: dataset.fingerprint(),
            seed: options.seed,
            families: registry.families().iter().copied().collect(),
            trials: outcome.map(|o| o.log.clone()).unwrap_or_default(),
            best: best.clone(),
            penalized: outcome.map_or(0, |o| o.penalized()),
            pruned: outcome.map_or(0, |o| o.pruned()),
            timed_out: outcome.is_some_and(|o| o.timed_out),
            fallback: best.fallback,
            validation,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        modelsmith_core::atomic_write_json(path, self)?;
        Ok(())
    }

    /// Load a saved report. Missing files are an I/O error.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(modelsmith_core::load_json(path)?)
    }
}
