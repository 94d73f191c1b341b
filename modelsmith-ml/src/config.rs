//! Configuration types for the modelsmith-ml crate.
//!
//! Loaded through [`modelsmith_core::load_layered`], so every field can come
//! from defaults, `config.toml` files or `MODELSMITH_*` environment variables
//! (e.g. `MODELSMITH_SEARCH__N_TRIALS=80`).

use crate::ensemble::{FailurePolicy, VotingMode};
use crate::metrics::Metric;
use crate::registry::Family;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level AutoML configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoMlConfig {
    /// Trial search settings.
    #[serde(default)]
    pub search: SearchConfig,
    /// Cross-validation and holdout settings.
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    /// Ensemble combiner settings.
    #[serde(default)]
    pub ensemble: EnsembleConfig,
}

impl AutoMlConfig {
    /// Load from the layered sources rooted at `workspace`.
    pub fn load(workspace: Option<&Path>) -> Result<Self, Box<figment::Error>> {
        modelsmith_core::load_layered(workspace, None)
    }
}

/// Which sampler proposes trials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    Random,
    #[default]
    Tpe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_n_trials")]
    pub n_trials: usize,
    /// Wall-clock budget in seconds. No limit when unset.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub sampler: SamplerKind,
    #[serde(default)]
    pub tpe: TpeSettings,
    #[serde(default)]
    pub pruner: PrunerSettings,
    /// Families to search. Empty means every available family.
    #[serde(default)]
    pub model_types: Vec<Family>,
    /// Relative family sampling weights. Unlisted families weigh 1.
    #[serde(default)]
    pub family_prior: BTreeMap<Family, f64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            n_trials: default_n_trials(),
            timeout_secs: None,
            seed: default_seed(),
            sampler: SamplerKind::default(),
            tpe: TpeSettings::default(),
            pruner: PrunerSettings::default(),
            model_types: Vec::new(),
            family_prior: BTreeMap::new(),
        }
    }
}

/// Tree-structured Parzen estimator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpeSettings {
    /// Trials sampled at random before the model kicks in.
    #[serde(default = "default_n_startup_trials")]
    pub n_startup_trials: usize,
    /// Fraction of scored trials treated as good.
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    /// Candidates drawn from the good density per parameter.
    #[serde(default = "default_n_ei_candidates")]
    pub n_ei_candidates: usize,
    /// Weight of the uniform prior component in each density.
    #[serde(default = "default_prior_weight")]
    pub prior_weight: f64,
}

impl Default for TpeSettings {
    fn default() -> Self {
        Self {
            n_startup_trials: default_n_startup_trials(),
            gamma: default_gamma(),
            n_ei_candidates: default_n_ei_candidates(),
            prior_weight: default_prior_weight(),
        }
    }
}

/// Median pruning of unpromising trials between folds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrunerSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Complete trials required before pruning starts.
    #[serde(default = "default_n_warmup_trials")]
    pub n_warmup_trials: usize,
}

impl Default for PrunerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            n_warmup_trials: default_n_warmup_trials(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,
    #[serde(default)]
    pub metric: Metric,
    /// Share of rows held out for the validation metrics `fit` returns.
    #[serde(default = "default_validation_fraction")]
    pub validation_fraction: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            cv_folds: default_cv_folds(),
            metric: Metric::default(),
            validation_fraction: default_validation_fraction(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    #[serde(default = "default_stacking_folds")]
    pub stacking_folds: usize,
    #[serde(default)]
    pub voting_mode: VotingMode,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            stacking_folds: default_stacking_folds(),
            voting_mode: VotingMode::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

fn default_n_trials() -> usize {
    50
}
fn default_seed() -> u64 {
    42
}
fn default_n_startup_trials() -> usize {
    10
}
fn default_gamma() -> f64 {
    0.25
}
fn default_n_ei_candidates() -> usize {
    24
}
fn default_prior_weight() -> f64 {
    1.0
}
fn default_n_warmup_trials() -> usize {
    5
}
fn default_cv_folds() -> usize {
    5
}
fn default_validation_fraction() -> f64 {
    0.2
}
fn default_stacking_folds() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = AutoMlConfig::default();
        assert_eq!(config.search.n_trials, 50);
        assert_eq!(config.search.sampler, SamplerKind::Tpe);
        assert!(!config.search.pruner.enabled);
        assert_eq!(config.evaluation.cv_folds, 5);
        assert_eq!(config.evaluation.metric, Metric::Auto);
        assert_eq!(config.ensemble.failure_policy, FailurePolicy::Exclude);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_src = r#"
            [search]
            n_trials = 12
            model_types = ["linear", "random_forest"]

            [search.family_prior]
            linear = 2.0

            [evaluation]
            metric = "r2"
        "#;
        let config: AutoMlConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(config.search.n_trials, 12);
        assert_eq!(config.search.seed, 42);
        assert_eq!(config.search.model_types, vec![Family::Linear, Family::RandomForest]);
        assert_eq!(config.search.family_prior.get(&Family::Linear), Some(&2.0));
        assert_eq!(config.evaluation.metric, Metric::R2);
        assert_eq!(config.evaluation.cv_folds, 5);
        assert_eq!(config.search.tpe, TpeSettings::default());
    }

    #[test]
    fn test_load_from_workspace_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_dir = dir.path().join(".modelsmith");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            "[search]\nn_trials = 7\nsampler = \"random\"\n\n[ensemble]\nvoting_mode = \"soft\"\n",
        )
        .unwrap();
        let config = AutoMlConfig::load(Some(dir.path())).unwrap();
        assert_eq!(config.search.n_trials, 7);
        assert_eq!(config.search.sampler, SamplerKind::Random);
        assert_eq!(config.ensemble.voting_mode, VotingMode::Soft);
    }
}
