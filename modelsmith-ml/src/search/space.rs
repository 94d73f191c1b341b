//! Bounded, family-specific hyperparameter distributions.

use crate::data::TaskType;
use crate::error::{MlError, Result};
use crate::registry::{Family, ModelRegistry};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use crate::params::{HyperParams, ParamValue};

/// Distribution a single hyperparameter is drawn from. All are bounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamDistribution {
    Uniform { low: f64, high: f64 },
    /// Uniform in log space. `low` must be positive.
    LogUniform { low: f64, high: f64 },
    /// Inclusive integer range.
    IntRange { low: i64, high: i64 },
    Choice { values: Vec<String> },
}

impl ParamDistribution {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParamValue {
        match self {
            ParamDistribution::Uniform { low, high } => {
                ParamValue::Float(rng.gen_range(*low..=*high))
            }
            ParamDistribution::LogUniform { low, high } => {
                ParamValue::Float(rng.gen_range(low.ln()..=high.ln()).exp().clamp(*low, *high))
            }
            ParamDistribution::IntRange { low, high } => {
                ParamValue::Int(rng.gen_range(*low..=*high))
            }
            ParamDistribution::Choice { values } => {
                ParamValue::Text(values[rng.gen_range(0..values.len())].clone())
            }
        }
    }

    pub fn contains(&self, value: &ParamValue) -> bool {
        match (self, value) {
            (ParamDistribution::Uniform { low, high }, ParamValue::Float(v))
            | (ParamDistribution::LogUniform { low, high }, ParamValue::Float(v)) => {
                *v >= *low && *v <= *high
            }
            (ParamDistribution::IntRange { low, high }, ParamValue::Int(v)) => {
                *v >= *low && *v <= *high
            }
            (ParamDistribution::Choice { values }, ParamValue::Text(v)) => values.contains(v),
            _ => false,
        }
    }

    /// Bounds in the space samplers model numerics in (log for `LogUniform`).
    /// `None` for categorical parameters.
    pub fn internal_bounds(&self) -> Option<(f64, f64)> {
        match self {
            ParamDistribution::Uniform { low, high } => Some((*low, *high)),
            ParamDistribution::LogUniform { low, high } => Some((low.ln(), high.ln())),
            ParamDistribution::IntRange { low, high } => Some((*low as f64, *high as f64)),
            ParamDistribution::Choice { .. } => None,
        }
    }

    /// Map a value into the internal space.
    pub fn to_internal(&self, value: &ParamValue) -> Option<f64> {
        let v = value.as_f64()?;
        match self {
            ParamDistribution::LogUniform { .. } if v > 0.0 => Some(v.ln()),
            ParamDistribution::LogUniform { .. } => None,
            ParamDistribution::Choice { .. } => None,
            _ => Some(v),
        }
    }

    /// Map an internal coordinate back to a value inside the bounds.
    pub fn from_internal(&self, x: f64) -> Option<ParamValue> {
        match self {
            ParamDistribution::Uniform { low, high } => {
                Some(ParamValue::Float(x.clamp(*low, *high)))
            }
            ParamDistribution::LogUniform { low, high } => {
                Some(ParamValue::Float(x.exp().clamp(*low, *high)))
            }
            ParamDistribution::IntRange { low, high } => {
                Some(ParamValue::Int((x.round() as i64).clamp(*low, *high)))
            }
            ParamDistribution::Choice { .. } => None,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        let ok = match self {
            ParamDistribution::Uniform { low, high } => {
                low.is_finite() && high.is_finite() && low <= high
            }
            ParamDistribution::LogUniform { low, high } => {
                *low > 0.0 && high.is_finite() && low <= high
            }
            ParamDistribution::IntRange { low, high } => low <= high,
            ParamDistribution::Choice { values } => !values.is_empty(),
        };
        if ok {
            Ok(())
        } else {
            Err(MlError::config(format!("invalid distribution for {name}: {self:?}")))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub distribution: ParamDistribution,
}

impl ParamSpec {
    fn new(name: &str, distribution: ParamDistribution) -> Self {
        Self {
            name: name.to_string(),
            distribution,
        }
    }
}

fn int(low: i64, high: i64) -> ParamDistribution {
    ParamDistribution::IntRange { low, high }
}

fn uniform(low: f64, high: f64) -> ParamDistribution {
    ParamDistribution::Uniform { low, high }
}

fn log_uniform(low: f64, high: f64) -> ParamDistribution {
    ParamDistribution::LogUniform { low, high }
}

/// The hyperparameter schema searched for one family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilySpace {
    pub family: Family,
    pub params: Vec<ParamSpec>,
}

impl FamilySpace {
    /// Built-in ranges for `family` on `task`.
    pub fn for_family(family: Family, task: TaskType) -> Self {
        let params = match family {
            Family::RandomForest => vec![
                ParamSpec::new("n_estimators", int(10, 300)),
                ParamSpec::new("max_depth", int(2, 20)),
                ParamSpec::new("max_features", uniform(0.1, 1.0)),
                ParamSpec::new("min_samples_leaf", int(1, 10)),
            ],
            Family::GbtDepthwise => vec![
                ParamSpec::new("n_estimators", int(20, 300)),
                ParamSpec::new("learning_rate", log_uniform(0.01, 0.3)),
                ParamSpec::new("max_depth", int(2, 8)),
                ParamSpec::new("min_child_weight", log_uniform(0.01, 10.0)),
                ParamSpec::new("subsample", uniform(0.5, 1.0)),
                ParamSpec::new("colsample_bytree", uniform(0.5, 1.0)),
                ParamSpec::new("reg_lambda", log_uniform(1e-3, 10.0)),
            ],
            Family::GbtLeafwise => vec![
                ParamSpec::new("n_estimators", int(20, 300)),
                ParamSpec::new("learning_rate", log_uniform(0.01, 0.3)),
                ParamSpec::new("num_leaves", int(4, 64)),
                ParamSpec::new("max_depth", int(3, 12)),
                ParamSpec::new("min_child_samples", int(5, 40)),
                ParamSpec::new("subsample", uniform(0.5, 1.0)),
                ParamSpec::new("colsample_bytree", uniform(0.5, 1.0)),
                ParamSpec::new("reg_lambda", log_uniform(1e-3, 10.0)),
            ],
            Family::SupportVector => {
                let mut params = vec![
                    ParamSpec::new("kernel", ParamDistribution::Choice {
                        values: vec!["rbf".to_string(), "linear".to_string()],
                    }),
                    ParamSpec::new("c", log_uniform(0.01, 100.0)),
                    ParamSpec::new("gamma", log_uniform(1e-3, 1.0)),
                    ParamSpec::new("n_components", int(50, 300)),
                    ParamSpec::new("epochs", int(5, 40)),
                    ParamSpec::new("subsample", uniform(0.5, 1.0)),
                ];
                if task == TaskType::Regression {
                    params.push(ParamSpec::new("epsilon", uniform(0.0, 0.5)));
                }
                params
            }
            Family::Linear => vec![
                ParamSpec::new("alpha", log_uniform(1e-4, 10.0)),
                ParamSpec::new("l1_ratio", uniform(0.0, 1.0)),
                ParamSpec::new("max_iter", int(100, 1000)),
            ],
        };
        Self { family, params }
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Whether every value in `params` is declared here and within bounds.
    pub fn contains(&self, params: &HyperParams) -> bool {
        params.iter().all(|(name, value)| {
            self.get(name)
                .is_some_and(|spec| spec.distribution.contains(value))
        })
    }
}

/// Joint space of available families and their hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    families: Vec<FamilySpace>,
    /// Relative sampling weight per family, aligned with `families`.
    weights: Vec<f64>,
}

impl SearchSpace {
    /// One built-in family space per registry family, uniformly weighted.
    pub fn for_registry(registry: &ModelRegistry, task: TaskType) -> Self {
        let families: Vec<FamilySpace> = registry
            .families()
            .iter()
            .map(|&f| FamilySpace::for_family(f, task))
            .collect();
        let weights = vec![1.0; families.len()];
        Self { families, weights }
    }

    /// Build from explicit family spaces.
    pub fn from_families(families: Vec<FamilySpace>) -> Result<Self> {
        for space in &families {
            for spec in &space.params {
                spec.distribution.validate(&spec.name)?;
            }
        }
        let weights = vec![1.0; families.len()];
        Ok(Self { families, weights })
    }

    /// Apply a sampling prior over families.
    ///
    /// Families missing from `prior` keep weight 1. Entries for families not
    /// in the space are ignored. At least one weight must stay positive.
    pub fn with_prior(mut self, prior: &BTreeMap<Family, f64>) -> Result<Self> {
        for (family, weight) in prior {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(MlError::config(format!(
                    "prior weight for {family} must be finite and >= 0, got {weight}"
                )));
            }
        }
        for (space, weight) in self.families.iter().zip(self.weights.iter_mut()) {
            *weight = prior.get(&space.family).copied().unwrap_or(1.0);
        }
        if !self.families.is_empty() && self.weights.iter().all(|w| *w == 0.0) {
            return Err(MlError::config("family prior gives zero weight to every family"));
        }
        Ok(self)
    }

    pub fn families(&self) -> &[FamilySpace] {
        &self.families
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn family(&self, family: Family) -> Option<&FamilySpace> {
        self.families.iter().find(|s| s.family == family)
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}
