//! Model registry: family tags, runtime availability and construction.
//!
//! The boosted families are optional backends gated by Cargo features. The
//! set of compiled families is probed once per process and never changes;
//! every other component consults it instead of checking features itself.

use crate::algorithms::Model;
use crate::algorithms::forest::{ForestParams, RandomForest};
use crate::algorithms::linear::{LinearModel, LinearParams};
use crate::algorithms::svm::{SupportVector, SvmParams};
use crate::data::TaskType;
use crate::error::{MlError, Result};
use crate::params::HyperParams;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Closed set of model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    RandomForest,
    GbtDepthwise,
    GbtLeafwise,
    SupportVector,
    Linear,
}

impl Family {
    pub const ALL: [Family; 5] = [
        Family::RandomForest,
        Family::GbtDepthwise,
        Family::GbtLeafwise,
        Family::SupportVector,
        Family::Linear,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Family::RandomForest => "random_forest",
            Family::GbtDepthwise => "gbt_depthwise",
            Family::GbtLeafwise => "gbt_leafwise",
            Family::SupportVector => "support_vector",
            Family::Linear => "linear",
        }
    }

    /// Whether the backing implementation was compiled in.
    fn compiled(self) -> bool {
        match self {
            Family::GbtDepthwise => cfg!(feature = "gbt-depthwise"),
            Family::GbtLeafwise => cfg!(feature = "gbt-leafwise"),
            Family::RandomForest | Family::SupportVector | Family::Linear => true,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Family {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self> {
        Family::ALL
            .into_iter()
            .find(|f| f.tag() == s)
            .ok_or_else(|| MlError::UnknownFamily(s.to_string()))
    }
}

static AVAILABLE: LazyLock<BTreeSet<Family>> = LazyLock::new(|| {
    let families: BTreeSet<Family> = Family::ALL.into_iter().filter(|f| f.compiled()).collect();
    tracing::debug!(
        families = ?families.iter().map(|f| f.tag()).collect::<Vec<_>>(),
        "probed model backends"
    );
    families
});

/// Families whose backends are present in this process.
pub fn available_families() -> &'static BTreeSet<Family> {
    &AVAILABLE
}

/// Builds candidate models from a family and a hyperparameter map.
///
/// The registry is the production implementation; tests substitute their own
/// factories to simulate slow or failing families.
pub trait ModelFactory: Send + Sync {
    fn construct(
        &self,
        family: Family,
        params: &HyperParams,
        task: TaskType,
        seed: u64,
    ) -> Result<Box<dyn Model>>;
}

/// A view of the available families, possibly narrowed by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRegistry {
    families: BTreeSet<Family>,
}

impl ModelRegistry {
    /// Every family available in this process.
    pub fn detect() -> Self {
        Self {
            families: available_families().clone(),
        }
    }

    /// Restrict to `families`. Each must be available; an empty request
    /// yields an empty registry.
    pub fn with_families(families: impl IntoIterator<Item = Family>) -> Result<Self> {
        let mut selected = BTreeSet::new();
        for family in families {
            if !available_families().contains(&family) {
                return Err(MlError::UnknownFamily(family.tag().to_string()));
            }
            selected.insert(family);
        }
        Ok(Self { families: selected })
    }

    pub fn families(&self) -> &BTreeSet<Family> {
        &self.families
    }

    pub fn contains(&self, family: Family) -> bool {
        self.families.contains(&family)
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Construct an unfitted model with default hyperparameters.
    pub fn construct_default(
        &self,
        family: Family,
        task: TaskType,
        seed: u64,
    ) -> Result<Box<dyn Model>> {
        self.construct(family, &HyperParams::new(), task, seed)
    }
}

impl ModelFactory for ModelRegistry {
    fn construct(
        &self,
        family: Family,
        params: &HyperParams,
        task: TaskType,
        seed: u64,
    ) -> Result<Box<dyn Model>> {
        if !self.contains(family) {
            return Err(MlError::UnknownFamily(family.tag().to_string()));
        }
        match family {
            Family::RandomForest => Ok(Box::new(RandomForest::new(
                ForestParams::from_params(params)?,
                task,
                seed,
            ))),
            Family::SupportVector => Ok(Box::new(SupportVector::new(
                SvmParams::from_params(params)?,
                task,
                seed,
            ))),
            Family::Linear => Ok(Box::new(LinearModel::new(
                LinearParams::from_params(params)?,
                task,
            ))),
            #[cfg(feature = "gbt-depthwise")]
            Family::GbtDepthwise => {
                use crate::algorithms::boosting::{BoostingParams, GradientBoosting, GrowthPolicy};
                Ok(Box::new(GradientBoosting::new(
                    BoostingParams::from_params(GrowthPolicy::DepthWise, params)?,
                    task,
                    seed,
                )))
            }
            #[cfg(feature = "gbt-leafwise")]
            Family::GbtLeafwise => {
                use crate::algorithms::boosting::{BoostingParams, GradientBoosting, GrowthPolicy};
                Ok(Box::new(GradientBoosting::new(
                    BoostingParams::from_params(GrowthPolicy::LeafWise, params)?,
                    task,
                    seed,
                )))
            }
            #[allow(unreachable_patterns)]
            other => Err(MlError::UnknownFamily(other.tag().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::hyper_params;
    use ndarray::{Array1, Array2};

    #[test]
    fn test_tags_round_trip() {
        for family in Family::ALL {
            assert_eq!(family.tag().parse::<Family>().unwrap(), family);
        }
        assert!(matches!("xgboost".parse::<Family>(), Err(MlError::UnknownFamily(_))));
        assert_eq!(serde_json::to_string(&Family::GbtLeafwise).unwrap(), "\"gbt_leafwise\"");
    }

    #[test]
    fn test_available_is_stable() {
        let first = available_families();
        let second = available_families();
        assert!(std::ptr::eq(first, second));
        assert!(first.contains(&Family::RandomForest));
        assert!(first.contains(&Family::Linear));
        assert_eq!(first.contains(&Family::GbtDepthwise), cfg!(feature = "gbt-depthwise"));
    }

    #[test]
    fn test_defaults_satisfy_contract() {
        let registry = ModelRegistry::detect();
        let x = Array2::from_shape_fn((30, 2), |(i, j)| (i * (j + 1)) as f64);
        let y = Array1::from_iter((0..30).map(|i| (i % 2) as f64));
        for task in [TaskType::Regression, TaskType::Classification] {
            for &family in registry.families() {
                let mut model = registry.construct_default(family, task, 1).unwrap();
                assert!(!model.is_fitted(), "{family} starts fitted");
                assert!(matches!(model.predict(&x), Err(MlError::NotFitted(_))));
                model.fit(&x, &y).unwrap();
                assert!(model.is_fitted());
                assert_eq!(model.predict(&x).unwrap().len(), 30);
                assert!(!model.clone_unfitted().is_fitted());
            }
        }
    }

    #[test]
    fn test_restricted_registry() {
        let registry = ModelRegistry::with_families([Family::Linear]).unwrap();
        let err = registry
            .construct_default(Family::RandomForest, TaskType::Regression, 0)
            .err()
            .unwrap();
        assert!(matches!(err, MlError::UnknownFamily(_)));
        assert!(ModelRegistry::with_families(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_key_is_invalid_configuration() {
        let registry = ModelRegistry::detect();
        let params = hyper_params([("num_leaves", 8i64)]);
        let err = registry
            .construct(Family::RandomForest, &params, TaskType::Regression, 0)
            .err()
            .unwrap();
        assert!(matches!(err, MlError::InvalidConfiguration { .. }));
    }
}
