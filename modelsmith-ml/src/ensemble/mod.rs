//! Combining several models into one predictor.
//!
//! [`VotingEnsemble`] averages or votes over members fit on the full data.
//! [`StackingEnsemble`] trains a meta model on out-of-fold base predictions.

pub mod stacking;
pub mod voting;

pub use stacking::{StackFeatures, StackingEnsemble};
pub use voting::VotingEnsemble;

use crate::algorithms::Model;
use crate::data::ClassIndex;
use crate::error::{MlError, Result};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// How classification members are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingMode {
    /// Majority vote over predicted labels.
    #[default]
    Hard,
    /// Argmax of averaged class probabilities.
    Soft,
}

/// What a voting ensemble does when a member fails to fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the whole fit with [`MlError::BaseModelFit`].
    FailFast,
    /// Drop the member and keep going.
    #[default]
    Exclude,
}

/// Probabilities of `model` re-ordered onto the columns of `classes`.
/// Classes the model never saw get probability zero.
pub(crate) fn aligned_proba(
    model: &dyn Model,
    x: &Array2<f64>,
    classes: &ClassIndex,
) -> Result<Array2<f64>> {
    let proba = model.predict_proba(x)?;
    let own = model
        .classes()
        .ok_or_else(|| MlError::model(format!("{} has no class labels", model.name())))?;
    if own.labels() == classes.labels() {
        return Ok(proba);
    }
    let mut out = Array2::zeros((x.nrows(), classes.len()));
    for (j, column) in proba.axis_iter(Axis(1)).enumerate() {
        if let Some(target) = classes.index_of(own.label(j)) {
            out.column_mut(target).assign(&column);
        }
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Small deterministic models for ensemble tests.

    use crate::algorithms::Model;
    use crate::data::ClassIndex;
    use crate::error::{MlError, Result};
    use crate::metrics::Metrics;
    use ndarray::{Array1, Array2};

    /// Predicts a constant; optionally fails to fit.
    #[derive(Debug, Clone)]
    pub struct Constant {
        pub value: f64,
        pub fail: bool,
        pub fitted: bool,
        pub classes: Option<ClassIndex>,
    }

    impl Constant {
        pub fn new(value: f64) -> Self {
            Self {
                value,
                fail: false,
                fitted: false,
                classes: None,
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(0.0)
            }
        }
    }

    impl Model for Constant {
        fn name(&self) -> &str {
            if self.fail { "failing" } else { "constant" }
        }

        fn fit(&mut self, _x: &Array2<f64>, y: &Array1<f64>) -> Result<Metrics> {
            if self.fail {
                return Err(MlError::model("refusing to fit"));
            }
            self.classes = ClassIndex::from_targets(y).ok();
            self.fitted = true;
            Ok(Metrics::default())
        }

        fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
            if !self.fitted {
                return Err(MlError::not_fitted("constant"));
            }
            Ok(Array1::from_elem(x.nrows(), self.value))
        }

        fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
            let classes = self.classes.as_ref().ok_or_else(|| MlError::not_fitted("constant"))?;
            let mut proba = Array2::zeros((x.nrows(), classes.len()));
            if let Some(j) = classes.index_of(self.value) {
                proba.column_mut(j).fill(1.0);
            }
            Ok(proba)
        }

        fn classes(&self) -> Option<&ClassIndex> {
            self.classes.as_ref()
        }

        fn is_fitted(&self) -> bool {
            self.fitted
        }

        fn clone_unfitted(&self) -> Box<dyn Model> {
            Box::new(Self {
                fitted: false,
                classes: None,
                ..self.clone()
            })
        }
    }
}
