//! Candidate model families and the capability contract they share.

#[cfg(any(feature = "gbt-depthwise", feature = "gbt-leafwise"))]
pub mod boosting;
pub mod forest;
pub mod linear;
pub mod svm;
pub mod tree;

use crate::data::{ClassIndex, TaskType};
use crate::error::{MlError, Result};
use crate::metrics::Metrics;
use ndarray::{Array1, Array2, Axis};

/// The capability contract every candidate model satisfies.
///
/// A model starts unfitted. `predict` and `predict_proba` return
/// [`MlError::NotFitted`] until `fit` has succeeded.
pub trait Model: Send + Sync {
    /// Family tag or a descriptive name.
    fn name(&self) -> &str;

    /// Train on `x`/`y` and return in-sample metrics.
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Metrics>;

    /// Point predictions. Class labels for classifiers.
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Class probabilities, one column per entry of [`Model::classes`].
    fn predict_proba(&self, _x: &Array2<f64>) -> Result<Array2<f64>> {
        Err(MlError::model(format!(
            "{} does not produce class probabilities",
            self.name()
        )))
    }

    /// Sorted class labels seen during fit. `None` for regressors.
    fn classes(&self) -> Option<&ClassIndex> {
        None
    }

    fn is_fitted(&self) -> bool;

    /// A fresh, unfitted model with the same configuration.
    fn clone_unfitted(&self) -> Box<dyn Model>;

    /// Normalized per-feature importances, when the family has them.
    fn feature_importances(&self) -> Option<Array1<f64>> {
        None
    }
}

/// In-sample metrics reported by `fit` implementations.
pub(crate) fn training_metrics(
    model: &dyn Model,
    task: TaskType,
    x: &Array2<f64>,
    y: &Array1<f64>,
) -> Result<Metrics> {
    let pred = model.predict(x)?;
    Ok(match (task, model.classes()) {
        (TaskType::Classification, Some(classes)) => {
            let proba = model.predict_proba(x).ok();
            Metrics::classification(y, &pred, proba.as_ref(), classes)
        }
        _ => Metrics::regression(y, &pred),
    })
}

/// Check `x` has the column count the model was fit with.
pub(crate) fn check_features(name: &str, x: &Array2<f64>, expected: usize) -> Result<()> {
    if x.ncols() != expected {
        return Err(MlError::model(format!(
            "{name} was fit on {expected} features, got {}",
            x.ncols()
        )));
    }
    Ok(())
}

/// Argmax of each probability row mapped back to class labels.
pub(crate) fn labels_from_proba(proba: &Array2<f64>, classes: &ClassIndex) -> Array1<f64> {
    proba
        .axis_iter(Axis(0))
        .map(|row| {
            let best = row
                .iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |acc, (i, &p)| if p > acc.1 { (i, p) } else { acc });
            classes.label(best.0)
        })
        .collect()
}

/// In-place softmax over each row.
pub(crate) fn softmax_rows(scores: &mut Array2<f64>) {
    for mut row in scores.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|s| (s - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Per-column mean and standard deviation. Zero deviations become 1.
#[derive(Debug, Clone)]
pub(crate) struct Standardizer {
    mean: Array1<f64>,
    std: Array1<f64>,
}

impl Standardizer {
    pub(crate) fn fit(x: &Array2<f64>) -> Self {
        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
        let std = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 1e-12 { s } else { 1.0 });
        Self { mean, std }
    }

    pub(crate) fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean) / &self.std
    }

    pub(crate) fn std(&self) -> &Array1<f64> {
        &self.std
    }
}

/// Rescale importances so they sum to 1. All-zero stays all-zero.
pub(crate) fn normalize_importances(mut raw: Array1<f64>) -> Array1<f64> {
    let total = raw.sum();
    if total > 0.0 {
        raw.mapv_inplace(|v| v / total);
    }
    raw
}
