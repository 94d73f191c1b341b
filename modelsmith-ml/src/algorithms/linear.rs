//! Regularized linear models: elastic net regression by coordinate descent,
//! multinomial logistic regression by proximal gradient descent.

use super::{
    Model, Standardizer, check_features, labels_from_proba, normalize_importances, softmax_rows,
    training_metrics,
};
use crate::data::{ClassIndex, TaskType, check_xy};
use crate::error::{MlError, Result};
use crate::metrics::Metrics;
use crate::params::{HyperParams, ParamReader};
use ndarray::{Array1, Array2, Axis};

pub const FAMILY_TAG: &str = "linear";

const TOLERANCE: f64 = 1e-6;
const LOGISTIC_STEP: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct LinearParams {
    /// Overall penalty strength.
    pub alpha: f64,
    /// Share of the penalty that is L1.
    pub l1_ratio: f64,
    pub max_iter: usize,
}

impl Default for LinearParams {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            l1_ratio: 0.5,
            max_iter: 300,
        }
    }
}

impl LinearParams {
    pub fn from_params(params: &HyperParams) -> Result<Self> {
        let d = Self::default();
        let mut r = ParamReader::new(FAMILY_TAG, params);
        let parsed = Self {
            alpha: r.f64_in("alpha", d.alpha, 0.0, 1e4)?,
            l1_ratio: r.f64_in("l1_ratio", d.l1_ratio, 0.0, 1.0)?,
            max_iter: r.usize_or("max_iter", d.max_iter, 1)?,
        };
        r.finish()?;
        Ok(parsed)
    }
}

fn soft_threshold(v: f64, t: f64) -> f64 {
    if v > t {
        v - t
    } else if v < -t {
        v + t
    } else {
        0.0
    }
}

#[derive(Debug, Clone)]
struct LinearState {
    scaler: Standardizer,
    /// One row per output, in standardized feature space.
    coef: Array2<f64>,
    intercept: Array1<f64>,
    classes: Option<ClassIndex>,
    n_features: usize,
}

impl LinearState {
    fn scores(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        check_features(FAMILY_TAG, x, self.n_features)?;
        let z = self.scaler.transform(x);
        Ok(z.dot(&self.coef.t()) + &self.intercept)
    }
}

#[derive(Debug, Clone)]
pub struct LinearModel {
    params: LinearParams,
    task: TaskType,
    state: Option<LinearState>,
}

impl LinearModel {
    pub fn new(params: LinearParams, task: TaskType) -> Self {
        Self {
            params,
            task,
            state: None,
        }
    }

    pub fn params(&self) -> &LinearParams {
        &self.params
    }

    /// Coefficients on the original feature scale. Regression only.
    pub fn coefficients(&self) -> Result<Array1<f64>> {
        let state = self.state()?;
        if state.classes.is_some() {
            return Err(MlError::model("coefficients are per class for classifiers"));
        }
        Ok(&state.coef.row(0) / state.scaler.std())
    }

    fn state(&self) -> Result<&LinearState> {
        self.state
            .as_ref()
            .ok_or_else(|| MlError::not_fitted(FAMILY_TAG))
    }

    /// Elastic net on standardized features and a centered target.
    fn fit_elastic_net(&self, z: &Array2<f64>, y: &Array1<f64>) -> (Array1<f64>, f64) {
        let (n, p) = z.dim();
        let n = n as f64;
        let y_mean = y.mean().unwrap_or(0.0);
        let mut residual = y.mapv(|v| v - y_mean);
        let mut w = Array1::<f64>::zeros(p);
        let col_sq: Vec<f64> = z.axis_iter(Axis(1)).map(|c| c.dot(&c) / n).collect();
        let l1 = self.params.alpha * self.params.l1_ratio;
        let l2 = self.params.alpha * (1.0 - self.params.l1_ratio);

        for iter in 0..self.params.max_iter {
            let mut max_change: f64 = 0.0;
            for j in 0..p {
                let col = z.column(j);
                let old = w[j];
                let rho = col.dot(&residual) / n + col_sq[j] * old;
                let denom = col_sq[j] + l2;
                let new = if denom > 0.0 { soft_threshold(rho, l1) / denom } else { 0.0 };
                if new != old {
                    residual.scaled_add(old - new, &col);
                    w[j] = new;
                    max_change = max_change.max((new - old).abs());
                }
            }
            if max_change < TOLERANCE {
                tracing::trace!(iter, "elastic net converged");
                break;
            }
        }
        (w, y_mean)
    }

    /// Softmax regression with an L2 gradient term and an L1 proximal step.
    fn fit_logistic(
        &self,
        z: &Array2<f64>,
        labels: &[usize],
        k: usize,
    ) -> (Array2<f64>, Array1<f64>) {
        let (n, p) = z.dim();
        let mut onehot = Array2::<f64>::zeros((n, k));
        for (i, &l) in labels.iter().enumerate() {
            onehot[[i, l]] = 1.0;
        }
        let mut coef = Array2::<f64>::zeros((k, p));
        let mut intercept = Array1::<f64>::zeros(k);
        let l1 = self.params.alpha * self.params.l1_ratio;
        let l2 = self.params.alpha * (1.0 - self.params.l1_ratio);

        for iter in 0..self.params.max_iter {
            let mut proba = z.dot(&coef.t()) + &intercept;
            softmax_rows(&mut proba);
            let diff = proba - &onehot;
            let grad = diff.t().dot(z) / n as f64 + &coef * l2;
            let grad_b = diff.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(k));

            let before = coef.clone();
            coef.scaled_add(-LOGISTIC_STEP, &grad);
            coef.mapv_inplace(|v| soft_threshold(v, LOGISTIC_STEP * l1));
            intercept.scaled_add(-LOGISTIC_STEP, &grad_b);

            let change = (&coef - &before).mapv(f64::abs).fold(0.0_f64, |a, &b| a.max(b));
            if change < TOLERANCE {
                tracing::trace!(iter, "logistic regression converged");
                break;
            }
        }
        (coef, intercept)
    }
}

impl Model for LinearModel {
    fn name(&self) -> &str {
        FAMILY_TAG
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Metrics> {
        check_xy(x, y)?;
        let scaler = Standardizer::fit(x);
        let z = scaler.transform(x);

        let (coef, intercept, classes) = match self.task {
            TaskType::Regression => {
                let (w, b) = self.fit_elastic_net(&z, y);
                (w.insert_axis(Axis(0)), Array1::from(vec![b]), None)
            }
            TaskType::Classification => {
                let classes = ClassIndex::from_targets(y)?;
                if classes.len() < 2 {
                    return Err(MlError::model("linear classifier needs at least two classes"));
                }
                let labels = classes.encode(y)?;
                let (coef, intercept) = self.fit_logistic(&z, &labels, classes.len());
                (coef, intercept, Some(classes))
            }
        };
        if coef.iter().any(|v| !v.is_finite()) {
            return Err(MlError::model("linear model diverged"));
        }

        self.state = Some(LinearState {
            scaler,
            coef,
            intercept,
            classes,
            n_features: x.ncols(),
        });
        training_metrics(self, self.task, x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let state = self.state()?;
        match &state.classes {
            Some(classes) => Ok(labels_from_proba(&self.predict_proba(x)?, classes)),
            None => Ok(state.scores(x)?.column(0).to_owned()),
        }
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let state = self.state()?;
        if state.classes.is_none() {
            return Err(MlError::model("linear regressor has no class probabilities"));
        }
        let mut scores = state.scores(x)?;
        softmax_rows(&mut scores);
        Ok(scores)
    }

    fn classes(&self) -> Option<&ClassIndex> {
        self.state.as_ref().and_then(|s| s.classes.as_ref())
    }

    fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    fn clone_unfitted(&self) -> Box<dyn Model> {
        Box::new(LinearModel::new(self.params.clone(), self.task))
    }

    fn feature_importances(&self) -> Option<Array1<f64>> {
        let state = self.state.as_ref()?;
        let raw = state.coef.mapv(f64::abs).sum_axis(Axis(0));
        Some(normalize_importances(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::hyper_params;
    use ndarray::Array;

    fn regression_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array::from_shape_fn((60, 3), |(i, j)| ((i * (2 * j + 1)) % 11) as f64);
        let y = x.map_axis(Axis(1), |r| 3.0 * r[0] - 2.0 * r[1] + 5.0);
        (x, y)
    }

    #[test]
    fn test_elastic_net_recovers_coefficients() {
        let (x, y) = regression_data();
        let params = LinearParams {
            alpha: 1e-6,
            l1_ratio: 0.5,
            max_iter: 2000,
        };
        let mut model = LinearModel::new(params, TaskType::Regression);
        let metrics = model.fit(&x, &y).unwrap();
        assert!(metrics.get("rmse").unwrap() < 1e-2);
        let coef = model.coefficients().unwrap();
        assert!((coef[0] - 3.0).abs() < 1e-2);
        assert!((coef[1] + 2.0).abs() < 1e-2);
        assert!(coef[2].abs() < 1e-2);
    }

    #[test]
    fn test_strong_l1_zeroes_everything() {
        let (x, y) = regression_data();
        let params = LinearParams {
            alpha: 1e3,
            l1_ratio: 1.0,
            max_iter: 50,
        };
        let mut model = LinearModel::new(params, TaskType::Regression);
        model.fit(&x, &y).unwrap();
        let importances = model.feature_importances().unwrap();
        assert_eq!(importances.sum(), 0.0);
    }

    #[test]
    fn test_logistic_classification() {
        let x = Array::from_shape_fn((60, 2), |(i, j)| {
            if j == 0 { i as f64 } else { (i % 4) as f64 }
        });
        let y = Array1::from_iter((0..60).map(|i| if i < 30 { 0.0 } else { 1.0 }));
        let mut model = LinearModel::new(LinearParams::default(), TaskType::Classification);
        let metrics = model.fit(&x, &y).unwrap();
        assert!(metrics.get("accuracy").unwrap() >= 0.95);
        let proba = model.predict_proba(&x).unwrap();
        assert!(proba[[0, 0]] > 0.5 && proba[[59, 1]] > 0.5);
    }

    #[test]
    fn test_params_parsing() {
        assert!(LinearParams::from_params(&hyper_params([("l1_ratio", 1.5)])).is_err());
        assert!(LinearParams::from_params(&hyper_params([("n_estimators", 10i64)])).is_err());
        let p = LinearParams::from_params(&hyper_params([("alpha", 0.5)])).unwrap();
        assert_eq!(p.alpha, 0.5);
    }
}
