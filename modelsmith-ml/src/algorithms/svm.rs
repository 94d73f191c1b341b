//! Kernel support vector machines, approximated with random Fourier features
//! and trained by Pegasos-style stochastic subgradient descent.
//!
//! Classification uses the hinge loss (one-vs-rest above two classes),
//! regression the epsilon-insensitive loss on a standardized target.

use super::{
    Model, Standardizer, check_features, labels_from_proba, sigmoid, softmax_rows,
    training_metrics,
};
use crate::data::{ClassIndex, TaskType, check_xy};
use crate::error::{MlError, Result};
use crate::metrics::Metrics;
use crate::params::{HyperParams, ParamReader};
use crate::seed::stream_rng;
use ndarray::{Array1, Array2, ArrayView1, Axis, concatenate};
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

pub const FAMILY_TAG: &str = "support_vector";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    Linear,
    Rbf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SvmParams {
    pub kernel: Kernel,
    pub c: f64,
    /// RBF width. `None` means `1 / n_features`.
    pub gamma: Option<f64>,
    pub n_components: usize,
    pub epochs: usize,
    /// Insensitive tube half-width, in target standard deviations.
    pub epsilon: f64,
    /// Fraction of rows the solver samples from.
    pub subsample: f64,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            kernel: Kernel::Rbf,
            c: 1.0,
            gamma: None,
            n_components: 100,
            epochs: 20,
            epsilon: 0.1,
            subsample: 1.0,
        }
    }
}

impl SvmParams {
    pub fn from_params(params: &HyperParams) -> Result<Self> {
        let d = Self::default();
        let mut r = ParamReader::new(FAMILY_TAG, params);
        let kernel = match r.choice_or("kernel", "rbf", &["rbf", "linear"])? {
            "linear" => Kernel::Linear,
            _ => Kernel::Rbf,
        };
        let gamma = if params.contains_key("gamma") {
            Some(r.positive_f64_or("gamma", 1.0)?)
        } else {
            None
        };
        let parsed = Self {
            kernel,
            c: r.positive_f64_or("c", d.c)?,
            gamma,
            n_components: r.usize_or("n_components", d.n_components, 1)?,
            epochs: r.usize_or("epochs", d.epochs, 1)?,
            epsilon: r.f64_in("epsilon", d.epsilon, 0.0, 1.0)?,
            subsample: r.fraction_or("subsample", d.subsample)?,
        };
        r.finish()?;
        Ok(parsed)
    }
}

/// `z(x) = sqrt(2/m) cos(W x + b)` with `W ~ N(0, 2 gamma)`.
#[derive(Debug, Clone)]
struct FourierMap {
    w: Array2<f64>,
    b: Array1<f64>,
}

impl FourierMap {
    fn sample(d: usize, m: usize, gamma: f64, rng: &mut StdRng) -> Result<Self> {
        let normal = Normal::new(0.0, (2.0 * gamma).sqrt())
            .map_err(|e| MlError::model(format!("invalid rbf width {gamma}: {e}")))?;
        let w = Array2::from_shape_simple_fn((m, d), || normal.sample(rng));
        let b = Array1::from_shape_simple_fn(m, || rng.gen_range(0.0..std::f64::consts::TAU));
        Ok(Self { w, b })
    }

    fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let scale = (2.0 / self.b.len() as f64).sqrt();
        (x.dot(&self.w.t()) + &self.b).mapv(|v| scale * v.cos())
    }
}

#[derive(Debug, Clone)]
struct SvmState {
    scaler: Standardizer,
    map: Option<FourierMap>,
    /// One weight row per output; last column is the bias.
    weights: Array2<f64>,
    classes: Option<ClassIndex>,
    y_mean: f64,
    y_std: f64,
    n_features: usize,
}

impl SvmState {
    fn design(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        check_features(FAMILY_TAG, x, self.n_features)?;
        design_matrix(&self.scaler, self.map.as_ref(), x)
    }

    fn decision(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(self.design(x)?.dot(&self.weights.t()))
    }
}

fn design_matrix(
    scaler: &Standardizer,
    map: Option<&FourierMap>,
    x: &Array2<f64>,
) -> Result<Array2<f64>> {
    let z = scaler.transform(x);
    let z = match map {
        Some(map) => map.transform(&z),
        None => z,
    };
    let ones = Array2::<f64>::ones((z.nrows(), 1));
    concatenate(Axis(1), &[z.view(), ones.view()])
        .map_err(|e| MlError::model(format!("failed to build design matrix: {e}")))
}

/// Subgradient of the loss for one sample, as a multiple of the sample.
type LossStep = fn(target: f64, output: f64, epsilon: f64) -> f64;

fn hinge_step(target: f64, output: f64, _epsilon: f64) -> f64 {
    if target * output < 1.0 { target } else { 0.0 }
}

fn epsilon_step(target: f64, output: f64, epsilon: f64) -> f64 {
    let residual = target - output;
    if residual > epsilon {
        1.0
    } else if residual < -epsilon {
        -1.0
    } else {
        0.0
    }
}

/// Rows the solver may draw from. All rows when `fraction` is 1.
fn active_rows(n: usize, fraction: f64, rng: &mut StdRng) -> Vec<usize> {
    if fraction >= 1.0 {
        return (0..n).collect();
    }
    let take = ((n as f64 * fraction).ceil() as usize).clamp(1, n);
    let mut rows = rand::seq::index::sample(rng, n, take).into_vec();
    rows.sort_unstable();
    rows
}

/// Pegasos with projection and iterate averaging over the second half.
#[allow(clippy::too_many_arguments)]
fn pegasos(
    z: &Array2<f64>,
    targets: &[f64],
    rows: &[usize],
    lambda: f64,
    epochs: usize,
    epsilon: f64,
    step: LossStep,
    rng: &mut StdRng,
) -> Array1<f64> {
    let p = z.ncols();
    let total = epochs * rows.len();
    let average_from = total / 2;
    let radius = 1.0 / lambda.sqrt();
    let mut w = Array1::<f64>::zeros(p);
    let mut avg = Array1::<f64>::zeros(p);
    let mut averaged = 0usize;

    for t in 1..=total {
        let i = rows[rng.gen_range(0..rows.len())];
        let row: ArrayView1<'_, f64> = z.row(i);
        let eta = 1.0 / (lambda * t as f64);
        let output = row.dot(&w);
        let g = step(targets[i], output, epsilon);
        w *= 1.0 - eta * lambda;
        if g != 0.0 {
            w.scaled_add(eta * g, &row);
        }
        let norm = w.dot(&w).sqrt();
        if norm > radius {
            w *= radius / norm;
        }
        if t > average_from {
            avg += &w;
            averaged += 1;
        }
    }
    if averaged > 0 {
        avg / averaged as f64
    } else {
        w
    }
}

#[derive(Debug, Clone)]
pub struct SupportVector {
    params: SvmParams,
    task: TaskType,
    seed: u64,
    state: Option<SvmState>,
}

impl SupportVector {
    pub fn new(params: SvmParams, task: TaskType, seed: u64) -> Self {
        Self {
            params,
            task,
            seed,
            state: None,
        }
    }

    pub fn params(&self) -> &SvmParams {
        &self.params
    }

    fn state(&self) -> Result<&SvmState> {
        self.state
            .as_ref()
            .ok_or_else(|| MlError::not_fitted(FAMILY_TAG))
    }
}

impl Model for SupportVector {
    fn name(&self) -> &str {
        FAMILY_TAG
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Metrics> {
        check_xy(x, y)?;
        let (n, d) = x.dim();
        let mut rng = stream_rng(self.seed, 0);
        let scaler = Standardizer::fit(x);
        let map = match self.params.kernel {
            Kernel::Rbf => {
                let gamma = self.params.gamma.unwrap_or(1.0 / d as f64);
                Some(FourierMap::sample(d, self.params.n_components, gamma, &mut rng)?)
            }
            Kernel::Linear => None,
        };
        let z = design_matrix(&scaler, map.as_ref(), x)?;
        let rows = active_rows(n, self.params.subsample, &mut rng);
        let lambda = (1.0 / (self.params.c * rows.len() as f64)).max(1e-4);
        let epochs = self.params.epochs;

        let (weights, classes, y_mean, y_std) = match self.task {
            TaskType::Regression => {
                let y_mean = y.mean().unwrap_or(0.0);
                let y_std = y.std(0.0);
                let y_std = if y_std > 1e-12 { y_std } else { 1.0 };
                let targets: Vec<f64> = y.iter().map(|v| (v - y_mean) / y_std).collect();
                let epsilon = self.params.epsilon;
                let w = pegasos(
                    &z,
                    &targets,
                    &rows,
                    lambda,
                    epochs,
                    epsilon,
                    epsilon_step,
                    &mut rng,
                );
                (w.insert_axis(Axis(0)), None, y_mean, y_std)
            }
            TaskType::Classification => {
                let classes = ClassIndex::from_targets(y)?;
                if classes.len() < 2 {
                    return Err(MlError::model("support_vector needs at least two classes"));
                }
                let labels = classes.encode(y)?;
                // binary problems train one separator for the second class
                let outputs: Vec<usize> = if classes.len() == 2 {
                    vec![1]
                } else {
                    (0..classes.len()).collect()
                };
                let mut weights = Array2::<f64>::zeros((outputs.len(), z.ncols()));
                for (row, &c) in outputs.iter().enumerate() {
                    let targets: Vec<f64> = labels
                        .iter()
                        .map(|&l| if l == c { 1.0 } else { -1.0 })
                        .collect();
                    let w = pegasos(&z, &targets, &rows, lambda, epochs, 0.0, hinge_step, &mut rng);
                    weights.row_mut(row).assign(&w);
                }
                (weights, Some(classes), 0.0, 1.0)
            }
        };

        self.state = Some(SvmState {
            scaler,
            map,
            weights,
            classes,
            y_mean,
            y_std,
            n_features: d,
        });
        tracing::debug!(kernel = ?self.params.kernel, c = self.params.c, "support vector fitted");
        training_metrics(self, self.task, x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let state = self.state()?;
        match &state.classes {
            Some(classes) => Ok(labels_from_proba(&self.predict_proba(x)?, classes)),
            None => Ok(state
                .decision(x)?
                .column(0)
                .mapv(|v| v * state.y_std + state.y_mean)),
        }
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let state = self.state()?;
        let Some(classes) = &state.classes else {
            return Err(MlError::model("support_vector regressor has no class probabilities"));
        };
        let mut decision = state.decision(x)?;
        if classes.len() == 2 {
            let p = decision.column(0).mapv(|v| sigmoid(2.0 * v));
            let mut proba = Array2::<f64>::zeros((x.nrows(), 2));
            proba.column_mut(0).assign(&p.mapv(|v| 1.0 - v));
            proba.column_mut(1).assign(&p);
            Ok(proba)
        } else {
            decision.mapv_inplace(|v| 2.0 * v);
            softmax_rows(&mut decision);
            Ok(decision)
        }
    }

    fn classes(&self) -> Option<&ClassIndex> {
        self.state.as_ref().and_then(|s| s.classes.as_ref())
    }

    fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    fn clone_unfitted(&self) -> Box<dyn Model> {
        Box::new(SupportVector::new(self.params.clone(), self.task, self.seed))
    }
}
