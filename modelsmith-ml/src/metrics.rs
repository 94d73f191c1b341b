//! Optimization metrics and evaluation reports.

use crate::data::{ClassIndex, TaskType};
use crate::error::{MlError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which way a raw metric improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Minimize,
    Maximize,
}

/// Metric the search optimizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// `rmse` for regression, `accuracy` for classification.
    #[default]
    Auto,
    Rmse,
    R2,
    Accuracy,
    Auc,
}

impl Metric {
    /// Replace `Auto` with the concrete metric for `task`.
    pub fn resolve(self, task: TaskType) -> Metric {
        match (self, task) {
            (Metric::Auto, TaskType::Regression) => Metric::Rmse,
            (Metric::Auto, TaskType::Classification) => Metric::Accuracy,
            (m, _) => m,
        }
    }

    pub fn supports(self, task: TaskType) -> bool {
        match self {
            Metric::Auto => true,
            Metric::Rmse | Metric::R2 => task == TaskType::Regression,
            Metric::Accuracy | Metric::Auc => task == TaskType::Classification,
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Metric::Rmse | Metric::Auto => Direction::Minimize,
            Metric::R2 | Metric::Accuracy | Metric::Auc => Direction::Maximize,
        }
    }

    /// Orient a raw value so that lower is better.
    pub fn normalize(self, raw: f64) -> f64 {
        match self.direction() {
            Direction::Minimize => raw,
            Direction::Maximize => -raw,
        }
    }

    /// Key of this metric in a [`Metrics`] report.
    pub fn key(self) -> &'static str {
        match self {
            Metric::Auto => "auto",
            Metric::Rmse => "rmse",
            Metric::R2 => "r2",
            Metric::Accuracy => "accuracy",
            Metric::Auc => "auc",
        }
    }

    /// Compute the raw value of this metric.
    ///
    /// `proba` is only consulted for `Auc`; it must have one column per class
    /// in `classes` order.
    pub fn compute(
        self,
        y_true: &Array1<f64>,
        y_pred: &Array1<f64>,
        proba: Option<&Array2<f64>>,
        classes: Option<&ClassIndex>,
    ) -> Result<f64> {
        if y_true.len() != y_pred.len() {
            return Err(MlError::model(format!(
                "prediction length {} does not match target length {}",
                y_pred.len(),
                y_true.len()
            )));
        }
        match self {
            Metric::Auto => Err(MlError::config("metric must be resolved before scoring")),
            Metric::Rmse => Ok(mse(y_true, y_pred).sqrt()),
            Metric::R2 => Ok(r2(y_true, y_pred)),
            Metric::Accuracy => Ok(accuracy(y_true, y_pred)),
            Metric::Auc => {
                let proba =
                    proba.ok_or_else(|| MlError::model("auc requires class probabilities"))?;
                let classes = classes.ok_or_else(|| MlError::model("auc requires class labels"))?;
                auc(y_true, proba, classes)
            }
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl std::str::FromStr for Metric {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Metric::Auto),
            "rmse" => Ok(Metric::Rmse),
            "r2" => Ok(Metric::R2),
            "accuracy" => Ok(Metric::Accuracy),
            "auc" | "roc_auc" => Ok(Metric::Auc),
            other => Err(MlError::config(format!("unknown metric '{other}'"))),
        }
    }
}

/// Named metric values, e.g. `{"rmse": 0.41, "r2": 0.87}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(BTreeMap<String, f64>);

impl Metrics {
    /// `rmse`, `mse`, `mae` and `r2`.
    pub fn regression(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Self {
        let mse = mse(y_true, y_pred);
        let mae = y_true
            .iter()
            .zip(y_pred.iter())
            .map(|(t, p)| (t - p).abs())
            .sum::<f64>()
            / y_true.len().max(1) as f64;
        let mut m = Metrics::default();
        m.insert("rmse", mse.sqrt());
        m.insert("mse", mse);
        m.insert("mae", mae);
        m.insert("r2", r2(y_true, y_pred));
        m
    }

    /// `accuracy` plus macro `precision`, `recall` and `f1`. Adds `auc` when
    /// probabilities are supplied and it can be computed.
    pub fn classification(
        y_true: &Array1<f64>,
        y_pred: &Array1<f64>,
        proba: Option<&Array2<f64>>,
        classes: &ClassIndex,
    ) -> Self {
        let mut m = Metrics::default();
        m.insert("accuracy", accuracy(y_true, y_pred));

        let k = classes.len();
        let (mut precision, mut recall, mut f1) = (0.0, 0.0, 0.0);
        for c in 0..k {
            let label = classes.label(c);
            let mut tp = 0.0;
            let mut fp = 0.0;
            let mut fn_ = 0.0;
            for (t, p) in y_true.iter().zip(y_pred.iter()) {
                match (*t == label, *p == label) {
                    (true, true) => tp += 1.0,
                    (false, true) => fp += 1.0,
                    (true, false) => fn_ += 1.0,
                    (false, false) => {}
                }
            }
            let p = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
            let r = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
            precision += p;
            recall += r;
            f1 += if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };
        }
        let k = k.max(1) as f64;
        m.insert("precision", precision / k);
        m.insert("recall", recall / k);
        m.insert("f1", f1 / k);

        if let Some(proba) = proba {
            if let Ok(value) = auc(y_true, proba, classes) {
                m.insert("auc", value);
            }
        }
        m
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn mse(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    let n = y_true.len().max(1) as f64;
    y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum::<f64>()
        / n
}

/// Coefficient of determination. A constant target scores 1.0 when predicted
/// exactly and 0.0 otherwise.
fn r2(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    let mean = y_true.mean().unwrap_or(0.0);
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

fn accuracy(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    let correct = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|(t, p)| t == p)
        .count();
    correct as f64 / y_true.len().max(1) as f64
}

/// Rank-based AUC of `scores` for the positive set, with ties averaged.
fn binary_auc(positive: &[bool], scores: &[f64]) -> Option<f64> {
    let n_pos = positive.iter().filter(|p| **p).count();
    let n_neg = positive.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // 1-based ranks i+1..=j+1 share their average
        let avg_rank = (i + j + 2) as f64 / 2.0;
        for &idx in &order[i..=j] {
            if positive[idx] {
                rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }
    let n_pos = n_pos as f64;
    Some((rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64))
}

/// Binary AUC on the last class column, macro one-vs-rest for more classes.
fn auc(y_true: &Array1<f64>, proba: &Array2<f64>, classes: &ClassIndex) -> Result<f64> {
    if proba.nrows() != y_true.len() || proba.ncols() != classes.len() {
        return Err(MlError::model(format!(
            "probability matrix is {}x{}, expected {}x{}",
            proba.nrows(),
            proba.ncols(),
            y_true.len(),
            classes.len()
        )));
    }
    let columns: Vec<usize> = if classes.len() == 2 {
        vec![1]
    } else {
        (0..classes.len()).collect()
    };
    let mut total = 0.0;
    let mut counted = 0usize;
    for c in columns {
        let label = classes.label(c);
        let positive: Vec<bool> = y_true.iter().map(|t| *t == label).collect();
        let scores: Vec<f64> = proba.column(c).to_vec();
        if let Some(value) = binary_auc(&positive, &scores) {
            total += value;
            counted += 1;
        }
    }
    if counted == 0 {
        return Err(MlError::model("auc is undefined when only one class is present"));
    }
    Ok(total / counted as f64)
}
