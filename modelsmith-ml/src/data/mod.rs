//! Tabular datasets, task types and fold planning.

pub mod folds;

pub use folds::{Fold, FoldPlan, FoldStrategy, holdout_split};

use crate::error::{MlError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of supervised problem. Fixed for the lifetime of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Regression,
    Classification,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::Regression => write!(f, "regression"),
            TaskType::Classification => write!(f, "classification"),
        }
    }
}

/// An immutable feature matrix plus target vector.
#[derive(Debug, Clone)]
pub struct Dataset {
    x: Array2<f64>,
    y: Array1<f64>,
    task: TaskType,
}

impl Dataset {
    /// Validate and wrap a feature matrix and target.
    ///
    /// Requires at least two samples, at least one feature, matching lengths
    /// and finite values. Classification targets must be integral labels.
    pub fn new(x: Array2<f64>, y: Array1<f64>, task: TaskType) -> Result<Self> {
        check_xy(&x, &y)?;
        if x.nrows() < 2 {
            return Err(MlError::dataset(format!(
                "need at least 2 samples, got {}",
                x.nrows()
            )));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(MlError::dataset("feature matrix contains NaN or infinite values"));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(MlError::dataset("target contains NaN or infinite values"));
        }
        if task == TaskType::Classification {
            ClassIndex::from_targets(&y)?;
        }
        Ok(Self { x, y, task })
    }

    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    pub fn y(&self) -> &Array1<f64> {
        &self.y
    }

    pub fn task(&self) -> TaskType {
        self.task
    }

    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    /// Copy the given rows out of the dataset.
    pub fn subset(&self, rows: &[usize]) -> (Array2<f64>, Array1<f64>) {
        (self.x.select(Axis(0), rows), self.y.select(Axis(0), rows))
    }

    /// Hex SHA-256 over shape, task and values. Used to tie a search report
    /// to the data it ran on.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.n_samples() as u64).to_le_bytes());
        hasher.update((self.n_features() as u64).to_le_bytes());
        hasher.update(self.task.to_string().as_bytes());
        for v in self.x.iter().chain(self.y.iter()) {
            hasher.update(v.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Shape check shared by datasets and every `Model::fit`.
pub fn check_xy(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.ncols() == 0 {
        return Err(MlError::dataset("feature matrix has no columns"));
    }
    if x.nrows() != y.len() {
        return Err(MlError::dataset(format!(
            "feature matrix has {} rows but target has {} values",
            x.nrows(),
            y.len()
        )));
    }
    if x.nrows() == 0 {
        return Err(MlError::dataset("empty training set"));
    }
    Ok(())
}

/// Sorted set of class labels seen in a classification target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassIndex {
    classes: Vec<f64>,
}

impl ClassIndex {
    /// Collect the distinct labels. Labels must be finite integers.
    pub fn from_targets(y: &Array1<f64>) -> Result<Self> {
        if let Some(bad) = y.iter().find(|v| !v.is_finite() || v.fract() != 0.0) {
            return Err(MlError::dataset(format!(
                "classification labels must be integers, found {bad}"
            )));
        }
        let mut classes: Vec<f64> = y.to_vec();
        classes.sort_by(f64::total_cmp);
        classes.dedup();
        if classes.is_empty() {
            return Err(MlError::dataset("classification target is empty"));
        }
        Ok(Self { classes })
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn labels(&self) -> &[f64] {
        &self.classes
    }

    pub fn label(&self, index: usize) -> f64 {
        self.classes[index]
    }

    pub fn index_of(&self, label: f64) -> Option<usize> {
        self.classes
            .binary_search_by(|c| c.total_cmp(&label))
            .ok()
    }

    /// Map every target value to its class index.
    pub fn encode(&self, y: &Array1<f64>) -> Result<Vec<usize>> {
        y.iter()
            .map(|&v| {
                self.index_of(v)
                    .ok_or_else(|| MlError::dataset(format!("unknown class label {v}")))
            })
            .collect()
    }

    /// Count of each class in `y`, in class order.
    pub fn counts(&self, y: &Array1<f64>) -> Vec<usize> {
        let mut counts = vec![0; self.classes.len()];
        for &v in y {
            if let Some(i) = self.index_of(v) {
                counts[i] += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_dataset_validation() {
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        assert!(Dataset::new(x.clone(), array![1.0, 2.0, 3.0], TaskType::Regression).is_ok());
        assert!(Dataset::new(x.clone(), array![1.0, 2.0], TaskType::Regression).is_err());
        assert!(Dataset::new(x.clone(), array![0.0, 1.5, 1.0], TaskType::Classification).is_err());
        assert!(
            Dataset::new(array![[1.0]], array![1.0], TaskType::Regression).is_err(),
            "single sample must be rejected"
        );
        let with_nan = array![[1.0, f64::NAN], [3.0, 4.0]];
        assert!(Dataset::new(with_nan, array![1.0, 2.0], TaskType::Regression).is_err());
    }

    #[test]
    fn test_class_index_encoding() {
        let y = array![2.0, 0.0, 2.0, 5.0];
        let classes = ClassIndex::from_targets(&y).unwrap();
        assert_eq!(classes.labels(), &[0.0, 2.0, 5.0]);
        assert_eq!(classes.encode(&y).unwrap(), vec![1, 0, 1, 2]);
        assert_eq!(classes.counts(&y), vec![1, 2, 1]);
        assert_eq!(classes.index_of(3.0), None);
    }

    #[test]
    fn test_subset_and_fingerprint() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let ds = Dataset::new(x, array![10.0, 20.0, 30.0, 40.0], TaskType::Regression).unwrap();
        let (xs, ys) = ds.subset(&[3, 1]);
        assert_eq!(xs, array![[4.0], [2.0]]);
        assert_eq!(ys, array![40.0, 20.0]);

        let same = ds.clone();
        assert_eq!(ds.fingerprint(), same.fingerprint());
        let other = Dataset::new(
            array![[1.0], [2.0], [3.0], [5.0]],
            array![10.0, 20.0, 30.0, 40.0],
            TaskType::Regression,
        )
        .unwrap();
        assert_ne!(ds.fingerprint(), other.fingerprint());
    }
}
