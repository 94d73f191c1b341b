//! Random forest over bootstrapped CART trees, grown in parallel.

use super::tree::{DecisionTree, TreeParams, TreeTarget, bootstrap};
use super::{Model, check_features, labels_from_proba, normalize_importances, training_metrics};
use crate::data::{ClassIndex, TaskType, check_xy};
use crate::error::{MlError, Result};
use crate::metrics::Metrics;
use crate::params::{HyperParams, ParamReader};
use crate::seed::stream_rng;
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;

pub const FAMILY_TAG: &str = "random_forest";

#[derive(Debug, Clone, PartialEq)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    /// Fraction of features tried at each split.
    pub max_features: f64,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 12,
            max_features: 0.7,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

impl ForestParams {
    pub fn from_params(params: &HyperParams) -> Result<Self> {
        let d = Self::default();
        let mut r = ParamReader::new(FAMILY_TAG, params);
        let parsed = Self {
            n_estimators: r.usize_or("n_estimators", d.n_estimators, 1)?,
            max_depth: r.usize_or("max_depth", d.max_depth, 1)?,
            max_features: r.fraction_or("max_features", d.max_features)?,
            min_samples_split: r.usize_or("min_samples_split", d.min_samples_split, 2)?,
            min_samples_leaf: r.usize_or("min_samples_leaf", d.min_samples_leaf, 1)?,
        };
        r.finish()?;
        Ok(parsed)
    }
}

#[derive(Debug, Clone)]
pub struct RandomForest {
    params: ForestParams,
    task: TaskType,
    seed: u64,
    trees: Vec<DecisionTree>,
    classes: Option<ClassIndex>,
    n_features: usize,
}

impl RandomForest {
    pub fn new(params: ForestParams, task: TaskType, seed: u64) -> Self {
        Self {
            params,
            task,
            seed,
            trees: Vec::new(),
            classes: None,
            n_features: 0,
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    fn check_ready(&self, x: &Array2<f64>) -> Result<()> {
        if self.trees.is_empty() {
            return Err(MlError::not_fitted(FAMILY_TAG));
        }
        check_features(FAMILY_TAG, x, self.n_features)
    }

    /// Mean leaf payload over all trees, one row per sample.
    fn average_leaves(&self, x: &Array2<f64>, width: usize) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((x.nrows(), width));
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            for tree in &self.trees {
                for (j, v) in tree.predict_row(row).iter().enumerate() {
                    out[[i, j]] += v;
                }
            }
        }
        out / self.trees.len() as f64
    }
}

impl Model for RandomForest {
    fn name(&self) -> &str {
        FAMILY_TAG
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Metrics> {
        check_xy(x, y)?;
        let n = x.nrows();
        let tree_params = TreeParams {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: ((x.ncols() as f64 * self.params.max_features).ceil() as usize).max(1),
        };

        let targets = y.to_vec();
        let (classes, labels) = match self.task {
            TaskType::Classification => {
                let classes = ClassIndex::from_targets(y)?;
                let labels = classes.encode(y)?;
                (Some(classes), labels)
            }
            TaskType::Regression => (None, Vec::new()),
        };
        let target = match &classes {
            Some(c) => TreeTarget::Classification {
                labels: &labels,
                n_classes: c.len(),
            },
            None => TreeTarget::Regression(&targets),
        };

        let seed = self.seed;
        let trees: Vec<DecisionTree> = (0..self.params.n_estimators)
            .into_par_iter()
            .map(|t| {
                let mut rng = stream_rng(seed, t as u64);
                let rows = bootstrap(n, &mut rng);
                DecisionTree::fit(x, &target, &rows, &tree_params, &mut rng)
            })
            .collect();

        tracing::debug!(
            trees = trees.len(),
            max_depth = self.params.max_depth,
            "random forest fitted"
        );
        self.trees = trees;
        self.classes = classes;
        self.n_features = x.ncols();
        training_metrics(self, self.task, x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.check_ready(x)?;
        match &self.classes {
            Some(classes) => Ok(labels_from_proba(&self.predict_proba(x)?, classes)),
            None => Ok(self.average_leaves(x, 1).column(0).to_owned()),
        }
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_ready(x)?;
        let classes = self
            .classes
            .as_ref()
            .ok_or_else(|| MlError::model("random_forest regressor has no class probabilities"))?;
        Ok(self.average_leaves(x, classes.len()))
    }

    fn classes(&self) -> Option<&ClassIndex> {
        self.classes.as_ref()
    }

    fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    fn clone_unfitted(&self) -> Box<dyn Model> {
        Box::new(RandomForest::new(self.params.clone(), self.task, self.seed))
    }

    fn feature_importances(&self) -> Option<Array1<f64>> {
        if self.trees.is_empty() {
            return None;
        }
        let mut total = Array1::<f64>::zeros(self.n_features);
        for tree in &self.trees {
            for (acc, v) in total.iter_mut().zip(tree.importances()) {
                *acc += v;
            }
        }
        Some(normalize_importances(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::hyper_params;
    use ndarray::Array;

    fn linear_data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array::from_shape_fn((n, 3), |(i, j)| match j {
            0 => (i % 20) as f64,
            1 => ((i / 20) % 4) as f64,
            _ => (i % 3) as f64,
        });
        let y = x.column(0).mapv(|v| 2.0 * v + 1.0);
        (x, y)
    }

    fn trees(n_estimators: usize) -> ForestParams {
        ForestParams {
            n_estimators,
            ..Default::default()
        }
    }

    #[test]
    fn test_forest_regression_fits() {
        let (x, y) = linear_data(80);
        let mut rf = RandomForest::new(trees(20), TaskType::Regression, 1);
        assert!(!rf.is_fitted());
        assert!(matches!(rf.predict(&x), Err(MlError::NotFitted(_))));
        let metrics = rf.fit(&x, &y).unwrap();
        assert!(metrics.get("r2").unwrap() > 0.9);
        let importances = rf.feature_importances().unwrap();
        assert!((importances.sum() - 1.0).abs() < 1e-9);
        assert!(importances[0] > importances[1]);
    }

    #[test]
    fn test_forest_classification_proba() {
        let (x, _) = linear_data(60);
        let y = x.column(0).mapv(|v| if v > 9.0 { 1.0 } else { 0.0 });
        let mut rf = RandomForest::new(trees(15), TaskType::Classification, 3);
        rf.fit(&x, &y).unwrap();
        let proba = rf.predict_proba(&x).unwrap();
        assert_eq!(proba.ncols(), 2);
        for row in proba.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert_eq!(rf.classes().unwrap().labels(), &[0.0, 1.0]);
    }

    #[test]
    fn test_forest_is_deterministic_across_threads() {
        let (x, y) = linear_data(50);
        let fit = || {
            let mut rf = RandomForest::new(trees(12), TaskType::Regression, 9);
            rf.fit(&x, &y).unwrap();
            rf.predict(&x).unwrap()
        };
        assert_eq!(fit(), fit());
    }

    #[test]
    fn test_params_parsing() {
        let params = hyper_params([("n_estimators", 50i64), ("max_depth", 4)]);
        let p = ForestParams::from_params(&params).unwrap();
        assert_eq!(p.n_estimators, 50);
        assert_eq!(p.max_depth, 4);
        assert!(ForestParams::from_params(&hyper_params([("n_estimators", -1i64)])).is_err());
        assert!(ForestParams::from_params(&hyper_params([("learning_rate", 0.1)])).is_err());
    }
}
