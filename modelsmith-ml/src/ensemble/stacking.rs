use super::aligned_proba;
use crate::algorithms::{Model, training_metrics};
use crate::data::{ClassIndex, FoldPlan, TaskType, check_xy};
use crate::error::{MlError, Result};
use crate::metrics::Metrics;
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What each base model contributes to the meta features of a classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackFeatures {
    /// Positive-class probability on binary tasks, predicted label otherwise.
    #[default]
    Probabilities,
    /// Always the predicted label.
    Predictions,
}

/// Meta model trained on out-of-fold base predictions.
///
/// Every entry of the out-of-fold matrix comes from a base model copy that
/// never saw that row. After the matrix is built the bases are refit on the
/// full data and serve predictions; the meta model is fit once, on the
/// out-of-fold matrix.
pub struct StackingEnsemble {
    base: Vec<Box<dyn Model>>,
    meta: Box<dyn Model>,
    task: TaskType,
    folds: usize,
    seed: u64,
    features: StackFeatures,
    classes: Option<ClassIndex>,
    oof: Option<Array2<f64>>,
    assignment: Vec<usize>,
    fitted: bool,
}

impl StackingEnsemble {
    pub fn new(
        base: Vec<Box<dyn Model>>,
        meta: Box<dyn Model>,
        task: TaskType,
        folds: usize,
        seed: u64,
    ) -> Self {
        Self {
            base,
            meta,
            task,
            folds,
            seed,
            features: StackFeatures::default(),
            classes: None,
            oof: None,
            assignment: Vec::new(),
            fitted: false,
        }
    }

    pub fn with_features(mut self, features: StackFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn base_models(&self) -> &[Box<dyn Model>] {
        &self.base
    }

    pub fn meta_model(&self) -> &dyn Model {
        self.meta.as_ref()
    }

    /// The N×M matrix the meta model was trained on.
    pub fn oof_matrix(&self) -> Option<&Array2<f64>> {
        self.oof.as_ref()
    }

    /// Fold index of each training row. Empty before `fit`.
    pub fn fold_assignment(&self) -> &[usize] {
        &self.assignment
    }

    fn uses_probability(&self) -> bool {
        self.features == StackFeatures::Probabilities
            && self.classes.as_ref().is_some_and(|c| c.len() == 2)
    }

    /// One meta-feature column from a fitted base model.
    fn feature_column(&self, model: &dyn Model, x: &Array2<f64>) -> Result<Array1<f64>> {
        match &self.classes {
            Some(classes) if self.uses_probability() => {
                Ok(aligned_proba(model, x, classes)?.column(1).to_owned())
            }
            _ => model.predict(x),
        }
    }

    fn base_failure(&self, index: usize, error: MlError) -> MlError {
        MlError::BaseModelFit {
            index,
            name: self.base[index].name().to_string(),
            reason: error.to_string(),
        }
    }

    fn meta_features(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let columns: Vec<Array1<f64>> = self
            .base
            .iter()
            .map(|model| self.feature_column(model.as_ref(), x))
            .collect::<Result<_>>()?;
        let views: Vec<_> = columns.iter().map(|c| c.view().insert_axis(Axis(1))).collect();
        ndarray::concatenate(Axis(1), &views).map_err(|e| MlError::model(e.to_string()))
    }
}

impl Model for StackingEnsemble {
    fn name(&self) -> &str {
        "stacking"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Metrics> {
        check_xy(x, y)?;
        if self.base.is_empty() {
            return Err(MlError::model("stacking ensemble has no base models"));
        }
        self.fitted = false;
        self.oof = None;
        self.classes = match self.task {
            TaskType::Classification => Some(ClassIndex::from_targets(y)?),
            TaskType::Regression => None,
        };

        let n = x.nrows();
        let plan = FoldPlan::new(self.task, y, self.folds, self.seed);
        let mut oof = Array2::<f64>::zeros((n, self.base.len()));

        for (f, fold) in plan.folds.iter().enumerate() {
            let x_train = x.select(Axis(0), &fold.train);
            let y_train = y.select(Axis(0), &fold.train);
            let x_test = x.select(Axis(0), &fold.test);

            let columns: Vec<Result<Array1<f64>>> = self
                .base
                .par_iter()
                .map(|base| {
                    let mut copy = base.clone_unfitted();
                    copy.fit(&x_train, &y_train)?;
                    self.feature_column(copy.as_ref(), &x_test)
                })
                .collect();

            for (j, column) in columns.into_iter().enumerate() {
                let column = column.map_err(|e| self.base_failure(j, e))?;
                for (&row, &value) in fold.test.iter().zip(column.iter()) {
                    oof[[row, j]] = value;
                }
            }
            debug!(fold = f, rows = fold.test.len(), "out-of-fold predictions filled");
        }

        let refits: Vec<Result<Metrics>> = self
            .base
            .par_iter_mut()
            .map(|base| base.fit(x, y))
            .collect();
        for (j, refit) in refits.into_iter().enumerate() {
            refit.map_err(|e| self.base_failure(j, e))?;
        }

        self.meta.fit(&oof, y)?;
        self.assignment = plan.assignment(n);
        self.oof = Some(oof);
        self.fitted = true;
        training_metrics(self, self.task, x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if !self.fitted {
            return Err(MlError::not_fitted("stacking ensemble"));
        }
        self.meta.predict(&self.meta_features(x)?)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.fitted {
            return Err(MlError::not_fitted("stacking ensemble"));
        }
        self.meta.predict_proba(&self.meta_features(x)?)
    }

    fn classes(&self) -> Option<&ClassIndex> {
        self.meta.classes()
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn clone_unfitted(&self) -> Box<dyn Model> {
        let base = self.base.iter().map(|m| m.clone_unfitted()).collect();
        let meta = self.meta.clone_unfitted();
        Box::new(
            StackingEnsemble::new(base, meta, self.task, self.folds, self.seed)
                .with_features(self.features),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::forest::{ForestParams, RandomForest};
    use crate::algorithms::linear::{LinearModel, LinearParams};
    use crate::ensemble::testing::Constant;
    use ndarray::array;

    fn regression_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| ((i * (j + 1)) % 11) as f64);
        let y = x.column(0).mapv(|v| 3.0 * v) + &x.column(1);
        (x, y)
    }

    #[test]
    fn test_oof_matrix_shape_and_assignment() {
        let (x, y) = regression_data();
        let mut stack = StackingEnsemble::new(
            vec![
                Box::new(LinearModel::new(LinearParams::default(), TaskType::Regression)),
                Box::new(Constant::new(7.0)),
            ],
            Box::new(LinearModel::new(LinearParams::default(), TaskType::Regression)),
            TaskType::Regression,
            4,
            3,
        );
        let metrics = stack.fit(&x, &y).unwrap();
        assert!(metrics.get("r2").unwrap() > 0.9);
        let oof = stack.oof_matrix().unwrap();
        assert_eq!(oof.dim(), (40, 2));
        assert!(oof.column(1).iter().all(|&v| v == 7.0));
        assert_eq!(stack.fold_assignment().len(), 40);
        assert!(stack.fold_assignment().iter().all(|&f| f < 4));
        assert!(stack.base_models().iter().all(|m| m.is_fitted()));
        assert_eq!(stack.predict(&x.slice(ndarray::s![..5, ..]).to_owned()).unwrap().len(), 5);
    }

    #[test]
    fn test_binary_classification_uses_positive_probability() {
        let x = Array2::from_shape_fn((30, 1), |(i, _)| i as f64);
        let y = x.column(0).mapv(|v| if v >= 15.0 { 1.0 } else { 0.0 });
        let forest = RandomForest::new(
            ForestParams {
                n_estimators: 10,
                ..ForestParams::default()
            },
            TaskType::Classification,
            1,
        );
        let mut stack = StackingEnsemble::new(
            vec![Box::new(forest)],
            Box::new(LinearModel::new(LinearParams::default(), TaskType::Classification)),
            TaskType::Classification,
            3,
            0,
        );
        stack.fit(&x, &y).unwrap();
        let oof = stack.oof_matrix().unwrap();
        assert!(oof.iter().all(|&p| (0.0..=1.0).contains(&p)));
        assert_eq!(stack.classes().unwrap().labels(), &[0.0, 1.0]);
        assert_eq!(stack.predict_proba(&x).unwrap().ncols(), 2);
    }

    #[test]
    fn test_base_failure_is_reported_with_index() {
        let (x, y) = regression_data();
        let mut stack = StackingEnsemble::new(
            vec![Box::new(Constant::new(1.0)), Box::new(Constant::failing())],
            Box::new(Constant::new(0.0)),
            TaskType::Regression,
            3,
            0,
        );
        match stack.fit(&x, &y) {
            Err(MlError::BaseModelFit { index, name, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(name, "failing");
            }
            other => panic!("expected BaseModelFit, got {other:?}"),
        }
        assert!(stack.oof_matrix().is_none());
        assert!(matches!(stack.predict(&array![[0.0, 0.0]]), Err(MlError::NotFitted(_))));
    }
}
