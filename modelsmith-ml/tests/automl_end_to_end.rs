#![cfg(feature = "search")]

use modelsmith_ml::search::{RandomSampler, SearchEngine, SearchSpace, TrialStatus};
use modelsmith_ml::{
    AutoMl, AutoMlOptions, CandidateEvaluator, Dataset, Evaluation, Family, HyperParams,
    Metric, Metrics, MlError, Model, ModelFactory, ModelRegistry, PENALTY_SCORE, ParamValue,
    SamplerKind, StackingEnsemble, TaskType, VotingEnsemble, VotingMode, available_families,
    hyper_params,
};
use ndarray::{Array1, Array2, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn regression_data(n: usize, d: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = Array2::from_shape_fn((n, d), |_| rng.gen_range(-2.0..2.0));
    let y = x
        .rows()
        .into_iter()
        .map(|row| 3.0 * row[0] - 2.0 * row[1] + row[2] * row[3] + rng.gen_range(-0.1..0.1))
        .collect();
    (x, y)
}

fn binary_data(n: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = Array2::from_shape_fn((n, 4), |_| rng.gen_range(-1.0..1.0));
    let y = x
        .rows()
        .into_iter()
        .map(|row| if row[0] + 0.5 * row[1] > 0.0 { 1.0 } else { 0.0 })
        .collect();
    (x, y)
}

#[test]
fn end_to_end_regression() {
    let (x, y) = regression_data(200, 8, 7);
    let options = AutoMlOptions::new(TaskType::Regression)
        .with_n_trials(20)
        .with_cv_folds(5)
        .with_seed(11);
    let mut automl = AutoMl::new(options).unwrap();
    let metrics = automl.fit(&x, &y).unwrap();

    assert!(metrics.contains("rmse"));
    assert!(metrics.contains("r2"));
    let best = automl.best_params().unwrap();
    assert!(available_families().contains(&best.family));
    assert!(!best.fallback);

    let outcome = automl.search_outcome().unwrap();
    assert_eq!(outcome.log.len(), 20);
    assert!(outcome.log.trials().iter().all(|t| t.score.is_finite()));

    let preds = automl.predict(&x.slice(s![..10, ..]).to_owned()).unwrap();
    assert_eq!(preds.len(), 10);
}

#[test]
fn end_to_end_binary_classification() {
    let (x, y) = binary_data(120, 3);
    let options = AutoMlOptions::new(TaskType::Classification)
        .with_model_types([Family::RandomForest, Family::Linear])
        .with_metric(Metric::Auc)
        .with_n_trials(6)
        .with_cv_folds(3);
    let mut automl = AutoMl::new(options).unwrap();
    let metrics = automl.fit(&x, &y).unwrap();

    for key in ["accuracy", "precision", "recall", "f1", "auc"] {
        assert!(metrics.contains(key), "missing {key}");
    }
    assert!(metrics.get("accuracy").unwrap() > 0.7);
    let proba = automl.predict_proba(&x).unwrap();
    assert_eq!(proba.dim(), (120, 2));
    for row in proba.rows() {
        assert!((row.sum() - 1.0).abs() < 1e-9);
    }
    // auc is maximized, so the stored score is its negation
    assert!(automl.best_params().unwrap().score.unwrap() < 0.0);
}

#[test]
fn same_seed_same_search() {
    let (x, y) = regression_data(80, 4, 1);
    let run = |sampler| {
        let options = AutoMlOptions::new(TaskType::Regression)
            .with_model_types([Family::RandomForest, Family::Linear, Family::SupportVector])
            .with_n_trials(14)
            .with_cv_folds(3)
            .with_sampler(sampler)
            .with_seed(99);
        let mut automl = AutoMl::new(options).unwrap();
        automl.fit(&x, &y).unwrap();
        let outcome = automl.search_outcome().unwrap().clone();
        let best = automl.best_params().unwrap().clone();
        let preds = automl.predict(&x).unwrap();
        (outcome, best, preds)
    };
    for sampler in [SamplerKind::Random, SamplerKind::Tpe] {
        let (a, best_a, preds_a) = run(sampler);
        let (b, best_b, preds_b) = run(sampler);
        assert_eq!(a.log.sampled(), b.log.sampled());
        assert_eq!(a.best.index, b.best.index);
        assert_eq!(best_a, best_b);
        assert_eq!(preds_a, preds_b);
    }
}

#[test]
fn single_family_collapses_search() {
    let (x, y) = regression_data(60, 4, 4);
    let options = AutoMlOptions::new(TaskType::Regression)
        .with_model_types([Family::Linear])
        .with_n_trials(8)
        .with_cv_folds(3);
    let mut automl = AutoMl::new(options).unwrap();
    automl.fit(&x, &y).unwrap();
    let outcome = automl.search_outcome().unwrap();
    assert!(outcome.log.trials().iter().all(|t| t.family == Family::Linear));
    assert_eq!(automl.best_params().unwrap().family, Family::Linear);
}

#[test]
fn evaluator_never_raises_on_invalid_params() {
    let (x, y) = regression_data(10, 4, 5);
    let dataset = Dataset::new(x, y, TaskType::Regression).unwrap();
    let evaluator =
        CandidateEvaluator::new(ModelRegistry::detect(), TaskType::Regression, Metric::Auto, 5, 0)
            .unwrap();
    let params = hyper_params([("n_estimators", ParamValue::Int(-5))]);
    let eval = evaluator.evaluate(Family::RandomForest, &params, &dataset);
    assert!(matches!(eval, Evaluation::Penalized { .. }));
    assert_eq!(eval.score(), PENALTY_SCORE);
}

/// Sleeps in `fit`, then predicts the training mean.
struct SlowModel {
    delay: Duration,
    mean: Option<f64>,
}

impl Model for SlowModel {
    fn name(&self) -> &str {
        "slow"
    }

    fn fit(&mut self, _x: &Array2<f64>, y: &Array1<f64>) -> modelsmith_ml::Result<Metrics> {
        std::thread::sleep(self.delay);
        self.mean = y.mean();
        Ok(Metrics::default())
    }

    fn predict(&self, x: &Array2<f64>) -> modelsmith_ml::Result<Array1<f64>> {
        let mean = self.mean.ok_or_else(|| MlError::not_fitted("slow"))?;
        Ok(Array1::from_elem(x.nrows(), mean))
    }

    fn is_fitted(&self) -> bool {
        self.mean.is_some()
    }

    fn clone_unfitted(&self) -> Box<dyn Model> {
        Box::new(SlowModel {
            delay: self.delay,
            mean: None,
        })
    }
}

struct SlowFactory(Duration);

impl ModelFactory for SlowFactory {
    fn construct(
        &self,
        _: Family,
        _: &HyperParams,
        _: TaskType,
        _: u64,
    ) -> modelsmith_ml::Result<Box<dyn Model>> {
        Ok(Box::new(SlowModel {
            delay: self.0,
            mean: None,
        }))
    }
}

#[test]
fn timeout_stops_search_within_grace() {
    let (x, y) = regression_data(30, 4, 8);
    let dataset = Dataset::new(x, y, TaskType::Regression).unwrap();
    let evaluator = CandidateEvaluator::with_factory(
        Arc::new(SlowFactory(Duration::from_millis(40))),
        TaskType::Regression,
        Metric::Rmse,
        2,
        0,
    )
    .unwrap();
    let registry = ModelRegistry::with_families([Family::Linear]).unwrap();
    let space = SearchSpace::for_registry(&registry, TaskType::Regression);
    let timeout = Duration::from_millis(200);

    let started = Instant::now();
    let outcome = SearchEngine::new(evaluator, Box::new(RandomSampler::new(0)), 1000)
        .with_timeout(Some(timeout))
        .run(&space, &dataset)
        .unwrap();
    let elapsed = started.elapsed();

    assert!(outcome.timed_out);
    assert!(outcome.log.len() < 1000);
    assert!(!outcome.log.is_empty());
    assert!(elapsed < timeout + Duration::from_secs(2), "took {elapsed:?}");
    assert!(outcome.log.trials().iter().all(|t| t.status == TrialStatus::Complete));
}

/// Predicts 1.0 for rows it was trained on and 0.0 otherwise. Column 0 of
/// the feature matrix carries a unique row id.
#[derive(Default)]
struct ProbeModel {
    seen: Option<BTreeSet<u64>>,
}

impl Model for ProbeModel {
    fn name(&self) -> &str {
        "probe"
    }

    fn fit(&mut self, x: &Array2<f64>, _y: &Array1<f64>) -> modelsmith_ml::Result<Metrics> {
        self.seen = Some(x.column(0).iter().map(|v| *v as u64).collect());
        Ok(Metrics::default())
    }

    fn predict(&self, x: &Array2<f64>) -> modelsmith_ml::Result<Array1<f64>> {
        let seen = self.seen.as_ref().ok_or_else(|| MlError::not_fitted("probe"))?;
        Ok(x.column(0).mapv(|v| if seen.contains(&(v as u64)) { 1.0 } else { 0.0 }))
    }

    fn is_fitted(&self) -> bool {
        self.seen.is_some()
    }

    fn clone_unfitted(&self) -> Box<dyn Model> {
        Box::new(ProbeModel::default())
    }
}

#[test]
fn stacking_oof_never_leaks() {
    let n = 50;
    let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 7) as f64 });
    let y = Array1::from_iter((0..n).map(|i| (i % 5) as f64));
    let registry = ModelRegistry::detect();
    let meta = registry.construct_default(Family::Linear, TaskType::Regression, 0).unwrap();
    let mut stack = StackingEnsemble::new(
        vec![Box::new(ProbeModel::default()), Box::new(ProbeModel::default())],
        meta,
        TaskType::Regression,
        5,
        17,
    );
    stack.fit(&x, &y).unwrap();

    let oof = stack.oof_matrix().unwrap();
    assert_eq!(oof.dim(), (n, 2));
    assert!(oof.iter().all(|&v| v == 0.0), "a base model saw a row it predicted");
    // the refit bases saw every row
    let full = stack.base_models()[0].predict(&x).unwrap();
    assert!(full.iter().all(|&v| v == 1.0));
    let folds: BTreeSet<usize> = stack.fold_assignment().iter().copied().collect();
    assert_eq!(folds.len(), 5);
}

/// Predicts one fixed value.
struct Fixed(f64, bool);

impl Model for Fixed {
    fn name(&self) -> &str {
        "fixed"
    }

    fn fit(&mut self, _x: &Array2<f64>, _y: &Array1<f64>) -> modelsmith_ml::Result<Metrics> {
        self.1 = true;
        Ok(Metrics::default())
    }

    fn predict(&self, x: &Array2<f64>) -> modelsmith_ml::Result<Array1<f64>> {
        Ok(Array1::from_elem(x.nrows(), self.0))
    }

    fn is_fitted(&self) -> bool {
        self.1
    }

    fn clone_unfitted(&self) -> Box<dyn Model> {
        Box::new(Fixed(self.0, false))
    }
}

#[test]
fn voting_regression_mean() {
    let x = Array2::zeros((4, 1));
    let y = Array1::from(vec![0.5, 1.5, 2.5, 3.5]);
    let mut voting = VotingEnsemble::new(
        vec![Box::new(Fixed(1.0, false)), Box::new(Fixed(3.0, false))],
        TaskType::Regression,
        VotingMode::Hard,
    );
    voting.fit(&x, &y).unwrap();
    assert_eq!(voting.predict(&Array2::zeros((3, 1))).unwrap(), Array1::from(vec![2.0; 3]));
}

#[test]
fn voting_over_searched_models() {
    let (x, y) = binary_data(80, 9);
    let registry = ModelRegistry::detect();
    let members: Vec<Box<dyn Model>> = [Family::RandomForest, Family::Linear]
        .into_iter()
        .map(|f| registry.construct_default(f, TaskType::Classification, 1).unwrap())
        .collect();
    let mut voting = VotingEnsemble::new(members, TaskType::Classification, VotingMode::Soft);
    let metrics = voting.fit(&x, &y).unwrap();
    assert!(metrics.get("accuracy").unwrap() > 0.8);
    assert!(voting.excluded().is_empty());
}
