//! Generate a synthetic regression problem, run AutoML on it, then combine
//! a few default models with voting and stacking.
//!
//! ```text
//! cargo run -p modelsmith-ml --example quickstart
//! ```

use anyhow::Result;
use modelsmith_core::{LoggingOptions, init_tracing};
use modelsmith_ml::{
    AutoMl, AutoMlConfig, AutoMlOptions, Family, Metrics, Model, ModelRegistry, StackingEnsemble,
    TaskType, VotingEnsemble,
};
use ndarray::{Array1, Array2, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn synthetic(n: usize, d: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x: Array2<f64> = Array2::from_shape_fn((n, d), |_| rng.gen_range(-3.0..3.0));
    let y = x
        .rows()
        .into_iter()
        .map(|r| 1.5 * r[0] - 2.0 * r[1] + (r[2] * 1.3).sin() * 2.0 + rng.gen_range(-0.2..0.2))
        .collect();
    (x, y)
}

fn print_metrics(label: &str, metrics: &Metrics) {
    let line: Vec<String> = metrics.iter().map(|(k, v)| format!("{k}={v:.4}")).collect();
    println!("{label:<10} {}", line.join("  "));
}

fn main() -> Result<()> {
    let _guard = init_tracing(&LoggingOptions::default())?;

    let (x, y) = synthetic(300, 6, 2024);
    let x_train = x.slice(s![..240, ..]).to_owned();
    let y_train = y.slice(s![..240]).to_owned();
    let x_test = x.slice(s![240.., ..]).to_owned();
    let y_test = y.slice(s![240..]).to_owned();

    // Config files and MODELSMITH_* variables apply on top of the defaults.
    let cwd = std::env::current_dir()?;
    let config = AutoMlConfig::load(Some(cwd.as_path()))?;
    let options = AutoMlOptions::from_config(TaskType::Regression, &config)?.with_n_trials(25);
    let mut automl = AutoMl::new(options)?;
    let holdout = automl.fit(&x_train, &y_train)?;
    print_metrics("holdout", &holdout);

    let best = automl.best_params()?;
    println!("best family: {} (cv score {:?})", best.family, best.score);
    for (name, value) in &best.params {
        println!("  {name} = {value}");
    }
    if let Some(outcome) = automl.search_outcome() {
        println!(
            "{} trials, {} penalized, {} pruned in {:.2?}",
            outcome.log.len(),
            outcome.penalized(),
            outcome.pruned(),
            outcome.elapsed
        );
    }
    print_metrics("test", &Metrics::regression(&y_test, &automl.predict(&x_test)?));

    let registry = ModelRegistry::detect();
    let members = |seed: u64| -> Result<Vec<Box<dyn Model>>> {
        [Family::RandomForest, Family::Linear, Family::SupportVector]
            .into_iter()
            .map(|f| {
                registry
                    .construct_default(f, TaskType::Regression, seed)
                    .map_err(anyhow::Error::from)
            })
            .collect()
    };

    let mut voting =
        VotingEnsemble::new(members(1)?, TaskType::Regression, config.ensemble.voting_mode)
            .with_failure_policy(config.ensemble.failure_policy);
    voting.fit(&x_train, &y_train)?;
    print_metrics("voting", &Metrics::regression(&y_test, &voting.predict(&x_test)?));

    let meta = registry.construct_default(Family::Linear, TaskType::Regression, 0)?;
    let mut stacking = StackingEnsemble::new(
        members(2)?,
        meta,
        TaskType::Regression,
        config.ensemble.stacking_folds,
        config.search.seed,
    );
    stacking.fit(&x_train, &y_train)?;
    print_metrics("stacking", &Metrics::regression(&y_test, &stacking.predict(&x_test)?));

    if let Some(importances) = automl.feature_importances() {
        println!("feature importances: {importances:.3}");
    }
    Ok(())
}
