//! Property-based tests for fold planning and sampling using proptest.

use proptest::prelude::*;

use modelsmith_ml::data::folds::effective_folds;
use modelsmith_ml::data::{FoldPlan, holdout_split};
use modelsmith_ml::registry::Family;
use modelsmith_ml::search::{FamilySpace, Trial, TrialStatus};
use modelsmith_ml::{PENALTY_SCORE, TaskType};
use ndarray::Array1;

fn family_strategy() -> impl Strategy<Value = Family> {
    prop::sample::select(Family::ALL.to_vec())
}

fn task_strategy() -> impl Strategy<Value = TaskType> {
    prop_oneof![Just(TaskType::Regression), Just(TaskType::Classification)]
}

fn check_partition(plan: &FoldPlan, n: usize) -> Result<(), TestCaseError> {
    let mut seen = vec![0usize; n];
    for fold in &plan.folds {
        prop_assert!(!fold.test.is_empty());
        prop_assert_eq!(fold.train.len() + fold.test.len(), n);
        for &row in &fold.test {
            seen[row] += 1;
            prop_assert!(!fold.train.contains(&row));
        }
    }
    prop_assert!(seen.iter().all(|&c| c == 1), "rows not covered exactly once: {:?}", seen);
    Ok(())
}

// --- Fold planning properties ---

proptest! {
    #[test]
    fn regression_folds_partition_rows(n in 2usize..120, k in 2usize..12, seed in any::<u64>()) {
        let y = Array1::from_iter((0..n).map(|i| i as f64 * 0.5));
        let plan = FoldPlan::new(TaskType::Regression, &y, k, seed);
        prop_assert_eq!(plan.k(), effective_folds(n, k));
        check_partition(&plan, n)?;
    }

    #[test]
    fn classification_folds_partition_rows(
        labels in prop::collection::vec(0u8..4, 2..150),
        k in 2usize..8,
        seed in any::<u64>(),
    ) {
        let n = labels.len();
        let y = Array1::from_iter(labels.iter().map(|&l| l as f64));
        let plan = FoldPlan::new(TaskType::Classification, &y, k, seed);
        check_partition(&plan, n)?;
    }

    #[test]
    fn fold_plan_is_seeded(n in 4usize..80, seed in any::<u64>()) {
        let y = Array1::from_iter((0..n).map(|i| (i % 3) as f64));
        let a = FoldPlan::new(TaskType::Classification, &y, 3, seed);
        let b = FoldPlan::new(TaskType::Classification, &y, 3, seed);
        prop_assert_eq!(a.folds, b.folds);
    }

    #[test]
    fn holdout_split_is_disjoint(
        n in 2usize..100,
        fraction in 0.05f64..0.95,
        seed in any::<u64>(),
    ) {
        let y = Array1::from_iter((0..n).map(|i| (i % 2) as f64));
        let split = holdout_split(TaskType::Classification, &y, fraction, seed);
        if let Some((train, holdout)) = split {
            prop_assert_eq!(train.len() + holdout.len(), n);
            prop_assert!(holdout.iter().all(|row| !train.contains(row)));
        }
    }
}

// --- Sampling properties ---

#[cfg(feature = "search")]
mod sampling {
    use super::*;
    use modelsmith_ml::config::TpeSettings;
    use modelsmith_ml::search::{RandomSampler, Sampler, TpeSampler};

    fn history(space: &FamilySpace, seed: u64, n: usize) -> Vec<Trial> {
        let mut random = RandomSampler::new(seed);
        (0..n)
            .map(|index| {
                let params = random.sample_params(space, &[]);
                let penalized = index % 5 == 4;
                let score = if penalized {
                    PENALTY_SCORE
                } else {
                    ((index * 7919) % 97) as f64 / 10.0
                };
                Trial {
                    index,
                    family: space.family,
                    params,
                    score,
                    raw_score: (!penalized).then_some(score),
                    status: if penalized { TrialStatus::Penalized } else { TrialStatus::Complete },
                    fold_scores: vec![score],
                    elapsed_ms: 1,
                    failure: None,
                }
            })
            .collect()
    }

    proptest! {
        #[test]
        fn random_params_stay_in_bounds(
            family in family_strategy(),
            task in task_strategy(),
            seed in any::<u64>(),
        ) {
            let space = FamilySpace::for_family(family, task);
            let mut sampler = RandomSampler::new(seed);
            for _ in 0..10 {
                let params = sampler.sample_params(&space, &[]);
                prop_assert_eq!(params.len(), space.params.len());
                prop_assert!(space.contains(&params), "out of bounds: {:?}", params);
            }
        }

        #[test]
        fn tpe_params_stay_in_bounds(
            family in family_strategy(),
            task in task_strategy(),
            seed in any::<u64>(),
            n_history in 0usize..40,
        ) {
            let space = FamilySpace::for_family(family, task);
            let trials = history(&space, seed ^ 0xABCD, n_history);
            let settings = TpeSettings { n_startup_trials: 5, ..TpeSettings::default() };
            let mut sampler = TpeSampler::new(seed, settings);
            for _ in 0..5 {
                let params = sampler.sample_params(&space, &trials);
                prop_assert_eq!(params.len(), space.params.len());
                prop_assert!(space.contains(&params), "out of bounds: {:?}", params);
            }
        }
    }
}
