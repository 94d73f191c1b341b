use criterion::{Criterion, black_box, criterion_group, criterion_main};
use modelsmith_ml::data::FoldPlan;
use modelsmith_ml::{
    CandidateEvaluator, Dataset, Family, HyperParams, Metric, ModelRegistry, TaskType,
};
use ndarray::{Array1, Array2};

fn regression_dataset(n: usize, d: usize) -> Dataset {
    let x = Array2::from_shape_fn((n, d), |(i, j)| ((i * 31 + j * 17) % 101) as f64 / 10.0);
    let y: Array1<f64> = x
        .rows()
        .into_iter()
        .map(|row| 2.0 * row[0] - row[1] + 0.5 * row[d - 1])
        .collect();
    Dataset::new(x, y, TaskType::Regression).expect("valid dataset")
}

fn bench_fold_plan(c: &mut Criterion) {
    let y = Array1::from_iter((0..5000).map(|i| (i % 3) as f64));
    c.bench_function("fold_plan_stratified_5000", |b| {
        b.iter(|| FoldPlan::new(TaskType::Classification, black_box(&y), 5, 42))
    });
}

fn bench_candidate_evaluation(c: &mut Criterion) {
    let dataset = regression_dataset(400, 8);
    let evaluator =
        CandidateEvaluator::new(ModelRegistry::detect(), TaskType::Regression, Metric::Auto, 5, 7)
            .expect("valid evaluator");
    let defaults = HyperParams::new();

    for family in [Family::Linear, Family::RandomForest, Family::SupportVector] {
        c.bench_function(&format!("evaluate_{}_400x8", family.tag()), |b| {
            b.iter(|| evaluator.evaluate(black_box(family), &defaults, &dataset))
        });
    }
}

criterion_group!(benches, bench_fold_plan, bench_candidate_evaluation);
criterion_main!(benches);
