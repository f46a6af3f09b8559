//! Performance benchmarks for epoch-end output handling.
//!
//! Tracks the cost of retaining and collapsing step outputs as epochs grow,
//! and the per-batch overhead of the epoch loop itself.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vuelta::train::{
    CollapseMode, EpochEndAggregator, EpochOutput, FitLoop, ModelHooks, StepResult,
    SyntheticBatchLoop, SyntheticConfig, Trainer, TrainerConfig,
};

fn batch_outputs(optimizers: usize, splits: usize, loss: f32) -> Vec<Vec<StepResult>> {
    (0..optimizers)
        .map(|_| (0..splits).map(|_| StepResult::new(loss).with_extra("acc", 0.5)).collect())
        .collect()
}

/// Benchmark EpochEndAggregator::track plus the epoch collapse
fn bench_epoch_collapse(c: &mut Criterion) {
    let mut group = c.benchmark_group("EpochCollapse");

    for batches in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*batches as u64));
        group.bench_with_input(BenchmarkId::new("track_collapse", batches), batches, |b, &n| {
            let aggregator = EpochEndAggregator::new(true);
            let outputs = batch_outputs(2, 2, 1.0);
            b.iter(|| {
                let mut epoch = EpochOutput::new(2);
                for _ in 0..n {
                    aggregator.track(&mut epoch, &outputs);
                }
                black_box(epoch.into_tree().collapse(CollapseMode::Epoch))
            });
        });
    }
    group.finish();
}

/// Benchmark a full epoch against the synthetic batch loop
fn bench_epoch_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("EpochLoop");

    for batches in [100, 1_000].iter() {
        group.throughput(Throughput::Elements(*batches as u64));
        group.bench_with_input(BenchmarkId::new("fit_one_epoch", batches), batches, |b, &n| {
            b.iter(|| {
                let model = ModelHooks::<usize>::new().with_training_epoch_end(|_| Ok(None));
                let mut trainer = Trainer::new(TrainerConfig::new().with_max_epochs(1), model);
                let config = SyntheticConfig {
                    batches_per_epoch: n,
                    ..SyntheticConfig::default()
                };
                let mut fit_loop: FitLoop<usize> =
                    FitLoop::new(Box::new(SyntheticBatchLoop::new(config)));
                black_box(fit_loop.fit(&mut trainer, move |_| 0..n).unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_epoch_collapse, bench_epoch_loop);
criterion_main!(benches);
