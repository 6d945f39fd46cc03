//! Benchmarks the recorder facade's call overhead against the default
//! no-op `metrics` recorder (no exporter installed), to keep the thin
//! wrapping layer itself from becoming measurable on the evaluation
//! hot path it sits on (spec §4.5 step 11).

use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use reaper_core::Effect;
use metrics::MetricsRecorder;

fn benchmark_record_evaluation(c: &mut Criterion) {
    let recorder = MetricsRecorder::new();
    c.bench_function("record_evaluation", |b| {
        b.iter(|| recorder.record_evaluation("forbid policy satisfied", Effect::Deny));
    });
}

fn benchmark_record_duration(c: &mut Criterion) {
    let recorder = MetricsRecorder::new();
    let elapsed = Duration::from_micros(250);
    c.bench_function("record_evaluate_duration", |b| {
        b.iter(|| recorder.record_evaluate_duration(elapsed));
    });
}

criterion_group!(benches, benchmark_record_evaluation, benchmark_record_duration);
criterion_main!(benches);
