use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use healthpulse::clock::ManualClock;
use healthpulse::inactivity::{InactivityMonitor, InactivityThresholds};
use healthpulse::ledger::{PointRates, ScoreLedger};
use healthpulse::models::{
    MetricKind, MetricReading, MotionSample, ReadingSet, ScoreCategory, Vector3,
};
use healthpulse::remote::InMemoryBalanceStore;
use healthpulse::store::{MemoryStore, SqliteStore};
use healthpulse::zones::{ZoneAlertEvaluator, ZoneThresholds};
use std::sync::Arc;

/// Benchmarks for the per-tick hot paths: zone classification, motion
/// sample handling and ledger updates.

fn heart_rate_series(len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| 50.0 + ((i as f64) * 0.37).sin().abs() * 120.0)
        .collect()
}

fn bench_zone_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Zone Evaluation");
    let thresholds = ZoneThresholds::default();
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();

    for &size in &[100, 1_000, 10_000] {
        let series = heart_rate_series(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("classify", size), &series, |b, series| {
            b.iter(|| {
                for &bpm in series {
                    black_box(thresholds.classify(bpm));
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("observe", size), &series, |b, series| {
            b.iter(|| {
                let mut evaluator = ZoneAlertEvaluator::new(thresholds, Duration::seconds(90));
                for (i, &bpm) in series.iter().enumerate() {
                    let at = start + Duration::seconds(i as i64 * 15);
                    black_box(evaluator.observe(bpm, at));
                    evaluator.expire_alarm(at);
                }
            });
        });
    }

    group.finish();
}

fn bench_motion_samples(c: &mut Criterion) {
    let mut group = c.benchmark_group("Motion Samples");
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
    let samples: Vec<MotionSample> = (0..10_000)
        .map(|i| {
            let moving = i % 97 == 0;
            let vector = if moving {
                Vector3::new(0.9, 0.4, 0.2)
            } else {
                Vector3::new(0.01, 0.02, 0.0)
            };
            MotionSample::new(vector, start + Duration::milliseconds(i * 100))
        })
        .collect();

    group.throughput(Throughput::Elements(samples.len() as u64));
    group.bench_function("angular_with_checks", |b| {
        b.iter(|| {
            let mut monitor = InactivityMonitor::new(InactivityThresholds::default(), start);
            for (i, sample) in samples.iter().enumerate() {
                monitor.on_angular_sample(sample);
                if i % 600 == 0 {
                    black_box(monitor.check(sample.timestamp));
                }
            }
        });
    });

    group.finish();
}

fn bench_ledger_updates(c: &mut Criterion) {
    use tempfile::TempDir;

    let mut group = c.benchmark_group("Ledger Updates");
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
    ));

    let ledger = ScoreLedger::open(
        Box::new(MemoryStore::new()),
        Arc::new(InMemoryBalanceStore::new()),
        clock.clone(),
        PointRates::default(),
    )
    .unwrap();
    group.bench_function("add_points_memory", |b| {
        b.iter(|| black_box(ledger.add_points(ScoreCategory::Water, 1)));
    });

    let set = ReadingSet {
        tick: 1,
        readings: vec![
            MetricReading::sampled(MetricKind::Steps, 8_450.0, clock_now()),
            MetricReading::sampled(MetricKind::Calories, 312.0, clock_now()),
            MetricReading::sampled(MetricKind::HeartRate, 74.0, clock_now()),
            MetricReading::sampled(MetricKind::Distance, 6_120.0, clock_now()),
            MetricReading::fallback(MetricKind::Water, clock_now()),
        ],
    };
    group.bench_function("apply_readings_memory", |b| {
        b.iter(|| ledger.apply_readings(black_box(&set)));
    });

    group.bench_function("add_points_sqlite", |b| {
        b.iter_batched(
            || {
                let temp_dir = TempDir::new().unwrap();
                let store = SqliteStore::open(temp_dir.path().join("bench.db")).unwrap();
                let ledger = ScoreLedger::open(
                    Box::new(store),
                    Arc::new(InMemoryBalanceStore::new()),
                    clock.clone(),
                    PointRates::default(),
                )
                .unwrap();
                (ledger, temp_dir)
            },
            |(ledger, _temp_dir)| {
                for _ in 0..100 {
                    ledger.add_points(ScoreCategory::Steps, 1);
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn clock_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

criterion_group!(
    benches,
    bench_zone_evaluation,
    bench_motion_samples,
    bench_ledger_updates
);

criterion_main!(benches);
