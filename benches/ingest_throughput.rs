//! Collation ingest benchmark
//!
//! Measures the cost of folding events into the live table, both for a
//! single operation lifecycle and for many interleaved operations.
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench ingest_throughput
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gwtmetrics::collator::CollationEngine;
use gwtmetrics::config::CollatorConfig;
use gwtmetrics::event::RawEvent;
use gwtmetrics::sink::NoopSink;

const PHASES: [&str; 6] = [
    "begin",
    "requestSerialized",
    "requestSent",
    "responseReceived",
    "responseDeserialized",
    "end",
];

fn lifecycle(group: usize) -> Vec<RawEvent> {
    PHASES
        .iter()
        .enumerate()
        .map(|(i, phase)| {
            RawEvent::new(
                "rpc",
                group.to_string(),
                Some("GreetingService_Proxy.greetServer"),
                1_000 + (i as i64) * 10,
                *phase,
            )
        })
        .collect()
}

fn bench_single_lifecycle(c: &mut Criterion) {
    let events = lifecycle(1);
    c.bench_function("ingest_rpc_lifecycle", |b| {
        let mut engine = CollationEngine::new(&CollatorConfig::default(), Box::new(NoopSink));
        b.iter(|| {
            for event in &events {
                black_box(engine.ingest(black_box(event)));
            }
        });
    });
}

fn bench_interleaved(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest_interleaved");

    for &operations in &[10usize, 100, 1_000] {
        // phase-major order keeps every operation open until its last phase
        let per_op: Vec<Vec<RawEvent>> = (0..operations).map(lifecycle).collect();
        let events: Vec<RawEvent> = (0..PHASES.len())
            .flat_map(|phase| per_op.iter().map(move |op| op[phase].clone()))
            .collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(operations),
            &events,
            |b, events| {
                let mut engine =
                    CollationEngine::new(&CollatorConfig::default(), Box::new(NoopSink));
                b.iter(|| {
                    for event in events {
                        engine.ingest(event);
                    }
                    black_box(engine.live_count())
                });
            },
        );
    }

    group.finish();
}

fn bench_sweep(c: &mut Criterion) {
    c.bench_function("sweep_1000_expired", |b| {
        b.iter_batched(
            || {
                let mut engine =
                    CollationEngine::new(&CollatorConfig::default(), Box::new(NoopSink));
                for group in 0..1_000 {
                    engine.ingest(&lifecycle(group)[0]);
                }
                engine
            },
            |mut engine| black_box(engine.sweep(1_000_000)),
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_single_lifecycle, bench_interleaved, bench_sweep);
criterion_main!(benches);
