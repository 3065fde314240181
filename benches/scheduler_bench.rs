//! Performance benchmarks for the stackweave clock and stacks.
//!
//! Run with: `cargo bench`
//! Or for specific bench: `cargo bench --bench scheduler_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use stackweave::clock::{Clock, ClockError, Simulator};
use stackweave::config::OrchestratorConfigBuilder;
use stackweave::event::{EventKind, EventQueue, EventTag};
use stackweave::orchestrator::Orchestrator;
use stackweave::types::SimTime;

// ============================================================================
// Event Queue Benchmarks
// ============================================================================

fn bench_event_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_queue");

    for num_events in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*num_events as u64));
        group.bench_with_input(
            BenchmarkId::new("push_pop", num_events),
            num_events,
            |b, &num_events| {
                b.iter(|| {
                    let mut queue = EventQueue::new();
                    // Reverse order with frequent ties
                    for i in (0..num_events as SimTime).rev() {
                        queue.push(i / 4, i);
                    }
                    while let Some(item) = queue.pop_next() {
                        black_box(item);
                    }
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// Clock Benchmarks
// ============================================================================

/// Reschedules itself `left` more times, like a traffic generator.
fn tick(clock: &mut dyn Clock, tag: EventTag, left: u64) -> Result<(), ClockError> {
    if left > 0 {
        let next = clock.now() + 1_000;
        clock.schedule(next, tag, Box::new(move |c| tick(c, tag, left - 1)))?;
    }
    Ok(())
}

fn bench_clock_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("clock_chain");

    for num_events in [1000, 10000, 100000].iter() {
        group.throughput(Throughput::Elements(*num_events as u64));
        group.bench_with_input(
            BenchmarkId::new("events", num_events),
            num_events,
            |b, &num_events| {
                b.iter(|| {
                    let mut sim = Simulator::new();
                    let tag = EventTag::new("bench", EventKind::PacketTx);
                    let n = num_events as u64;
                    sim.schedule(0, tag, Box::new(move |c| tick(c, tag, n - 1))).unwrap();
                    black_box(sim.run().unwrap());
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// Orchestration Benchmarks
// ============================================================================

fn bench_orchestrate_all_stacks(c: &mut Criterion) {
    let mut group = c.benchmark_group("orchestrate");
    group.sample_size(10);

    let dir = tempfile::tempdir().unwrap();
    let config = OrchestratorConfigBuilder::new()
        .thz(true)
        .mmwave(true)
        .sat(true)
        .duration(2.5)
        .log_root(dir.path())
        .build()
        .unwrap();
    let orchestrator = Orchestrator::new(config);

    group.bench_function("tri_stack_2_5s", |b| {
        b.iter(|| black_box(orchestrator.run().unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_event_queue,
    bench_clock_chain,
    bench_orchestrate_all_stacks,
);

criterion_main!(benches);
