//! Scheduler throughput benchmarks.
//!
//! - **Latch cycle:** one start/finish round trip through a parked worker
//!   pool with trivial jobs. This is the fixed per-frame cost of the
//!   scheduler.
//! - **Frame update:** a full `Engine::update` over 16 worlds of 1K
//!   entities each, across pool sizes.
//!
//! Run with: `cargo bench --bench scheduler_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use skein_engine::prelude::*;

// ---------------------------------------------------------------------------
// Benchmark component types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Position {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Velocity {
    dx: f64,
    dy: f64,
}

fn movement(data: &mut WorldData, delta: f32) -> anyhow::Result<()> {
    let position = data.context().component_index::<Position>();
    let velocity = data.context().component_index::<Velocity>();
    for entity in data.entities_mut() {
        let Some(v) = entity.get_at(velocity).cloned() else {
            continue;
        };
        if let Some(p) = entity.get_mut_at(position) {
            p.x += v.dx * f64::from(delta);
            p.y += v.dy * f64::from(delta);
        }
    }
    Ok(())
}

fn populated_engine(threading: Threading, worlds: usize, entities: usize) -> Engine {
    let engine = Engine::new(EngineConfig {
        threading,
        ..EngineConfig::default()
    })
    .unwrap();
    engine.start().unwrap();
    for w in 0..worlds {
        engine
            .create_world_and_flush(format!("world-{w}"), None, move |builder| {
                for i in 0..entities {
                    builder.create_entity(|e| {
                        e.add(Position {
                            x: i as f64,
                            y: 0.0,
                        })?;
                        e.add(Velocity { dx: 1.0, dy: 0.5 })
                    })?;
                }
                builder.add_system(FnSystem::new(movement))?;
                Ok(())
            })
            .unwrap();
    }
    engine
}

// ---------------------------------------------------------------------------
// Benchmark 1: latch cycle
// ---------------------------------------------------------------------------

fn bench_latch_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("latch_cycle");
    for workers in [1usize, 2, 4, 8] {
        let mut pool = WorkerPool::new(workers);
        pool.start().unwrap();
        let jobs: Vec<Job> = (0..workers)
            .map(|i| Job::new(format!("noop-{i}"), |delta| {
                black_box(delta);
                Ok(())
            }))
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(workers), &jobs, |b, jobs| {
            b.iter(|| pool.execute(jobs, 0.016).unwrap());
        });
        pool.shutdown().unwrap();
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark 2: full frame
// ---------------------------------------------------------------------------

fn bench_frame_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_update_16x1k");
    group.sample_size(30);
    let modes = [
        ("inline", Threading::Inline),
        ("workers-2", Threading::Workers(2)),
        ("workers-4", Threading::Workers(4)),
        ("workers-8", Threading::Workers(8)),
    ];
    for (label, threading) in modes {
        let engine = populated_engine(threading, 16, 1_000);
        group.bench_function(label, |b| {
            b.iter(|| engine.update(black_box(0.016)).unwrap());
        });
        engine.shutdown().unwrap();
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Criterion groups and main
// ---------------------------------------------------------------------------

criterion_group!(benches, bench_latch_cycle, bench_frame_update);
criterion_main!(benches);
