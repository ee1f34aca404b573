//! Spawn and dispatch throughput.

use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use switchyard::config::SchedConfig;
use switchyard::runtime::Scheduler;

fn bench_config() -> SchedConfig {
    let mut cfg = SchedConfig::default();
    cfg.stack_size = 32 * 1024;
    cfg
}

fn spawn_wave(c: &mut Criterion) {
    let sched = Scheduler::new(bench_config()).expect("scheduler");
    c.bench_function("spawn_wave_256", |b| {
        b.iter(|| {
            let done = Arc::new(AtomicUsize::new(0));
            for _ in 0..256 {
                let done = Arc::clone(&done);
                sched
                    .spawn(move || {
                        done.fetch_add(1, Ordering::Relaxed);
                    })
                    .expect("spawn");
            }
            while done.load(Ordering::Relaxed) < 256 {
                std::hint::spin_loop();
            }
        });
    });
    sched.shutdown();
}

fn yield_storm(c: &mut Criterion) {
    let sched = Scheduler::new(bench_config()).expect("scheduler");
    c.bench_function("yield_storm_8x64", |b| {
        b.iter(|| {
            let done = Arc::new(AtomicUsize::new(0));
            for _ in 0..8 {
                let done = Arc::clone(&done);
                sched
                    .spawn(move || {
                        for _ in 0..64 {
                            switchyard::task::yield_now();
                        }
                        done.fetch_add(1, Ordering::Relaxed);
                    })
                    .expect("spawn");
            }
            while done.load(Ordering::Relaxed) < 8 {
                std::hint::spin_loop();
            }
        });
    });
    sched.shutdown();
}

criterion_group!(benches, spawn_wave, yield_storm);
criterion_main!(benches);
