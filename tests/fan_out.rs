#![allow(missing_docs)]
//! Fan-out/fan-in: a large burst of short tasks is fully consumed, nothing
//! leaks, and the scheduler returns to quiescence.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use switchyard::config::SchedConfig;
use switchyard::runtime::Scheduler;

const TASKS: usize = 10_000;

fn small_stack_config() -> SchedConfig {
    let mut cfg = SchedConfig::default();
    cfg.stack_size = 32 * 1024;
    cfg
}

#[test]
fn ten_thousand_tasks_fan_in() {
    common::init_test_logging();
    let sched = Scheduler::new(small_stack_config()).expect("scheduler");

    let sum = Arc::new(AtomicUsize::new(0));
    for _ in 0..TASKS {
        let sum = Arc::clone(&sum);
        sched
            .spawn(move || {
                sum.fetch_add(1, Ordering::Relaxed);
            })
            .expect("spawn");
    }

    common::wait_until("all tasks to run", Duration::from_secs(60), || {
        sum.load(Ordering::Relaxed) == TASKS
    });
    assert_eq!(sum.load(Ordering::Relaxed), TASKS);

    // Zero leaks: every task record retired, every queue drained, every
    // context back on the idle list.
    common::wait_quiescent(&sched, Duration::from_secs(10));
    common::wait_until("contexts to idle", Duration::from_secs(10), || {
        let snap = sched.snapshot();
        snap.idle_contexts == snap.contexts
    });

    sched.shutdown();
}

#[test]
fn tasks_spawning_tasks() {
    common::init_test_logging();
    let sched = Scheduler::new(small_stack_config()).expect("scheduler");

    // Each root task fans out children from inside the runtime, exercising
    // the local (next-slot) spawn path rather than the external one.
    let sum = Arc::new(AtomicUsize::new(0));
    for _ in 0..64 {
        let sum = Arc::clone(&sum);
        let inner = switchyard::task::current_scheduler();
        assert!(inner.is_none(), "test thread is not a task");
        let handle = Arc::clone(&sum);
        sched
            .spawn(move || {
                let sched = switchyard::task::current_scheduler().expect("inside a task");
                for _ in 0..16 {
                    let handle = Arc::clone(&handle);
                    sched
                        .spawn(move || {
                            handle.fetch_add(1, Ordering::Relaxed);
                        })
                        .expect("nested spawn");
                }
            })
            .expect("spawn");
    }

    common::wait_until("children to finish", Duration::from_secs(60), || {
        sum.load(Ordering::Relaxed) == 64 * 16
    });
    common::wait_quiescent(&sched, Duration::from_secs(10));
    sched.shutdown();
}

#[test]
fn spawn_after_shutdown_is_refused() {
    common::init_test_logging();
    let sched = Scheduler::new(small_stack_config()).expect("scheduler");
    sched.shutdown();
    let err = sched.spawn(|| {}).unwrap_err();
    assert_eq!(err.kind(), switchyard::ErrorKind::ShuttingDown);
    // Idempotent.
    sched.shutdown();
}
