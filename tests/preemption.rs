#![allow(missing_docs)]
//! Cooperative preemption: a task in a tight loop (with preemption points)
//! is forced off its context by the monitor so a second task can run on a
//! single-context configuration.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use switchyard::config::SchedConfig;
use switchyard::runtime::Scheduler;
use switchyard::task;

#[test]
fn tight_loop_is_preempted_for_second_task() {
    common::init_test_logging();
    let mut cfg = SchedConfig::default();
    cfg.max_contexts = 1;
    cfg.stack_size = 32 * 1024;
    let sched = Scheduler::new(cfg).expect("scheduler");

    let started = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));

    {
        let started = Arc::clone(&started);
        let release = Arc::clone(&release);
        sched
            .spawn(move || {
                started.store(true, Ordering::SeqCst);
                // Tight loop; yield_check stands in for the stack-growth
                // prologue a code generator would insert at function entry.
                while !release.load(Ordering::SeqCst) {
                    task::yield_check();
                    std::hint::spin_loop();
                }
            })
            .expect("spawn spinner");
    }

    common::wait_until("spinner to start", Duration::from_secs(10), || {
        started.load(Ordering::SeqCst)
    });

    // The single context is now occupied. The second task can only run if
    // the monitor preempts the spinner.
    let ran_second = Arc::new(AtomicBool::new(false));
    let begin = Instant::now();
    {
        let ran_second = Arc::clone(&ran_second);
        let release = Arc::clone(&release);
        sched
            .spawn(move || {
                ran_second.store(true, Ordering::SeqCst);
                release.store(true, Ordering::SeqCst);
            })
            .expect("spawn second");
    }

    common::wait_until("second task to run", Duration::from_secs(10), || {
        ran_second.load(Ordering::SeqCst)
    });
    let waited = begin.elapsed();
    // The monitor's preemption threshold is 10 ms; give scheduling slack
    // but insist it happened on the preemption timescale, not seconds.
    assert!(
        waited < Duration::from_secs(2),
        "preemption took {waited:?}"
    );

    common::wait_quiescent(&sched, Duration::from_secs(10));
    sched.shutdown();
}
