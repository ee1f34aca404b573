#![allow(missing_docs)]
//! Stop-the-world under churn: tasks alternating between syscalls and busy
//! work are all brought to a halt, the stopped predicate holds, and the
//! restarted world finishes every task. Context resizing reuses the same
//! machinery.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use switchyard::config::SchedConfig;
use switchyard::runtime::Scheduler;
use switchyard::task;

fn churn_config(contexts: usize) -> SchedConfig {
    let mut cfg = SchedConfig::default();
    cfg.max_contexts = contexts;
    cfg.stack_size = 32 * 1024;
    cfg
}

/// Busy-spins for roughly `dur`, hitting preemption points throughout.
fn busy(dur: Duration) {
    let until = Instant::now() + dur;
    while Instant::now() < until {
        task::yield_check();
        std::hint::spin_loop();
    }
}

#[test]
fn stop_halts_syscall_churn_and_start_resumes_it() {
    common::init_test_logging();
    let sched = Scheduler::new(churn_config(8)).expect("scheduler");

    let done = Arc::new(AtomicUsize::new(0));
    const TASKS: usize = 100;
    for _ in 0..TASKS {
        let done = Arc::clone(&done);
        sched
            .spawn(move || {
                // Half the time in syscalls, half on the context.
                for _ in 0..10 {
                    task::enter_syscall();
                    std::thread::sleep(Duration::from_micros(300));
                    task::exit_syscall();
                    busy(Duration::from_micros(300));
                }
                done.fetch_add(1, Ordering::SeqCst);
            })
            .expect("spawn churner");
    }

    // Let the churn build up, then stop the world from this external
    // thread.
    std::thread::sleep(Duration::from_millis(3));
    let stop_begin = Instant::now();
    sched.stop_the_world("test pause");
    let stop_took = stop_begin.elapsed();

    // P7: every context Stopped, nothing executing.
    assert!(sched.world_stopped(), "world not stopped");
    assert!(
        stop_took < Duration::from_secs(1),
        "stop_the_world took {stop_took:?}"
    );

    // Nothing makes progress while stopped.
    let frozen = done.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(20));
    let after_pause = done.load(Ordering::SeqCst);
    assert_eq!(frozen, after_pause, "tasks completed during the pause");

    sched.start_the_world();
    common::wait_until("churners to finish", Duration::from_secs(60), || {
        done.load(Ordering::SeqCst) == TASKS
    });
    common::wait_quiescent(&sched, Duration::from_secs(10));
    sched.shutdown();
}

#[test]
fn resize_contexts_mid_flight() {
    common::init_test_logging();
    let sched = Scheduler::new(churn_config(2)).expect("scheduler");

    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..200 {
        let done = Arc::clone(&done);
        sched
            .spawn(move || {
                busy(Duration::from_micros(200));
                done.fetch_add(1, Ordering::SeqCst);
            })
            .expect("spawn");
    }

    let old = sched.set_max_contexts(6).expect("grow");
    assert_eq!(old, 2);
    assert_eq!(sched.snapshot().contexts, 6);

    for _ in 0..200 {
        let done = Arc::clone(&done);
        sched
            .spawn(move || {
                busy(Duration::from_micros(200));
                done.fetch_add(1, Ordering::SeqCst);
            })
            .expect("spawn");
    }

    let old = sched.set_max_contexts(3).expect("shrink");
    assert_eq!(old, 6);
    assert_eq!(sched.snapshot().contexts, 3);

    common::wait_until("all tasks through resizes", Duration::from_secs(60), || {
        done.load(Ordering::SeqCst) == 400
    });
    common::wait_quiescent(&sched, Duration::from_secs(10));
    common::wait_until("contexts to idle", Duration::from_secs(10), || {
        let snap = sched.snapshot();
        snap.contexts == 3 && snap.idle_contexts == 3
    });
    sched.shutdown();
}

#[test]
fn invalid_resize_is_rejected() {
    common::init_test_logging();
    let sched = Scheduler::new(churn_config(2)).expect("scheduler");
    assert!(sched.set_max_contexts(0).is_err());
    assert_eq!(sched.snapshot().contexts, 2);
    sched.shutdown();
}
