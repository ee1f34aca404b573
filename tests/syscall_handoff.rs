#![allow(missing_docs)]
//! Syscall context handoff: workers blocked in long syscalls lose their
//! contexts to the monitor, new workers service fresh work meanwhile, and
//! every syscalling task eventually resumes.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use switchyard::config::SchedConfig;
use switchyard::runtime::Scheduler;
use switchyard::task;

const SYSCALLERS: usize = 8;

#[test]
fn long_syscalls_hand_their_contexts_off() {
    common::init_test_logging();
    let mut cfg = SchedConfig::default();
    cfg.max_contexts = SYSCALLERS;
    cfg.stack_size = 32 * 1024;
    let sched = Scheduler::new(cfg).expect("scheduler");

    let started = std::time::Instant::now();
    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..SYSCALLERS {
        let done = Arc::clone(&done);
        sched
            .spawn(move || {
                task::enter_syscall();
                // Stand-in for a blocking OS call: the worker thread really
                // blocks here, holding no context.
                std::thread::sleep(Duration::from_millis(50));
                task::exit_syscall();
                done.fetch_add(1, Ordering::SeqCst);
            })
            .expect("spawn syscaller");
    }

    // While all eight are stuck, freshly spawned tasks must still run on
    // the retaken contexts.
    std::thread::sleep(Duration::from_millis(15));
    let quick = Arc::new(AtomicUsize::new(0));
    for _ in 0..20 {
        let quick = Arc::clone(&quick);
        sched
            .spawn(move || {
                quick.fetch_add(1, Ordering::SeqCst);
            })
            .expect("spawn quick task");
    }
    common::wait_until("quick tasks during syscalls", Duration::from_secs(10), || {
        quick.load(Ordering::SeqCst) == 20
    });
    if started.elapsed() < Duration::from_millis(45) {
        assert!(
            done.load(Ordering::SeqCst) < SYSCALLERS,
            "quick tasks finished while syscalls were still blocked"
        );
    }

    common::wait_until("syscallers to resume", Duration::from_secs(30), || {
        done.load(Ordering::SeqCst) == SYSCALLERS
    });

    // The monitor's retake forced at least one context handoff to a fresh
    // worker while all original workers were blocked.
    assert!(
        sched.snapshot().workers > SYSCALLERS,
        "expected extra workers from syscall handoff, got {}",
        sched.snapshot().workers
    );

    common::wait_quiescent(&sched, Duration::from_secs(10));
    sched.shutdown();
}

#[test]
fn eager_blocking_entry_hands_off_immediately() {
    common::init_test_logging();
    let mut cfg = SchedConfig::default();
    cfg.max_contexts = 2;
    cfg.stack_size = 32 * 1024;
    let sched = Scheduler::new(cfg).expect("scheduler");

    let done = Arc::new(AtomicUsize::new(0));
    {
        let done = Arc::clone(&done);
        sched
            .spawn(move || {
                task::enter_syscall_blocking();
                std::thread::sleep(Duration::from_millis(20));
                task::exit_syscall();
                done.fetch_add(1, Ordering::SeqCst);
            })
            .expect("spawn blocker");
    }
    // The context came back the moment the task entered the syscall, not a
    // monitor tick later; a follow-up task runs long before the blocker
    // returns.
    let quick = Arc::new(AtomicUsize::new(0));
    {
        let quick = Arc::clone(&quick);
        sched
            .spawn(move || {
                quick.fetch_add(1, Ordering::SeqCst);
            })
            .expect("spawn quick");
    }
    common::wait_until("quick task", Duration::from_secs(5), || {
        quick.load(Ordering::SeqCst) == 1
    });
    common::wait_until("blocker", Duration::from_secs(5), || {
        done.load(Ordering::SeqCst) == 1
    });
    common::wait_quiescent(&sched, Duration::from_secs(10));
    sched.shutdown();
}
