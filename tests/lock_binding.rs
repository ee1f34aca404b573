#![allow(missing_docs)]
//! Thread lock-binding: a task pinned with `lock_to_thread` keeps running
//! on the same OS thread across suspensions, carried by the donor
//! handshake.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use switchyard::config::SchedConfig;
use switchyard::runtime::Scheduler;
use switchyard::task;

#[test]
fn locked_task_stays_on_its_thread() {
    common::init_test_logging();
    let mut cfg = SchedConfig::default();
    cfg.max_contexts = 2;
    cfg.stack_size = 32 * 1024;
    let sched = Scheduler::new(cfg).expect("scheduler");

    let finished = Arc::new(AtomicBool::new(false));
    let threads_seen = Arc::new(Mutex::new(Vec::new()));

    // A busy bystander keeps the scheduler visibly alive while the locked
    // task bounces through queues and handshakes.
    let stop_bystander = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop_bystander);
        sched
            .spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    task::yield_check();
                    std::hint::spin_loop();
                }
            })
            .expect("spawn bystander");
    }

    {
        let finished = Arc::clone(&finished);
        let threads_seen = Arc::clone(&threads_seen);
        let stop_bystander = Arc::clone(&stop_bystander);
        sched
            .spawn(move || {
                task::lock_to_thread();
                threads_seen.lock().unwrap().push(std::thread::current().id());
                // Each yield sends the task through the global queue; some
                // other worker will dequeue it and must donate its context
                // back to the bound thread.
                for _ in 0..5 {
                    task::yield_now();
                    threads_seen.lock().unwrap().push(std::thread::current().id());
                }
                task::unlock_from_thread();
                stop_bystander.store(true, Ordering::SeqCst);
                finished.store(true, Ordering::SeqCst);
            })
            .expect("spawn locked task");
    }

    common::wait_until("locked task to finish", Duration::from_secs(30), || {
        finished.load(Ordering::SeqCst)
    });

    let seen = threads_seen.lock().unwrap();
    assert_eq!(seen.len(), 6);
    assert!(
        seen.iter().all(|id| *id == seen[0]),
        "locked task migrated threads: {seen:?}"
    );

    common::wait_quiescent(&sched, Duration::from_secs(10));
    sched.shutdown();
}
