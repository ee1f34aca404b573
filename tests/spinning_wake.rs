#![allow(missing_docs)]
//! Park/ready handshake under the spinning-worker protocol: readying a task
//! wakes a parked worker, and the spinning population drains to zero at
//! quiescence.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use switchyard::config::SchedConfig;
use switchyard::runtime::Scheduler;
use switchyard::task;

#[test]
fn readying_wakes_exactly_what_is_needed() {
    common::init_test_logging();
    let mut cfg = SchedConfig::default();
    cfg.max_contexts = 4;
    cfg.stack_size = 32 * 1024;
    let sched = Scheduler::new(cfg).expect("scheduler");

    let parked = Arc::new(AtomicUsize::new(0));
    let resumed = Arc::new(AtomicUsize::new(0));

    // Three tasks block; the parked counter only moves once each is safely
    // in Waiting state (the unlock callback runs after the status flip).
    let sleepers: Vec<_> = (0..3)
        .map(|_| {
            let parked = Arc::clone(&parked);
            let resumed = Arc::clone(&resumed);
            sched
                .spawn(move || {
                    task::park_unlock("test-wait", move |_| {
                        parked.fetch_add(1, Ordering::SeqCst);
                        true
                    });
                    resumed.fetch_add(1, Ordering::SeqCst);
                })
                .expect("spawn sleeper")
        })
        .collect();

    // A controller task keeps one worker busy (an embedded scheduler with
    // every task blocked would otherwise trip deadlock detection) and
    // readies the sleepers one at a time.
    {
        let parked = Arc::clone(&parked);
        let resumed = Arc::clone(&resumed);
        sched
            .spawn(move || {
                let sched = task::current_scheduler().expect("controller runs inside a task");
                while parked.load(Ordering::SeqCst) < 3 {
                    task::yield_check();
                    std::hint::spin_loop();
                }
                for (i, sleeper) in sleepers.iter().enumerate() {
                    sched.ready(*sleeper);
                    while resumed.load(Ordering::SeqCst) < i + 1 {
                        task::yield_check();
                        std::hint::spin_loop();
                    }
                }
            })
            .expect("spawn controller");
    }

    common::wait_until("sleepers to resume", Duration::from_secs(30), || {
        resumed.load(Ordering::SeqCst) == 3
    });
    common::wait_quiescent(&sched, Duration::from_secs(10));
    common::wait_until("contexts to idle", Duration::from_secs(10), || {
        let snap = sched.snapshot();
        snap.idle_contexts == snap.contexts
    });

    assert_eq!(
        sched.snapshot().spinning_workers,
        0,
        "no spinner survives quiescence"
    );
    sched.shutdown();
}
