#![allow(missing_docs)]
//! Global-queue fairness: a pair of tasks that keep respawning each other
//! through the `next` slot cannot starve the global queue; the periodic
//! sample runs globally queued work within the sampling interval.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use switchyard::config::SchedConfig;
use switchyard::runtime::Scheduler;

/// Hard cap on chain respawns so a fairness regression fails the test
/// instead of spinning forever.
const RESPAWN_CAP: usize = 100_000;

fn chain(
    sched: Arc<Scheduler>,
    victim_ran: Arc<AtomicBool>,
    respawns: Arc<AtomicUsize>,
    seen_at_victim: Arc<AtomicUsize>,
) {
    if victim_ran.load(Ordering::SeqCst) {
        return;
    }
    let n = respawns.fetch_add(1, Ordering::SeqCst) + 1;
    if n >= RESPAWN_CAP {
        return;
    }
    let next_sched = Arc::clone(&sched);
    let next_victim = Arc::clone(&victim_ran);
    let next_respawns = Arc::clone(&respawns);
    let next_seen = Arc::clone(&seen_at_victim);
    // Spawned from inside a task, so this lands in the context's `next`
    // slot and keeps the local chain saturated.
    let _ = sched.spawn(move || chain(next_sched, next_victim, next_respawns, next_seen));
}

#[test]
fn next_slot_chain_cannot_starve_global_queue() {
    common::init_test_logging();
    let mut cfg = SchedConfig::default();
    cfg.max_contexts = 1;
    cfg.stack_size = 32 * 1024;
    assert_eq!(cfg.global_queue_interval, 61, "fairness bound assumes 61");
    let sched = Scheduler::new(cfg).expect("scheduler");

    let victim_ran = Arc::new(AtomicBool::new(false));
    let respawns = Arc::new(AtomicUsize::new(0));
    let seen_at_victim = Arc::new(AtomicUsize::new(0));

    // Two mutually-respawning chains on the single context.
    for _ in 0..2 {
        let sched_handle = Arc::clone(&sched);
        let victim = Arc::clone(&victim_ran);
        let spawns = Arc::clone(&respawns);
        let seen = Arc::clone(&seen_at_victim);
        sched
            .spawn(move || chain(sched_handle, victim, spawns, seen))
            .expect("spawn chain");
    }

    // Let the chains saturate the context's `next` slot before enqueueing
    // the victim, so the victim genuinely sits on the global queue under
    // chain traffic (an idle worker would otherwise drain it immediately).
    common::wait_until("chains to spin up", Duration::from_secs(10), || {
        respawns.load(Ordering::SeqCst) >= 10
    });

    // The victim sits on the global queue underneath the chain traffic.
    {
        let victim = Arc::clone(&victim_ran);
        let spawns = Arc::clone(&respawns);
        let seen = Arc::clone(&seen_at_victim);
        sched
            .spawn(move || {
                seen.store(spawns.load(Ordering::SeqCst), Ordering::SeqCst);
                victim.store(true, Ordering::SeqCst);
            })
            .expect("spawn victim");
    }

    common::wait_until("victim to run", Duration::from_secs(30), || {
        victim_ran.load(Ordering::SeqCst)
    });
    let chained = seen_at_victim.load(Ordering::SeqCst);
    assert!(
        chained < RESPAWN_CAP,
        "victim only ran because the chain hit its cap"
    );
    // Two chains, one sample every 61 dispatch rounds: the victim must run
    // within a few hundred chain executions, not tens of thousands.
    assert!(
        chained <= 1_000,
        "victim waited for {chained} chain executions"
    );

    common::wait_quiescent(&sched, Duration::from_secs(10));
    sched.shutdown();
}
