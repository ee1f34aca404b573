//! The background monitor.
//!
//! A workerless thread that wakes every few microseconds to claw back
//! progress the dispatch loops cannot make on their own: contexts stuck in
//! syscalls are retaken and handed to other workers, tasks hogging a
//! context past their timeslice get a preemption request, the poller is
//! forced if nobody has polled for too long, and schedtrace statistics are
//! emitted on their cadence.
//!
//! The sleep is adaptive: one tick (20 µs) while interventions are landing,
//! doubling after 50 idle cycles up to 10 ms. When every context is idle or
//! a stop-the-world is pending, the monitor deep-sleeps on its parker and
//! is woken by syscall entry or start-the-world.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::types::ContextStatus;

use super::dispatch;
use super::scheduler::Scheduler;
use super::trace as schedtrace;

/// Extra grace before retaking a syscall context when other workers are
/// already covering the load (a spinner or an idle context exists and the
/// retaken ring would be empty).
const UNPRESSURED_RETAKE_GRACE: Duration = Duration::from_millis(10);

/// Force a netpoll when nobody has polled for this long.
const NETPOLL_STALENESS: Duration = Duration::from_millis(10);

/// Doubling starts after this many interventionless cycles.
const IDLE_CYCLES_BEFORE_BACKOFF: u32 = 50;

pub(crate) fn monitor_main(sched: &Arc<Scheduler>) {
    let cfg = sched.config().clone();
    let min_sleep = cfg.monitor_min_sleep;
    let max_sleep = cfg.monitor_max_sleep;

    let mut idle_cycles: u32 = 0;
    let mut delay = min_sleep;
    let mut last_trace: u64 = 0;

    {
        let state = sched.lock_state();
        sched.check_deadlock(&state);
    }

    loop {
        if sched.is_shutting_down() {
            return;
        }

        if idle_cycles == 0 {
            delay = min_sleep;
        } else if idle_cycles > IDLE_CYCLES_BEFORE_BACKOFF {
            delay = (delay * 2).min(max_sleep);
        }
        std::thread::sleep(delay);
        if sched.is_shutting_down() {
            return;
        }

        // Deep sleep while there is nothing to watch: all contexts idle or
        // the world is stopping. Syscall entry and start-the-world wake us.
        if cfg.schedtrace.is_none()
            && (sched.gc_waiting() || sched.idle_context_count() == sched.context_count())
        {
            let asleep = {
                let _state = sched.lock_state();
                if sched.gc_waiting() || sched.idle_context_count() == sched.context_count() {
                    sched.set_monitor_asleep(true);
                    true
                } else {
                    false
                }
            };
            if asleep {
                sched.monitor_parker().park_timeout(max_sleep);
                sched.set_monitor_asleep(false);
                idle_cycles = 0;
                // Fall through: the forced netpoll and retake pass still
                // run on this iteration, they are what we may have been
                // woken for.
            }
        }

        // Force the poller if it has gone stale; inject whatever is ready.
        let now = sched.now_nanos();
        let last_poll = sched.last_poll().load(Ordering::Acquire);
        if sched.netpoll.initialized()
            && last_poll != 0
            && last_poll + (NETPOLL_STALENESS.as_nanos() as u64) < now
        {
            let _ = sched.last_poll().compare_exchange(
                last_poll,
                now,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
            let ready = sched.netpoll.poll(false);
            if !ready.is_empty() {
                // Pretend one more worker is running across the injection
                // so deadlock detection does not fire between the queue
                // push and the worker starts.
                sched.idle_locked_adjust(-1);
                dispatch::inject_ready_list(sched, ready);
                sched.idle_locked_adjust(1);
            }
        }

        if retake(sched, now) != 0 {
            idle_cycles = 0;
        } else {
            idle_cycles += 1;
        }

        if let Some(every) = cfg.schedtrace {
            if last_trace + every.as_nanos() as u64 <= now {
                last_trace = now;
                schedtrace::emit(sched, cfg.scheddetail);
            }
        }
    }
}

/// One pass over all contexts: retake stuck syscalls, preempt stuck
/// dispatchers. Returns how many contexts were retaken.
fn retake(sched: &Arc<Scheduler>, now: u64) -> u32 {
    let retake_after = sched.config().syscall_retake.as_nanos() as u64;
    let preempt_after = sched.config().preempt_after.as_nanos() as u64;
    let unpressured_grace = UNPRESSURED_RETAKE_GRACE.as_nanos() as u64;

    let mut taken = 0;
    for ctx in sched.contexts_snapshot() {
        match ctx.status() {
            ContextStatus::Syscall => {
                {
                    let mut snap = ctx.monitor_tick();
                    let tick = ctx.syscall_tick();
                    if snap.syscall_tick != tick {
                        // New syscall episode; start its clock.
                        snap.syscall_tick = tick;
                        snap.syscall_when = now;
                        continue;
                    }
                    let stuck_for = now.saturating_sub(snap.syscall_when);
                    if stuck_for < retake_after {
                        continue;
                    }
                    // With no queued work and spare search capacity there
                    // is no pressure; leave the context a longer grace so
                    // quick syscalls keep their fast reclaim.
                    if ctx.runq.is_empty()
                        && sched.spinning_count() + sched.idle_context_count() > 0
                        && stuck_for < unpressured_grace
                    {
                        continue;
                    }
                }
                // Pretend one more worker is running across the CAS so the
                // syscalling worker exiting right now cannot trip deadlock
                // detection.
                sched.idle_locked_adjust(-1);
                if ctx.cas_status(ContextStatus::Syscall, ContextStatus::Idle) {
                    trace!(ctx = %ctx.id(), "monitor retook syscall context");
                    taken += 1;
                    ctx.bump_syscall_tick();
                    dispatch::handoff_context(sched, Arc::clone(&ctx));
                }
                sched.idle_locked_adjust(1);
            }
            ContextStatus::Running => {
                let mut snap = ctx.monitor_tick();
                let tick = ctx.sched_tick();
                if snap.sched_tick != tick {
                    snap.sched_tick = tick;
                    snap.sched_when = now;
                    continue;
                }
                if snap.sched_when + preempt_after <= now {
                    drop(snap);
                    preempt_running(sched, &ctx);
                }
            }
            _ => {}
        }
    }
    taken
}

/// Best-effort preemption of whatever is running on `ctx`.
fn preempt_running(sched: &Scheduler, ctx: &super::context::ContextRecord) -> bool {
    let Some(worker_id) = ctx.owner() else {
        return false;
    };
    let worker = sched.worker(worker_id);
    let Some(task) = worker.current_task() else {
        return false;
    };
    trace!(ctx = %ctx.id(), %task, "monitor requesting preemption");
    sched.preempt(task);
    true
}
