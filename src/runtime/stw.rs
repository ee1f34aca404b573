//! Stop-the-world coordination and context resizing.
//!
//! `stop_the_world` drives every context to Stopped: running contexts are
//! asked to preempt and stop themselves at the dispatch gate, syscall
//! contexts are CAS-stolen on the spot, idle contexts are drained off the
//! list. The stopper then waits on the stop note, re-preempting every
//! 100 µs to cover tasks that raced past the first request.
//!
//! Context resizing piggybacks on the stopped world: excess contexts drain
//! their rings to the head of the global queue (order preserved), flush
//! their free stashes, and die; new contexts appear Stopped and are handed
//! out when the world restarts.

use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::types::{ContextId, ContextStatus, TaskStatus, WorkerId};

use super::context::ContextRecord;
use super::dispatch;
use super::scheduler::{SchedState, Scheduler};
use super::task;

/// Re-preemption cadence while waiting for stragglers.
const STOP_RETRY: Duration = Duration::from_micros(100);

/// Stops every context. On return the world is stopped: every context is
/// Stopped and no worker is executing a task (the calling task, if any, is
/// the single exception and must not schedule until it restarts the world).
pub(crate) fn stop_the_world(sched: &Scheduler, reason: &'static str) {
    sched.world_acquire();
    debug!(reason, "stopping the world");

    // The caller may itself be a task running on a context of this
    // scheduler; that context stops here and is revived by start.
    let caller_ctx = calling_context(sched);

    {
        let mut state = sched.lock_state();
        state.stop_wait = sched.context_count() as i32;
        sched.set_gc_waiting(true);
        preempt_all(sched);

        if let Some(ctx) = &caller_ctx {
            ctx.set_status(ContextStatus::Stopped);
            state.stop_wait -= 1;
        }
        // Claim every context parked in a syscall.
        for ctx in sched.contexts_snapshot() {
            if ctx.cas_status(ContextStatus::Syscall, ContextStatus::Stopped) {
                ctx.bump_syscall_tick();
                state.stop_wait -= 1;
            }
        }
        // Drain the idle list.
        while let Some(id) = sched.take_idle_context(&mut state) {
            let ctx = sched
                .context(id)
                .unwrap_or_else(|| crate::fatal!("idle list held dead context {id}"));
            ctx.set_status(ContextStatus::Stopped);
            state.stop_wait -= 1;
        }
    }

    // Wait for the stragglers, re-preempting every retry tick to cover
    // tasks that started running between the first sweep and their context
    // observing the stop. The note may carry stale wakeups, so the counter
    // is authoritative.
    loop {
        {
            let state = sched.lock_state();
            if state.stop_wait == 0 {
                break;
            }
        }
        if !sched.stop_parker().park_timeout(STOP_RETRY) {
            preempt_all(sched);
        }
    }

    // Sanity: the world must actually be stopped.
    let state = sched.lock_state();
    if state.stop_wait != 0 {
        crate::fatal!("stop_the_world finished with stop_wait={}", state.stop_wait);
    }
    for ctx in sched.contexts_snapshot() {
        if ctx.status() != ContextStatus::Stopped {
            crate::fatal!(
                "stop_the_world finished with context {} in state {}",
                ctx.id(),
                ctx.status()
            );
        }
    }
    drop(state);
    trace!(reason, "world stopped");
}

/// Restarts the world: applies any pending resize, hands contexts with work
/// to workers, idles the rest, and releases the world gate.
pub(crate) fn start_the_world(sched: &Scheduler) {
    // Collect whatever the poller accumulated during the pause.
    let polled = if sched.netpoll.initialized() {
        sched.netpoll.poll(false)
    } else {
        Vec::new()
    };

    let caller_ctx = calling_context(sched);
    let run_list = {
        let mut state = sched.lock_state();
        let target = state
            .pending_resize
            .take()
            .unwrap_or(sched.context_count() as usize);
        let run_list = resize_contexts(sched, &mut state, target, caller_ctx.as_deref());
        sched.set_gc_waiting(false);
        run_list
    };
    sched.wake_monitor();

    let arc = sched.arc();
    for ctx in run_list {
        dispatch::start_worker(&arc, Some(ctx), false);
    }
    dispatch::inject_ready_list(&arc, polled);

    // One extra wake in case queues are deep and every started worker is
    // already saturated.
    dispatch::wake_context(sched);

    sched.world_release();
    debug!("world restarted");
}

/// Sends a preemption request to every Running context.
fn preempt_all(sched: &Scheduler) -> bool {
    let mut any = false;
    for ctx in sched.contexts_snapshot() {
        if ctx.status() != ContextStatus::Running {
            continue;
        }
        let Some(worker) = ctx.owner() else { continue };
        if let Some(task) = sched.worker(worker).current_task() {
            sched.preempt(task);
            any = true;
        }
    }
    any
}

/// The context of the calling task when the caller is a worker task of this
/// scheduler; world control from external threads has no context.
fn calling_context(sched: &Scheduler) -> Option<Arc<ContextRecord>> {
    let current = task::try_current()?;
    if !std::ptr::eq(Arc::as_ptr(&current.sched), sched) {
        return None;
    }
    let worker = sched.worker(current.worker);
    let ctx = sched.context(worker.context()?)?;
    Some(ctx)
}

/// Applies a context-count change under the stopped world and sorts every
/// surviving context into "has work" (returned) or idle. The caller's
/// context, if any, is revived as Running and excluded from both.
fn resize_contexts(
    sched: &Scheduler,
    state: &mut SchedState,
    target: usize,
    caller_ctx: Option<&ContextRecord>,
) -> Vec<Arc<ContextRecord>> {
    let mut table = sched.contexts_table().write();
    let old = table.len();
    if target != old {
        debug!(old, new = target, "resizing contexts");
    }

    for index in old..target {
        table.push(Arc::new(ContextRecord::new(
            ContextId::from_index(index as u32),
            ContextStatus::Stopped,
        )));
    }

    // Tear down the excess: local work moves to the head of the global
    // queue in ring order, free resources spill to the global lists, mark
    // workers become ordinary runnable tasks.
    for ctx in table.iter().skip(target) {
        let drained = ctx.runq.drain();
        if !drained.is_empty() {
            state.runq.push_batch_head(&drained);
        }
        if let Some(mark) = ctx.mark_worker() {
            sched
                .task(mark)
                .cas_status(TaskStatus::Waiting, TaskStatus::Runnable);
            state.runq.push_tail(mark);
            ctx.set_mark_worker(None);
        }
        let freed: SmallVec<[_; 16]> = ctx.flush_free_stash().into_iter().collect();
        state.free_tasks.extend(freed);
        ctx.set_owner(None);
        ctx.set_status(ContextStatus::Dead);
    }
    if target < old {
        table.truncate(target);
    }

    // Re-home the caller: its old context may have died in the shrink.
    let caller_keep: Option<u32> = caller_ctx.map(|ctx| {
        if (ctx.id().index() as usize) < target {
            ctx.id().index()
        } else {
            let current = task::try_current().expect("caller context without a task");
            rebind_caller(sched, current.worker, &table[0]);
            0
        }
    });

    let mut run_list = Vec::new();
    for ctx in table.iter() {
        if Some(ctx.id().index()) == caller_keep {
            ctx.set_status(ContextStatus::Running);
            continue;
        }
        ctx.set_owner(None);
        if ctx.runq.is_empty() {
            ctx.set_status(ContextStatus::Idle);
            sched.put_idle_context(state, ctx);
        } else {
            ctx.set_status(ContextStatus::Idle);
            run_list.push(Arc::clone(ctx));
        }
    }
    run_list
}

/// Moves the stop-the-world caller's worker onto a surviving context.
fn rebind_caller(sched: &Scheduler, worker: WorkerId, target: &Arc<ContextRecord>) {
    let w = sched.worker(worker);
    w.set_context(Some(target.id()));
    target.set_owner(Some(worker));
}
