//! Syscall entry/exit context handoff.
//!
//! A task about to block in the OS keeps its worker thread (the thread *is*
//! the syscall) but gives up its execution context so other workers can use
//! it. The worker retains a pointer to the context: if the syscall returns
//! quickly, a single CAS reclaims it. The monitor retakes contexts whose
//! syscalls outlast the grace period; the exit path then falls back to any
//! idle context, and finally to requeueing the task globally and parking
//! the worker.
//!
//! Invariant: while a Syscall-state task exists, either its worker still
//! holds the context pointer for fast reclaim, or the context has been
//! handed off and the task will be re-enqueued on exit.

use std::sync::Arc;
use tracing::trace;

use crate::types::{ContextStatus, TaskId, TaskStatus};

use super::coroutine::SwitchReason;
use super::dispatch::{self, RunOutcome};
use super::scheduler::Scheduler;
use super::task::{self, CurrentTask};
use super::worker::WorkerRecord;

/// Result of the slow syscall-exit path, decided on the scheduler stack.
pub(crate) enum SlowExit {
    /// A context was reacquired; run the same task immediately.
    RunAgain,
    /// The task went to the global queue; the worker parked and now holds a
    /// fresh context for normal dispatch.
    Requeued,
    /// The scheduler is shutting down.
    Shutdown,
}

/// Task-side syscall entry (fast form): flip the task to Syscall and detach
/// the context, keeping the reclaim pointer.
pub(crate) fn enter_syscall(current: &CurrentTask) {
    let sched = &current.sched;
    let record = sched.task(current.task);
    let w = sched.worker(current.worker);

    record.cas_status(TaskStatus::Running, TaskStatus::Syscall);

    let ctx_id = w
        .context()
        .unwrap_or_else(|| crate::fatal!("syscall entry without a context"));
    let ctx = sched
        .context(ctx_id)
        .unwrap_or_else(|| crate::fatal!("syscall entry on dead context {ctx_id}"));
    // Detach: the context loses its worker but the worker keeps the
    // pointer (w.context()) for the fast exit path.
    ctx.set_owner(None);
    ctx.set_status(ContextStatus::Syscall);
    trace!(task = %current.task, ctx = %ctx_id, "entering syscall");

    // A deep-sleeping monitor must wake to watch this context.
    sched.wake_monitor();

    if sched.gc_waiting() {
        enter_syscall_stop_wait(sched, &ctx);
    }
}

/// Syscall entry while a stop-the-world is pending: stop the context on the
/// spot instead of making the stopper wait a monitor tick for it.
fn enter_syscall_stop_wait(sched: &Scheduler, ctx: &super::context::ContextRecord) {
    let mut state = sched.lock_state();
    if state.stop_wait > 0 && ctx.cas_status(ContextStatus::Syscall, ContextStatus::Stopped) {
        ctx.bump_syscall_tick();
        state.stop_wait -= 1;
        if state.stop_wait == 0 {
            sched.stop_parker().unpark();
        }
    }
}

/// Task-side syscall entry for calls known to block: hand the context off
/// eagerly instead of letting the monitor discover it a tick later.
pub(crate) fn enter_syscall_blocking(current: &CurrentTask) {
    let sched = &current.sched;
    let record = sched.task(current.task);
    let w = sched.worker(current.worker);

    record.cas_status(TaskStatus::Running, TaskStatus::Syscall);

    let ctx_id = w
        .context()
        .unwrap_or_else(|| crate::fatal!("syscall entry without a context"));
    let ctx = sched
        .context(ctx_id)
        .unwrap_or_else(|| crate::fatal!("syscall entry on dead context {ctx_id}"));
    ctx.bump_syscall_tick();
    ctx.set_owner(None);
    ctx.set_status(ContextStatus::Idle);
    w.set_context(None);
    trace!(task = %current.task, ctx = %ctx_id, "entering blocking syscall, handing context off");
    dispatch::handoff_context(sched, ctx);
}

/// Task-side syscall exit. Returns with the task Running on some context;
/// may suspend to the scheduler stack on the slow path.
pub(crate) fn exit_syscall(current: &CurrentTask) {
    let sched = &current.sched;
    let record = sched.task(current.task);
    let w = sched.worker(current.worker);

    // Fast path 1: reclaim the context we entered with.
    if let Some(ctx_id) = w.context() {
        if let Some(ctx) = sched.context(ctx_id) {
            if ctx.cas_status(ContextStatus::Syscall, ContextStatus::Running) {
                ctx.set_owner(Some(current.worker));
                ctx.bump_syscall_tick();
                record.cas_status(TaskStatus::Syscall, TaskStatus::Running);
                trace!(task = %current.task, ctx = %ctx_id, "syscall exit reclaimed context");
                return;
            }
        }
        // The monitor (or a stop-the-world) took it.
        w.set_context(None);
    }

    // Fast path 2: any idle context will do.
    let grabbed = {
        let mut state = sched.lock_state();
        sched.take_idle_context(&mut state)
    };
    if let Some(ctx_id) = grabbed {
        sched.wake_monitor();
        dispatch::acquire_context(sched, &w, ctx_id);
        record.cas_status(TaskStatus::Syscall, TaskStatus::Running);
        trace!(task = %current.task, ctx = %ctx_id, "syscall exit grabbed idle context");
        return;
    }

    // Slow path: return to the scheduler stack; the worker requeues us and
    // parks. We resume from here once a worker picks the task back up.
    trace!(task = %current.task, "syscall exit has no context, suspending");
    task::suspend_current(current, SwitchReason::ExitedSyscall);
}

/// Scheduler-stack half of the slow syscall exit.
pub(crate) fn exit_syscall_slow(
    sched: &Arc<Scheduler>,
    w: &Arc<WorkerRecord>,
    task_id: TaskId,
) -> SlowExit {
    let record = sched.task(task_id);
    record.cas_status(TaskStatus::Syscall, TaskStatus::Runnable);
    record.set_owner(None);

    let reclaimed = {
        let mut state = sched.lock_state();
        match sched.take_idle_context(&mut state) {
            Some(ctx) => Some(ctx),
            None => {
                state.runq.push_tail(task_id);
                None
            }
        }
    };

    if let Some(ctx_id) = reclaimed {
        sched.wake_monitor();
        dispatch::acquire_context(sched, w, ctx_id);
        return SlowExit::RunAgain;
    }

    if w.locked_task() == Some(task_id) {
        // Lock-bound: wait for another worker to donate a context along
        // with the task.
        return match dispatch::stop_locked_worker(sched, w, task_id) {
            RunOutcome::Continue => SlowExit::RunAgain,
            RunOutcome::Shutdown => SlowExit::Shutdown,
        };
    }

    match dispatch::park_worker(sched, w) {
        RunOutcome::Continue => SlowExit::Requeued,
        RunOutcome::Shutdown => SlowExit::Shutdown,
    }
}
