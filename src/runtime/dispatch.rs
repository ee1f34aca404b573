//! The dispatch loop and the central work search.
//!
//! Everything here runs on worker scheduler stacks (the OS thread's own
//! stack, between tasks). The loop shape follows the design: stop-the-world
//! gate, lock-bound fast path, periodic global-queue sample for fairness,
//! local pop, then [`find_runnable`] which does not return without work.
//!
//! The delicate part is the handshake between readying a task and waking a
//! worker. A worker going idle decrements the spinning count (SeqCst RMW)
//! and then re-checks every run queue; a readier pushes (release) and then
//! reads the counters behind a SeqCst fence. Whichever of the two orders
//! wins, either the readier sees no spinner and wakes someone, or the
//! idling worker re-observes the new work and un-idles itself.

use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::types::{ContextId, ContextStatus, TaskId, TaskStatus};
use crate::util::{DetRng, StealOrder};

use super::context::ContextRecord;
use super::coroutine::{SwitchReason, TaskSwitch};
use super::global_queue::Refill;
use super::run_queue::RING_CAPACITY;
use super::scheduler::Scheduler;
use super::syscall;
use super::task::{self, CurrentTask};
use super::worker::{self, WorkerRecord};

/// What the worker loop should do after a dispatch round.
pub(crate) enum RunOutcome {
    Continue,
    Shutdown,
}

/// Entry point of every worker OS thread.
pub(crate) fn worker_main(sched: &Arc<Scheduler>, w: &Arc<WorkerRecord>) {
    if let Some(ctx) = w.take_next_context() {
        acquire_context(sched, w, ctx);
    }
    let mut rng = DetRng::new(u64::from(w.id().index()) + 1);
    let mut steal_order = StealOrder::new(sched.context_count());
    trace!(worker = %w.id(), "worker online");

    loop {
        if sched.is_shutting_down() {
            break;
        }

        // A lock-bound worker runs its task and nothing else: it donates its
        // context and sleeps until another worker hands the task back. This
        // precedes the stop-the-world gate: lock-bound workers never park
        // on the idle list, and their handoff does the stop accounting.
        if let Some(locked) = w.locked_task() {
            if matches!(stop_locked_worker(sched, w, locked), RunOutcome::Shutdown) {
                break;
            }
            if matches!(execute(sched, w, locked, false), RunOutcome::Shutdown) {
                break;
            }
            continue;
        }

        // Stop-the-world gate: surrender the context and wait out the pause.
        if sched.gc_waiting() && w.context().is_some() {
            if matches!(gc_stop_worker(sched, w), RunOutcome::Shutdown) {
                break;
            }
            continue;
        }

        let Some(ctx_id) = w.context() else {
            crate::fatal!("worker {} dispatching without a context", w.id());
        };
        let Some(ctx) = sched.context(ctx_id) else {
            crate::fatal!("worker {} holds dead context {ctx_id}", w.id());
        };

        let mut picked: Option<(TaskId, bool)> = None;

        // Sample the global queue every few dozen dispatch rounds so a pair
        // of tasks respawning each other through the `next` slot cannot
        // starve it. Counted per round, not per timeslice: `next`-slot
        // dispatches inherit the timeslice and would freeze a tick-based
        // counter.
        if ctx.bump_dispatch_seq() % sched.config().global_queue_interval == 0 {
            let mut state = sched.lock_state();
            if !state.runq.is_empty() {
                let mut refill = Refill::new();
                picked = state
                    .runq
                    .pop(sched.context_count(), 1, 0, &mut refill)
                    .map(|t| (t, false));
                debug_assert!(refill.is_empty());
            }
        }

        if picked.is_none() {
            picked = ctx.runq.pop();
            if picked.is_some() && w.is_spinning() {
                crate::fatal!("worker {} spinning with local work", w.id());
            }
        }

        let (task_id, inherited) = match picked {
            Some(found) => found,
            None => match find_runnable(sched, w, &mut rng, &mut steal_order) {
                Some(found) => found,
                None => break,
            },
        };

        // Leaving the search: rebalance the spinning population before
        // committing to the task.
        if w.is_spinning() {
            reset_spinning(sched, w);
        }

        // A task lock-bound to another worker is handed over, context and
        // all; we park and start fresh.
        let record = sched.task(task_id);
        if let Some(bound) = record.locked_worker() {
            if bound != w.id() {
                drop(record);
                if matches!(start_locked_worker(sched, w, task_id), RunOutcome::Shutdown) {
                    break;
                }
                continue;
            }
        }
        drop(record);

        if matches!(execute(sched, w, task_id, inherited), RunOutcome::Shutdown) {
            break;
        }
    }

    trace!(worker = %w.id(), "worker retiring");
}

/// Binds an idle context to this worker.
pub(crate) fn acquire_context(sched: &Scheduler, w: &WorkerRecord, ctx_id: ContextId) {
    let Some(ctx) = sched.context(ctx_id) else {
        crate::fatal!("acquiring dead context {ctx_id}");
    };
    if ctx.status() != ContextStatus::Idle {
        crate::fatal!(
            "acquiring context {ctx_id} in state {}, expected idle",
            ctx.status()
        );
    }
    if w.context().is_some() {
        crate::fatal!("worker {} already holds a context", w.id());
    }
    ctx.set_owner(Some(w.id()));
    ctx.set_status(ContextStatus::Running);
    w.set_context(Some(ctx_id));
}

/// Unbinds and returns this worker's context, leaving it Idle and unowned
/// (not yet on the idle list).
pub(crate) fn release_context(sched: &Scheduler, w: &WorkerRecord) -> Arc<ContextRecord> {
    let Some(ctx_id) = w.context() else {
        crate::fatal!("worker {} releasing without a context", w.id());
    };
    let Some(ctx) = sched.context(ctx_id) else {
        crate::fatal!("worker {} releasing dead context {ctx_id}", w.id());
    };
    if ctx.status() != ContextStatus::Running || ctx.owner() != Some(w.id()) {
        crate::fatal!(
            "worker {} releasing context {ctx_id} in state {} owned by {:?}",
            w.id(),
            ctx.status(),
            ctx.owner()
        );
    }
    ctx.set_owner(None);
    ctx.set_status(ContextStatus::Idle);
    w.set_context(None);
    ctx
}

/// Enqueues a runnable task on a context's local queue, spilling to the
/// global queue on overflow.
pub(crate) fn push_local(sched: &Scheduler, ctx: &ContextRecord, task: TaskId, favor_next: bool) {
    if let Some(overflow) = ctx.runq.push(task, favor_next) {
        let mut state = sched.lock_state();
        state.runq.push_batch(overflow);
    }
}

/// One dispatch: run `task_id` until it suspends or finishes, then perform
/// the transition its suspension reason demands.
pub(crate) fn execute(
    sched: &Arc<Scheduler>,
    w: &Arc<WorkerRecord>,
    task_id: TaskId,
    inherited: bool,
) -> RunOutcome {
    let mut inherited = inherited;
    loop {
        let record = sched.task(task_id);
        record.cas_status(TaskStatus::Runnable, TaskStatus::Running);
        record.set_owner(Some(w.id()));
        w.set_current_task(Some(task_id));

        let Some(ctx_id) = w.context() else {
            crate::fatal!("executing {} without a context", task_id);
        };
        let ctx = sched
            .context(ctx_id)
            .unwrap_or_else(|| crate::fatal!("executing on dead context {ctx_id}"));
        if !inherited {
            ctx.bump_sched_tick();
        }

        let mut coroutine = record
            .take_coroutine()
            .unwrap_or_else(|| crate::fatal!("runnable task {} has no coroutine", task_id));

        task::set_current(CurrentTask {
            sched: Arc::clone(sched),
            worker: w.id(),
            task: task_id,
        });
        let switch = coroutine.resume();
        task::clear_current();
        w.set_current_task(None);

        match switch {
            TaskSwitch::Finished => {
                drop(coroutine);
                finish_task(sched, w, task_id);
                return RunOutcome::Continue;
            }
            TaskSwitch::Suspended(SwitchReason::Exited) => {
                // Unwind the abandoned stack, then retire as a normal exit.
                drop(coroutine);
                finish_task(sched, w, task_id);
                return RunOutcome::Continue;
            }
            TaskSwitch::Suspended(SwitchReason::Yielded) => {
                record.store_coroutine(coroutine);
                requeue_global(sched, w, &record, task_id);
                return RunOutcome::Continue;
            }
            TaskSwitch::Suspended(SwitchReason::Preempted) => {
                record.store_coroutine(coroutine);
                record.clear_preempt();
                requeue_global(sched, w, &record, task_id);
                return RunOutcome::Continue;
            }
            TaskSwitch::Suspended(SwitchReason::Parked { reason, unlock }) => {
                // Everything is put back before the status flips: the
                // instant the task reads as Waiting, a racing ready may
                // hand it to another worker.
                record.store_coroutine(coroutine);
                record.set_wait_reason(reason);
                record.set_owner(None);
                record.cas_status(TaskStatus::Running, TaskStatus::Waiting);
                if let Some(unlock) = unlock {
                    if !unlock(task_id) {
                        // Park vetoed: the condition is already satisfied
                        // and nobody else will ready us. Run it again on the
                        // inherited timeslice.
                        record.cas_status(TaskStatus::Waiting, TaskStatus::Runnable);
                        record.set_wait_reason("");
                        inherited = true;
                        continue;
                    }
                }
                return RunOutcome::Continue;
            }
            TaskSwitch::Suspended(SwitchReason::ExitedSyscall) => {
                record.store_coroutine(coroutine);
                match syscall::exit_syscall_slow(sched, w, task_id) {
                    syscall::SlowExit::RunAgain => {
                        inherited = false;
                        continue;
                    }
                    syscall::SlowExit::Requeued => return RunOutcome::Continue,
                    syscall::SlowExit::Shutdown => return RunOutcome::Shutdown,
                }
            }
        }
    }
}

/// Yield/preempt continuation: back of the global queue, fresh timeslice.
fn requeue_global(
    sched: &Scheduler,
    _w: &WorkerRecord,
    record: &super::task::TaskRecord,
    task_id: TaskId,
) {
    record.cas_status(TaskStatus::Running, TaskStatus::Runnable);
    record.set_owner(None);
    sched.lock_state().runq.push_tail(task_id);
}

/// Task termination: mark dead, sever lock affinity, pool the record.
fn finish_task(sched: &Scheduler, w: &Arc<WorkerRecord>, task_id: TaskId) {
    let record = sched.task(task_id);
    record.cas_status(TaskStatus::Running, TaskStatus::Dead);
    if record.locked_worker() == Some(w.id()) {
        record.set_locked_worker(None);
        w.set_locked_task(None);
    }
    record.finish();
    record.discard_coroutine();
    let ctx = w
        .context()
        .and_then(|id| sched.context(id))
        .unwrap_or_else(|| crate::fatal!("task {} finished without a context", task_id));
    sched.free_task(&ctx, task_id);
    trace!(task = %task_id, worker = %w.id(), "task finished");
}

/// The central search. Returns a runnable task, blocking (parking the
/// worker) as long as it takes; `None` only on shutdown.
pub(crate) fn find_runnable(
    sched: &Arc<Scheduler>,
    w: &Arc<WorkerRecord>,
    rng: &mut DetRng,
    steal_order: &mut StealOrder,
) -> Option<(TaskId, bool)> {
    'top: loop {
        if sched.is_shutting_down() {
            return None;
        }
        if sched.gc_waiting() {
            if matches!(gc_stop_worker(sched, w), RunOutcome::Shutdown) {
                return None;
            }
            continue 'top;
        }

        let ctx_id = w
            .context()
            .unwrap_or_else(|| crate::fatal!("find_runnable without a context"));
        let ctx = sched
            .context(ctx_id)
            .unwrap_or_else(|| crate::fatal!("find_runnable on dead context {ctx_id}"));

        // Local ring.
        if let Some(found) = ctx.runq.pop() {
            return Some(found);
        }

        // Global queue.
        {
            let mut state = sched.lock_state();
            if !state.runq.is_empty() {
                let mut refill = Refill::new();
                let room = (RING_CAPACITY as u32).saturating_sub(ctx.runq.len());
                if let Some(task) =
                    state
                        .runq
                        .pop(sched.context_count(), 0, room, &mut refill)
                {
                    drop(state);
                    for extra in refill {
                        push_local(sched, &ctx, extra, false);
                    }
                    return Some((task, false));
                }
            }
        }

        // Non-blocking netpoll, cheaper than stealing when ready work is
        // already sitting in the poller.
        if sched.netpoll.initialized()
            && sched.netpoll.waiters() > 0
            && sched.last_poll().load(Ordering::Acquire) != 0
        {
            let mut list = sched.netpoll.poll(false);
            if let Some(head) = list.first().copied() {
                list.remove(0);
                inject_ready_list(sched, list);
                sched.task(head).cas_status(TaskStatus::Waiting, TaskStatus::Runnable);
                return Some((head, false));
            }
        }

        let context_count = sched.context_count();
        let idle_contexts = sched.idle_context_count();

        // Everyone else is idle: new work can only arrive from syscall
        // returns or the poller, neither of which feeds local rings.
        let all_others_idle = idle_contexts >= context_count.saturating_sub(1);

        // Spinning cap: at most one searching worker per two busy contexts.
        let spin_capped = !w.is_spinning()
            && 2 * sched.spinning_count() >= context_count.saturating_sub(idle_contexts);

        if !all_others_idle && !spin_capped {
            if !w.is_spinning() {
                w.set_spinning(true);
                sched.spinning_inc();
            }

            if steal_order.count() != context_count {
                steal_order.reset(context_count);
            }
            let contexts = sched.contexts_snapshot();
            let backoff = sched.config().steal_next_backoff;

            for round in 0..4 {
                // Rings with more than one task first; the `next` slot only
                // opens up in the late rounds.
                let steal_next = round > 2;
                for victim_index in steal_order.start(rng.next_u32()) {
                    if sched.gc_waiting() {
                        continue 'top;
                    }
                    if victim_index == ctx_id.index() {
                        continue;
                    }
                    let Some(victim) = contexts.get(victim_index as usize) else {
                        continue;
                    };
                    let stolen = victim.runq.steal_into(
                        &ctx.runq,
                        steal_next,
                        || victim.status() == ContextStatus::Running,
                        backoff,
                    );
                    if let Some(task) = stolen {
                        trace!(worker = %w.id(), victim = %victim.id(), "stole work");
                        return Some((task, false));
                    }
                }
            }
        }

        // Out of options with a context in hand. Idle-priority GC mark work
        // keeps the context busy instead of surrendering it.
        if sched.gc.mark_work_available(ctx_id) {
            let mark_task = sched
                .gc
                .find_mark_worker(ctx_id)
                .or_else(|| ctx.mark_worker());
            if let Some(mark_task) = mark_task {
                sched
                    .task(mark_task)
                    .cas_status(TaskStatus::Waiting, TaskStatus::Runnable);
                return Some((mark_task, false));
            }
        }

        // Snapshot before releasing the context; these are re-checked after
        // the spinning decrement below.
        let contexts = sched.contexts_snapshot();

        let released = {
            let mut state = sched.lock_state();
            if sched.gc_waiting() {
                drop(state);
                continue 'top;
            }
            if !state.runq.is_empty() {
                let mut refill = Refill::new();
                let room = (RING_CAPACITY as u32).saturating_sub(ctx.runq.len());
                if let Some(task) =
                    state
                        .runq
                        .pop(sched.context_count(), 0, room, &mut refill)
                {
                    drop(state);
                    for extra in refill {
                        push_local(sched, &ctx, extra, false);
                    }
                    return Some((task, false));
                }
            }
            let released = release_context(sched, w);
            sched.put_idle_context(&mut state, &released);
            released
        };
        drop(released);

        // Spinning-to-idle transition. Decrement first (SeqCst, the
        // StoreLoad barrier), then re-check all run queues: either a
        // concurrent readier observes our spin and skips the wake, or we
        // observe its push here.
        let was_spinning = w.is_spinning();
        if was_spinning {
            w.set_spinning(false);
            sched.spinning_dec();
        }

        for victim in &contexts {
            if !victim.runq.is_empty() {
                let reclaimed = {
                    let mut state = sched.lock_state();
                    sched.take_idle_context(&mut state)
                };
                if let Some(reclaimed) = reclaimed {
                    acquire_context(sched, w, reclaimed);
                    if was_spinning {
                        w.set_spinning(true);
                        sched.spinning_inc();
                    }
                    continue 'top;
                }
                break;
            }
        }

        // Blocking netpoll: the last idle worker babysits the poller. On
        // return without a reclaimable context the list is injected
        // globally and we fall through to park like everyone else.
        if sched.netpoll.initialized() && sched.netpoll.waiters() > 0 {
            let last = sched.last_poll().swap(0, Ordering::AcqRel);
            if last != 0 {
                if w.context().is_some() {
                    crate::fatal!("blocking netpoll while holding a context");
                }
                if w.is_spinning() {
                    crate::fatal!("blocking netpoll while spinning");
                }
                let list = sched.netpoll.poll(true);
                sched
                    .last_poll()
                    .store(sched.now_nanos(), Ordering::Release);
                if !list.is_empty() {
                    let reclaimed = {
                        let mut state = sched.lock_state();
                        sched.take_idle_context(&mut state)
                    };
                    match reclaimed {
                        Some(ctx_id) => {
                            acquire_context(sched, w, ctx_id);
                            let mut list = list;
                            let head = list.remove(0);
                            inject_ready_list(sched, list);
                            sched
                                .task(head)
                                .cas_status(TaskStatus::Waiting, TaskStatus::Runnable);
                            return Some((head, false));
                        }
                        None => inject_ready_list(sched, list),
                    }
                }
            }
        }

        if matches!(park_worker(sched, w), RunOutcome::Shutdown) {
            return None;
        }
    }
}

/// Clears this worker's spinning state on search exit, waking a replacement
/// if it was the last spinner and idle contexts remain. This closes the gap
/// where new work arrives between the decrement and the dispatch.
pub(crate) fn reset_spinning(sched: &Arc<Scheduler>, w: &WorkerRecord) {
    if !w.is_spinning() {
        crate::fatal!("reset_spinning on non-spinning worker {}", w.id());
    }
    w.set_spinning(false);
    let remaining = sched.spinning_dec();
    if remaining == 0 && sched.idle_context_count() > 0 {
        wake_context(sched);
    }
}

/// Wake rule for work pushed onto the global queue from outside any worker.
///
/// The spinning gate does not apply here: a spin-exiting worker re-checks
/// only the local rings, so a global push gated on "someone is spinning"
/// could be missed by the one spinner that then parks. Start a worker
/// whenever a context is idle, like a poller injection does.
pub(crate) fn wake_for_external_push(sched: &Scheduler) {
    fence(Ordering::SeqCst);
    if sched.idle_context_count() > 0 {
        start_worker(&sched.arc(), None, false);
    }
}

/// The wake rule: when readying work, start exactly one spinning worker if
/// a context is idle and nobody is searching yet.
pub(crate) fn wake_context(sched: &Scheduler) {
    // StoreLoad: the caller's queue push must be globally visible before we
    // sample the counters, pairing with the spin-exit decrement.
    fence(Ordering::SeqCst);
    if sched.idle_context_count() == 0 || sched.spinning_count() != 0 {
        return;
    }
    if !sched.spinning_try_take() {
        return;
    }
    start_worker(&sched.arc(), None, true);
}

/// Wakes an idle worker (or creates one) to own `ctx`. With `spinning`, the
/// caller has already incremented the spinning count on the new worker's
/// behalf.
pub(crate) fn start_worker(
    sched: &Arc<Scheduler>,
    ctx: Option<Arc<ContextRecord>>,
    spinning: bool,
) {
    if sched.is_shutting_down() {
        if spinning {
            sched.spinning_dec();
        }
        return;
    }

    let mut state = sched.lock_state();
    let ctx = match ctx {
        Some(ctx) => ctx,
        None => match sched.take_idle_context(&mut state) {
            Some(id) => sched
                .context(id)
                .unwrap_or_else(|| crate::fatal!("idle list held dead context {id}")),
            None => {
                drop(state);
                // No context to run on; undo the caller's optimism.
                if spinning {
                    sched.spinning_dec();
                }
                return;
            }
        },
    };
    let idle_worker = state.idle_workers.pop();
    drop(state);

    match idle_worker {
        Some(worker_id) => {
            let w = sched.worker(worker_id);
            if w.is_spinning() {
                crate::fatal!("idle worker {} has spinning set", w.id());
            }
            if w.next_context().is_some() {
                crate::fatal!("idle worker {} already has a next context", w.id());
            }
            if spinning && !ctx.runq.is_empty() {
                crate::fatal!("spinning wake of {} with runnable local tasks", w.id());
            }
            w.set_spinning(spinning);
            w.set_next_context(Some(ctx.id()));
            w.parker.unpark();
        }
        None => worker::request_worker(sched, Some(ctx.id()), spinning),
    }
}

/// Finds a home for a context released by a syscall or a lock-bound worker.
/// Must start a worker in every situation where `find_runnable` could
/// return work for it.
pub(crate) fn handoff_context(sched: &Arc<Scheduler>, ctx: Arc<ContextRecord>) {
    // Straight to a worker if it carries work.
    if !ctx.runq.is_empty() || !sched.lock_state().runq.is_empty() {
        start_worker(sched, Some(ctx), false);
        return;
    }
    if sched.gc.mark_work_available(ctx.id()) {
        start_worker(sched, Some(ctx), false);
        return;
    }
    // No local work: only help if nobody is searching or idle.
    if sched.spinning_count() + sched.idle_context_count() == 0 && sched.spinning_try_take() {
        start_worker(sched, Some(ctx), true);
        return;
    }

    let mut state = sched.lock_state();
    if sched.gc_waiting() {
        ctx.set_status(ContextStatus::Stopped);
        state.stop_wait -= 1;
        if state.stop_wait == 0 {
            sched.stop_parker().unpark();
        }
        return;
    }
    if !state.runq.is_empty() {
        drop(state);
        start_worker(sched, Some(ctx), false);
        return;
    }
    // Last busy context and the poller has waiters: someone must keep
    // polling the network.
    if sched.idle_context_count() == sched.context_count().saturating_sub(1)
        && sched.last_poll().load(Ordering::Acquire) != 0
        && sched.netpoll.initialized()
        && sched.netpoll.waiters() > 0
    {
        drop(state);
        start_worker(sched, Some(ctx), false);
        return;
    }
    sched.put_idle_context(&mut state, &ctx);
}

/// Batch-readies a poller result list into the global queue, starting
/// workers for as many as there are idle contexts.
pub(crate) fn inject_ready_list(sched: &Arc<Scheduler>, list: Vec<TaskId>) {
    if list.is_empty() {
        return;
    }
    let count = list.len();
    {
        let mut state = sched.lock_state();
        for task in list {
            sched
                .task(task)
                .cas_status(TaskStatus::Waiting, TaskStatus::Runnable);
            state.runq.push_tail(task);
        }
    }
    for _ in 0..count {
        if sched.idle_context_count() == 0 {
            break;
        }
        start_worker(sched, None, false);
    }
}

/// Parks this worker on the idle list until someone hands it a context.
pub(crate) fn park_worker(sched: &Scheduler, w: &Arc<WorkerRecord>) -> RunOutcome {
    if w.is_spinning() {
        crate::fatal!("parking spinning worker {}", w.id());
    }
    if w.context().is_some() {
        crate::fatal!("parking worker {} while holding a context", w.id());
    }
    {
        let mut state = sched.lock_state();
        state.idle_workers.push(w.id());
        sched.check_deadlock(&state);
    }
    loop {
        if sched.is_shutting_down() {
            return RunOutcome::Shutdown;
        }
        w.parker.park();
        if sched.is_shutting_down() {
            return RunOutcome::Shutdown;
        }
        if let Some(ctx) = w.take_next_context() {
            acquire_context(sched, w, ctx);
            return RunOutcome::Continue;
        }
        // Wake without a context: only real wakers pop us off the idle
        // list first, so we are still on it; sleep again.
    }
}

/// Stop-the-world gate for a worker holding a context: surrender it, account
/// the stop, and park until the world restarts.
pub(crate) fn gc_stop_worker(sched: &Scheduler, w: &Arc<WorkerRecord>) -> RunOutcome {
    if !sched.gc_waiting() {
        crate::fatal!("gc_stop_worker without a pending stop");
    }
    if w.is_spinning() {
        w.set_spinning(false);
        sched.spinning_dec();
    }
    let ctx = release_context(sched, w);
    {
        let mut state = sched.lock_state();
        ctx.set_status(ContextStatus::Stopped);
        state.stop_wait -= 1;
        if state.stop_wait == 0 {
            sched.stop_parker().unpark();
        }
    }
    park_worker(sched, w)
}

/// A lock-bound worker with a non-runnable task: hand the context away and
/// sleep until the task is readied back to us.
pub(crate) fn stop_locked_worker(
    sched: &Arc<Scheduler>,
    w: &Arc<WorkerRecord>,
    locked: TaskId,
) -> RunOutcome {
    // Always wait for the donor handshake, even if the task is already
    // Runnable somewhere in a queue: whichever worker dequeues it will
    // donate its context to us. Running it straight off our own queue would
    // let two workers race for the same task.
    if w.context().is_some() {
        let ctx = release_context(sched, w);
        handoff_context(sched, ctx);
    }
    sched.idle_locked_adjust(1);
    loop {
        if sched.is_shutting_down() {
            return RunOutcome::Shutdown;
        }
        if let Some(ctx) = w.take_next_context() {
            acquire_context(sched, w, ctx);
            break;
        }
        w.parker.park();
    }
    let status = sched.task(locked).status();
    if status != TaskStatus::Runnable {
        crate::fatal!("lock-bound worker {} woken with task in state {status}", w.id());
    }
    RunOutcome::Continue
}

/// Dispatch found a task lock-bound to another worker: donate our context to
/// it and park ourselves.
pub(crate) fn start_locked_worker(
    sched: &Arc<Scheduler>,
    w: &Arc<WorkerRecord>,
    task_id: TaskId,
) -> RunOutcome {
    let Some(target) = sched.task(task_id).locked_worker() else {
        crate::fatal!("start_locked_worker on unbound task {task_id}");
    };
    if target == w.id() {
        crate::fatal!("task {} lock-bound to the dispatching worker", task_id);
    }
    let target_worker = sched.worker(target);
    if target_worker.next_context().is_some() {
        crate::fatal!("lock-bound worker {} already has a next context", target);
    }
    sched.idle_locked_adjust(-1);
    let ctx = release_context(sched, w);
    target_worker.set_next_context(Some(ctx.id()));
    target_worker.parker.unpark();
    park_worker(sched, w)
}
