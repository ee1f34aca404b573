//! Worker threads.
//!
//! A worker is an OS thread that may execute tasks. Its native stack is the
//! scheduler stack: the dispatch loop runs there between tasks. Workers are
//! created on demand when there is work and a free context, park on the
//! idle-worker list when there is nothing to do, and are woken with a
//! "next context" to bind.
//!
//! Spawning an OS thread from an unsafe context (a worker that is
//! lock-bound to a task) is delegated to the *template worker*, a long-lived
//! thread in a known-good state that drains a queue of pending spawn
//! requests.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::types::{ContextId, TaskId, WorkerId, RAW_NONE};

use super::scheduler::Scheduler;
use super::task;

/// Park/unpark primitive for one worker (and for the monitor and
/// stop-the-world notes). One pending notification is remembered, so an
/// unpark that races ahead of the park is not lost.
pub(crate) struct Parker {
    notified: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
}

impl Parker {
    pub(crate) fn new() -> Self {
        Self {
            notified: AtomicBool::new(false),
            lock: Mutex::new(()),
            cvar: Condvar::new(),
        }
    }

    /// Blocks until notified, consuming the notification.
    pub(crate) fn park(&self) {
        if self.consume() {
            return;
        }
        let mut guard = self.lock.lock();
        while !self.consume() {
            self.cvar.wait(&mut guard);
        }
    }

    /// Blocks until notified or `timeout` elapses. Returns true when the
    /// wait ended by notification.
    pub(crate) fn park_timeout(&self, timeout: Duration) -> bool {
        if self.consume() {
            return true;
        }
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.lock.lock();
        loop {
            if self.consume() {
                return true;
            }
            if self.cvar.wait_until(&mut guard, deadline).timed_out() {
                return self.consume();
            }
        }
    }

    /// Wakes the parked thread (or arms the next park).
    pub(crate) fn unpark(&self) {
        self.notified.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.cvar.notify_one();
    }

    fn consume(&self) -> bool {
        self.notified
            .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

impl std::fmt::Debug for Parker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parker")
            .field("notified", &self.notified.load(Ordering::Relaxed))
            .finish()
    }
}

/// Per-worker state.
pub(crate) struct WorkerRecord {
    id: WorkerId,
    pub(crate) parker: Parker,
    /// Out of work and actively searching; counted in `spinning_workers`.
    spinning: AtomicBool,
    /// Context currently held. Stays set through a syscall so the fast exit
    /// path can try to reclaim it, even though the context itself is
    /// detached (its owner field is cleared).
    ctx: AtomicU32,
    /// Context to bind on the next wakeup, set by whoever unparks us.
    next_ctx: AtomicU32,
    /// Task currently executing on this worker.
    cur_task: AtomicU32,
    /// Lock affinity: the only task this worker may run.
    locked_task: AtomicU32,
}

impl WorkerRecord {
    pub(crate) fn new(id: WorkerId) -> Self {
        Self {
            id,
            parker: Parker::new(),
            spinning: AtomicBool::new(false),
            ctx: AtomicU32::new(RAW_NONE),
            next_ctx: AtomicU32::new(RAW_NONE),
            cur_task: AtomicU32::new(RAW_NONE),
            locked_task: AtomicU32::new(RAW_NONE),
        }
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn is_spinning(&self) -> bool {
        self.spinning.load(Ordering::Acquire)
    }

    pub(crate) fn set_spinning(&self, value: bool) {
        self.spinning.store(value, Ordering::Release);
    }

    pub(crate) fn context(&self) -> Option<ContextId> {
        ContextId::decode(self.ctx.load(Ordering::Acquire))
    }

    pub(crate) fn set_context(&self, ctx: Option<ContextId>) {
        self.ctx.store(ContextId::encode(ctx), Ordering::Release);
    }

    pub(crate) fn next_context(&self) -> Option<ContextId> {
        ContextId::decode(self.next_ctx.load(Ordering::Acquire))
    }

    pub(crate) fn set_next_context(&self, ctx: Option<ContextId>) {
        self.next_ctx
            .store(ContextId::encode(ctx), Ordering::Release);
    }

    /// Takes the wakeup context, leaving the slot empty.
    pub(crate) fn take_next_context(&self) -> Option<ContextId> {
        ContextId::decode(self.next_ctx.swap(RAW_NONE, Ordering::AcqRel))
    }

    pub(crate) fn current_task(&self) -> Option<TaskId> {
        TaskId::decode(self.cur_task.load(Ordering::Acquire))
    }

    pub(crate) fn set_current_task(&self, task: Option<TaskId>) {
        self.cur_task.store(TaskId::encode(task), Ordering::Release);
    }

    pub(crate) fn locked_task(&self) -> Option<TaskId> {
        TaskId::decode(self.locked_task.load(Ordering::Acquire))
    }

    pub(crate) fn set_locked_task(&self, task: Option<TaskId>) {
        self.locked_task
            .store(TaskId::encode(task), Ordering::Release);
    }
}

impl std::fmt::Debug for WorkerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRecord")
            .field("id", &self.id)
            .field("spinning", &self.is_spinning())
            .field("ctx", &self.context())
            .field("cur_task", &self.current_task())
            .field("locked_task", &self.locked_task())
            .finish()
    }
}

/// A worker-spawn request parked on the template worker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingWorker {
    pub(crate) next_ctx: Option<ContextId>,
    pub(crate) spinning: bool,
}

/// Creates a worker record and its OS thread.
///
/// `next_ctx`/`spinning` seed the new worker exactly as a wakeup would:
/// the caller has already accounted the spinning transition.
pub(crate) fn spawn_worker_thread(
    sched: &Arc<Scheduler>,
    next_ctx: Option<ContextId>,
    spinning: bool,
) {
    let record = sched.allocate_worker();
    record.set_next_context(next_ctx);
    record.set_spinning(spinning);
    trace!(worker = %record.id(), ?next_ctx, spinning, "spawning worker thread");

    let thread_sched = Arc::clone(sched);
    let thread_worker = Arc::clone(&record);
    let handle = std::thread::Builder::new()
        .name(format!("switchyard-worker-{}", record.id().index()))
        .spawn(move || super::dispatch::worker_main(&thread_sched, &thread_worker))
        .unwrap_or_else(|err| crate::fatal!("failed to spawn worker thread: {err}"));
    sched.adopt_thread(handle);
}

/// Creates a worker, routing through the template worker when the calling
/// thread is not safe to spawn from (it is lock-bound to a task).
pub(crate) fn request_worker(
    sched: &Arc<Scheduler>,
    next_ctx: Option<ContextId>,
    spinning: bool,
) {
    let unsafe_spawn = task::try_current()
        .map(|current| {
            Arc::ptr_eq(&current.sched, sched)
                && sched.worker(current.worker).locked_task().is_some()
        })
        .unwrap_or(false);

    if unsafe_spawn {
        sched.defer_worker_spawn(PendingWorker { next_ctx, spinning });
    } else {
        spawn_worker_thread(sched, next_ctx, spinning);
    }
}

/// Body of the template worker: drains deferred spawn requests handed over
/// by lock-bound workers.
pub(crate) fn template_main(sched: &Arc<Scheduler>) {
    loop {
        sched.template_parker().park();
        if sched.is_shutting_down() {
            return;
        }
        for pending in sched.take_pending_workers() {
            spawn_worker_thread(sched, pending.next_ctx, pending.spinning);
        }
    }
}
