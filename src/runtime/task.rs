//! Task records and the task-facing API.
//!
//! A [`TaskRecord`] is pooled storage for one task: atomic status word,
//! run id, preemption guard, lock affinity, and the suspended coroutine.
//! Records live forever in the scheduler's task table; death puts them on a
//! free list and reuse assigns a fresh run id.
//!
//! The free functions in this module are the API visible to code running
//! *inside* a task: [`yield_now`], [`park`], [`enter_syscall`] /
//! [`exit_syscall`], [`lock_to_thread`], and the preemption point
//! [`yield_check`]. They resolve the calling task through a thread-local
//! set by the worker around each resume; calling them from a non-task
//! thread is a fatal scheduler misuse.

use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::types::status::TASK_SCAN_BIT;
use crate::types::{TaskId, TaskStatus, WorkerId, RAW_NONE};

use super::coroutine::{self, ParkUnlock, SwitchReason, TaskCoroutine};
use super::scheduler::Scheduler;
use super::syscall;

/// Guard word of a task that may keep running.
pub(crate) const STACK_GUARD_READY: u64 = 0;
/// Sentinel written by [`Scheduler::preempt`]; the next [`yield_check`]
/// diverts to the preemption slow path.
pub(crate) const STACK_GUARD_PREEMPT: u64 = u64::MAX;

/// Pooled per-task state.
pub(crate) struct TaskRecord {
    id: TaskId,
    /// Monotonic run id, reassigned on every reuse of this record.
    run_id: AtomicU64,
    /// [`TaskStatus`] word, possibly with the scan overlay bit.
    status: AtomicU32,
    /// False for scheduler-internal tasks (GC mark workers); those are
    /// invisible to deadlock detection.
    user: AtomicBool,
    /// Preemption request flag; always set before the guard sentinel.
    preempt: AtomicBool,
    /// Guard word compared by [`yield_check`].
    stack_guard: AtomicU64,
    /// Worker currently executing this task (Running or Syscall only).
    owner: AtomicU32,
    /// Lock affinity: the only worker allowed to run this task.
    locked_worker: AtomicU32,
    /// Why a Waiting task is blocked; schedtrace only.
    wait_reason: Mutex<&'static str>,
    /// Address of the live coroutine's yielder; 0 when no coroutine.
    yielder: AtomicUsize,
    /// Suspended execution state. Taken by the resuming worker, restored on
    /// suspension.
    coroutine: Mutex<Option<TaskCoroutine>>,
}

impl TaskRecord {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            id,
            run_id: AtomicU64::new(0),
            status: AtomicU32::new(TaskStatus::Idle.as_raw()),
            user: AtomicBool::new(true),
            preempt: AtomicBool::new(false),
            stack_guard: AtomicU64::new(STACK_GUARD_READY),
            owner: AtomicU32::new(RAW_NONE),
            locked_worker: AtomicU32::new(RAW_NONE),
            wait_reason: Mutex::new(""),
            yielder: AtomicUsize::new(0),
            coroutine: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn run_id(&self) -> u64 {
        self.run_id.load(Ordering::Relaxed)
    }

    pub(crate) fn is_user(&self) -> bool {
        self.user.load(Ordering::Relaxed)
    }

    /// Re-initializes a fresh or free-listed record for a new spawn and
    /// installs its coroutine. The record must be Idle or Dead.
    pub(crate) fn prepare_spawn(&self, run_id: u64, user: bool, coroutine: TaskCoroutine) {
        let current = self.status();
        if !matches!(current, TaskStatus::Idle | TaskStatus::Dead) {
            crate::fatal!("spawning into live task record {}: {current}", self.id);
        }
        self.run_id.store(run_id, Ordering::Relaxed);
        self.user.store(user, Ordering::Relaxed);
        self.preempt.store(false, Ordering::Relaxed);
        self.stack_guard.store(STACK_GUARD_READY, Ordering::Relaxed);
        self.owner.store(RAW_NONE, Ordering::Relaxed);
        self.locked_worker.store(RAW_NONE, Ordering::Relaxed);
        *self.wait_reason.lock() = "";
        self.yielder.store(0, Ordering::Relaxed);
        let mut slot = self.coroutine.lock();
        debug_assert!(slot.is_none(), "spawn over live coroutine");
        *slot = Some(coroutine);
        drop(slot);
        // Publish Runnable last; the record may be observed the instant the
        // status flips.
        self.status
            .store(TaskStatus::Runnable.as_raw(), Ordering::Release);
    }

    pub(crate) fn status(&self) -> TaskStatus {
        TaskStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    /// Transitions `old -> new`, spinning while the scan overlay pins the
    /// status. Any other mismatch is a broken invariant and fatal.
    pub(crate) fn cas_status(&self, old: TaskStatus, new: TaskStatus) {
        debug_assert_ne!(old, new);
        let mut spins = 0u32;
        loop {
            match self.status.compare_exchange(
                old.as_raw(),
                new.as_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) if observed == old.as_raw() | TASK_SCAN_BIT => {
                    // Pinned by a stack scan; wait it out.
                    status_backoff(&mut spins);
                }
                Err(observed) => {
                    crate::fatal!(
                        "invalid status transition for {}: {} -> {} but found {}",
                        self.id,
                        old,
                        new,
                        TaskStatus::from_raw(observed),
                    );
                }
            }
        }
    }

    pub(crate) fn owner(&self) -> Option<WorkerId> {
        WorkerId::decode(self.owner.load(Ordering::Acquire))
    }

    pub(crate) fn set_owner(&self, worker: Option<WorkerId>) {
        self.owner.store(WorkerId::encode(worker), Ordering::Release);
    }

    pub(crate) fn locked_worker(&self) -> Option<WorkerId> {
        WorkerId::decode(self.locked_worker.load(Ordering::Acquire))
    }

    pub(crate) fn set_locked_worker(&self, worker: Option<WorkerId>) {
        self.locked_worker
            .store(WorkerId::encode(worker), Ordering::Release);
    }

    pub(crate) fn wait_reason(&self) -> &'static str {
        *self.wait_reason.lock()
    }

    pub(crate) fn set_wait_reason(&self, reason: &'static str) {
        *self.wait_reason.lock() = reason;
    }

    /// Requests cooperative preemption: flag first, then the guard sentinel
    /// so a tripped guard always implies a visible flag.
    pub(crate) fn request_preempt(&self) {
        self.preempt.store(true, Ordering::Release);
        self.stack_guard
            .store(STACK_GUARD_PREEMPT, Ordering::Release);
    }

    pub(crate) fn clear_preempt(&self) {
        self.stack_guard.store(STACK_GUARD_READY, Ordering::Release);
        self.preempt.store(false, Ordering::Release);
    }

    pub(crate) fn preempt_requested(&self) -> bool {
        self.preempt.load(Ordering::Acquire)
    }

    pub(crate) fn stack_guard(&self) -> u64 {
        self.stack_guard.load(Ordering::Acquire)
    }

    pub(crate) fn set_yielder(&self, addr: usize) {
        self.yielder.store(addr, Ordering::Release);
    }

    pub(crate) fn yielder_addr(&self) -> usize {
        self.yielder.load(Ordering::Acquire)
    }

    /// Moves the coroutine out for resumption. Only the owning worker calls
    /// this, and only for a Runnable task it is about to run.
    pub(crate) fn take_coroutine(&self) -> Option<TaskCoroutine> {
        self.coroutine.lock().take()
    }

    /// Restores the coroutine after a suspension.
    pub(crate) fn store_coroutine(&self, coroutine: TaskCoroutine) {
        let mut slot = self.coroutine.lock();
        debug_assert!(slot.is_none());
        *slot = Some(coroutine);
    }

    /// Drops the coroutine (unwinding its stack) without running the task.
    pub(crate) fn discard_coroutine(&self) {
        let dropped = self.coroutine.lock().take();
        drop(dropped);
        self.yielder.store(0, Ordering::Release);
    }

    /// Marks the record dead and clears transient state, keeping it ready
    /// for free-list reuse.
    pub(crate) fn finish(&self) {
        self.set_owner(None);
        self.set_locked_worker(None);
        *self.wait_reason.lock() = "";
        self.yielder.store(0, Ordering::Release);
        self.clear_preempt();
    }
}

impl std::fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("run_id", &self.run_id())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Bounded backoff for scan-pinned status words: brief spin, then yield the
/// OS slice.
fn status_backoff(spins: &mut u32) {
    if *spins < 64 {
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
    *spins += 1;
}

// ---------------------------------------------------------------------------
// Current-task context
// ---------------------------------------------------------------------------

/// Identity of the task executing on this thread, set by the worker around
/// each resume.
#[derive(Clone)]
pub(crate) struct CurrentTask {
    pub(crate) sched: Arc<Scheduler>,
    pub(crate) worker: WorkerId,
    pub(crate) task: TaskId,
}

thread_local! {
    static CURRENT: RefCell<Option<CurrentTask>> = const { RefCell::new(None) };
}

/// Installs the current-task context for the duration of a resume.
pub(crate) fn set_current(current: CurrentTask) {
    CURRENT.with(|slot| *slot.borrow_mut() = Some(current));
}

/// Clears the current-task context after a resume returns.
pub(crate) fn clear_current() {
    CURRENT.with(|slot| *slot.borrow_mut() = None);
}

/// Clones the current-task context, if this thread is executing a task.
///
/// The clone is taken and the borrow released before returning, so callers
/// are free to suspend afterwards.
pub(crate) fn try_current() -> Option<CurrentTask> {
    CURRENT.with(|slot| slot.borrow().clone())
}

fn require_current(what: &str) -> CurrentTask {
    match try_current() {
        Some(current) => current,
        None => crate::fatal!("{what} called outside a task (on a scheduler stack)"),
    }
}

/// Suspends the calling task with `reason`. Must only be called from task
/// code (the coroutine published its yielder at entry).
pub(crate) fn suspend_current(current: &CurrentTask, reason: SwitchReason) {
    let record = current.sched.task(current.task);
    let addr = record.yielder_addr();
    if addr == 0 {
        crate::fatal!("suspending {} with no live coroutine", current.task);
    }
    drop(record);
    // Safety: `addr` was published by this task's own coroutine body and
    // stays valid until the coroutine completes; we are executing inside
    // that coroutine right now.
    unsafe {
        coroutine::suspend(addr as *const _, reason);
    }
}

// ---------------------------------------------------------------------------
// Task-facing API
// ---------------------------------------------------------------------------

/// Handle of the task executing on this thread, if any.
#[must_use]
pub fn current() -> Option<TaskId> {
    try_current().map(|c| c.task)
}

/// Scheduler owning the task executing on this thread, if any.
#[must_use]
pub fn current_scheduler() -> Option<Arc<Scheduler>> {
    try_current().map(|c| c.sched)
}

/// Yields the processor, moving the calling task to the back of the global
/// queue and starting a fresh timeslice for whatever runs next.
pub fn yield_now() {
    let current = require_current("yield_now");
    suspend_current(&current, SwitchReason::Yielded);
}

/// Cooperative preemption point.
///
/// Stands in for the stack-growth prologue the original code generator
/// inserts at function entries: compares the task's guard word and diverts
/// to the preemption slow path when the monitor has set the sentinel. Cheap
/// enough to call inside loops.
pub fn yield_check() {
    let Some(current) = try_current() else {
        return;
    };
    let record = current.sched.task(current.task);
    match record.stack_guard() {
        STACK_GUARD_READY => {}
        STACK_GUARD_PREEMPT => {
            if !record.preempt_requested() {
                crate::fatal!("stack guard corrupt for {}: sentinel without request", current.task);
            }
            drop(record);
            suspend_current(&current, SwitchReason::Preempted);
        }
        other => crate::fatal!("stack guard corrupt for {}: {other:#x}", current.task),
    }
}

/// Blocks the calling task until [`Scheduler::ready`] is called on it.
pub fn park(reason: &'static str) {
    let current = require_current("park");
    suspend_current(
        &current,
        SwitchReason::Parked {
            reason,
            unlock: None,
        },
    );
}

/// Blocks the calling task, running `unlock` on the scheduler stack after
/// the task is marked Waiting.
///
/// `unlock` typically releases the lock that protects the wait condition;
/// returning false vetoes the park and the task resumes immediately. This
/// ordering closes the lost-wakeup window: a racing `ready` observes the
/// task as Waiting only after it is safely parked.
pub fn park_unlock<F>(reason: &'static str, unlock: F)
where
    F: FnOnce(TaskId) -> bool + Send + 'static,
{
    let current = require_current("park");
    let unlock: ParkUnlock = Box::new(unlock);
    suspend_current(
        &current,
        SwitchReason::Parked {
            reason,
            unlock: Some(unlock),
        },
    );
}

/// Terminates the calling task immediately, unwinding its stack.
pub fn exit() {
    let current = require_current("exit");
    suspend_current(&current, SwitchReason::Exited);
    // The worker unwinds the coroutine instead of resuming it.
    unreachable!("task resumed after exit");
}

/// Declares that the calling task is about to make a potentially blocking
/// system call. The worker thread keeps running the task through the call;
/// the context is released for reuse. Pair with [`exit_syscall`].
pub fn enter_syscall() {
    let current = require_current("enter_syscall");
    syscall::enter_syscall(&current);
}

/// Like [`enter_syscall`], for calls known to block: the context is handed
/// to another worker eagerly instead of waiting for the monitor to retake
/// it.
pub fn enter_syscall_blocking() {
    let current = require_current("enter_syscall_blocking");
    syscall::enter_syscall_blocking(&current);
}

/// Declares that the system call finished. Reacquires an execution context,
/// parking the task if none is available.
pub fn exit_syscall() {
    let current = require_current("exit_syscall");
    syscall::exit_syscall(&current);
}

/// Pins the calling task to its current worker: from now on it runs only on
/// this OS thread, and the thread runs only this task.
pub fn lock_to_thread() {
    let current = require_current("lock_to_thread");
    let record = current.sched.task(current.task);
    let worker = current.sched.worker(current.worker);
    record.set_locked_worker(Some(current.worker));
    worker.set_locked_task(Some(current.task));
}

/// Releases a [`lock_to_thread`] pinning.
pub fn unlock_from_thread() {
    let current = require_current("unlock_from_thread");
    let record = current.sched.task(current.task);
    let worker = current.sched.worker(current.worker);
    record.set_locked_worker(None);
    worker.set_locked_task(None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_starts_idle_and_unowned() {
        let record = TaskRecord::new(TaskId::from_index(0));
        assert_eq!(record.status(), TaskStatus::Idle);
        assert_eq!(record.owner(), None);
        assert_eq!(record.locked_worker(), None);
        assert_eq!(record.wait_reason(), "");
    }

    #[test]
    fn preempt_request_sets_flag_before_sentinel() {
        let record = TaskRecord::new(TaskId::from_index(1));
        record.request_preempt();
        assert_eq!(record.stack_guard(), STACK_GUARD_PREEMPT);
        assert!(record.preempt_requested());
        record.clear_preempt();
        assert_eq!(record.stack_guard(), STACK_GUARD_READY);
        assert!(!record.preempt_requested());
    }

    #[test]
    fn cas_waits_out_scan_overlay() {
        let record = Arc::new(TaskRecord::new(TaskId::from_index(2)));
        record.status.store(
            TaskStatus::Runnable.as_raw() | TASK_SCAN_BIT,
            Ordering::Release,
        );
        let pinned = Arc::clone(&record);
        let scanner = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(5));
            pinned
                .status
                .store(TaskStatus::Runnable.as_raw(), Ordering::Release);
        });
        record.cas_status(TaskStatus::Runnable, TaskStatus::Running);
        scanner.join().unwrap();
        assert_eq!(record.status(), TaskStatus::Running);
    }

    #[test]
    #[should_panic(expected = "invalid status transition")]
    fn cas_mismatch_is_fatal() {
        let record = TaskRecord::new(TaskId::from_index(3));
        record.cas_status(TaskStatus::Running, TaskStatus::Waiting);
    }

    #[test]
    fn api_is_inert_off_task() {
        assert_eq!(current(), None);
        assert!(current_scheduler().is_none());
        // yield_check is explicitly a no-op off-task: prologues may run in
        // host code paths during tests.
        yield_check();
    }
}
