//! Stackful task bodies.
//!
//! Each task runs inside a `corosensei` coroutine on its own dedicated
//! stack; the worker's OS-thread stack is the scheduler stack. A task
//! suspends by yielding a [`SwitchReason`] that tells the dispatch loop,
//! back on the scheduler stack, which transition to perform. The fast
//! syscall paths never suspend: the worker thread carries the task through
//! the blocking call and only the context changes hands.

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};

use crate::types::TaskId;

/// Why a task yielded control back to the scheduler stack.
pub(crate) enum SwitchReason {
    /// Explicit yield (or global-queue requeue after preemption is folded
    /// into [`SwitchReason::Preempted`]).
    Yielded,
    /// The guard-word check failed with the preempt sentinel set.
    Preempted,
    /// The task is blocking; the worker must run `unlock` after the status
    /// flip. If `unlock` returns false the park is abandoned and the task
    /// resumes immediately with an inherited timeslice.
    Parked {
        reason: &'static str,
        unlock: Option<ParkUnlock>,
    },
    /// Syscall exit failed to reacquire a context; the worker must requeue
    /// the task globally and park.
    ExitedSyscall,
    /// Explicit early termination; the worker unwinds the task stack.
    Exited,
}

/// Callback run on the scheduler stack after a parking task has been marked
/// Waiting. Returning false vetoes the park.
pub(crate) type ParkUnlock = Box<dyn FnOnce(TaskId) -> bool + Send>;

impl std::fmt::Debug for SwitchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yielded => f.write_str("Yielded"),
            Self::Preempted => f.write_str("Preempted"),
            Self::Parked { reason, unlock } => f
                .debug_struct("Parked")
                .field("reason", reason)
                .field("has_unlock", &unlock.is_some())
                .finish(),
            Self::ExitedSyscall => f.write_str("ExitedSyscall"),
            Self::Exited => f.write_str("Exited"),
        }
    }
}

/// Outcome of resuming a task.
pub(crate) enum TaskSwitch {
    /// The task suspended; handle the reason and keep the coroutine.
    Suspended(SwitchReason),
    /// The task's body returned; the task is finished.
    Finished,
}

/// A task's suspended execution state: the coroutine plus its stack.
///
/// This is the "saved register state" of the task model. It is moved out of
/// the task record by the worker that resumes the task and moved back in on
/// suspension, so exactly one thread touches it at a time.
pub(crate) struct TaskCoroutine {
    inner: Coroutine<(), SwitchReason, (), DefaultStack>,
}

impl TaskCoroutine {
    /// Builds a coroutine on `stack`. `body` receives the yielder so the
    /// caller can publish its address before running user code.
    pub(crate) fn new<F>(stack: DefaultStack, body: F) -> Self
    where
        F: FnOnce(&Yielder<(), SwitchReason>) + Send + 'static,
    {
        Self {
            inner: Coroutine::with_stack(stack, move |yielder, ()| {
                body(yielder);
            }),
        }
    }

    /// Resumes the task until its next suspension point or completion.
    pub(crate) fn resume(&mut self) -> TaskSwitch {
        match self.inner.resume(()) {
            CoroutineResult::Yield(reason) => TaskSwitch::Suspended(reason),
            CoroutineResult::Return(()) => TaskSwitch::Finished,
        }
    }

    /// Whether the body has returned.
    pub(crate) fn is_finished(&self) -> bool {
        self.inner.done()
    }

    /// Unwinds a suspended task stack, running destructors of everything
    /// live on it. Used for explicit task exit and scheduler teardown.
    pub(crate) fn unwind(&mut self) {
        if !self.inner.done() {
            self.inner.force_unwind();
        }
    }
}

impl Drop for TaskCoroutine {
    fn drop(&mut self) {
        // A task dropped mid-suspension still owns live values on its stack;
        // unwind so their destructors run before the stack is freed.
        self.unwind();
    }
}

// Safety: the captured body is `Send + 'static`, the stack is plain owned
// memory, and the scheduler guarantees a suspended coroutine is resumed by
// at most one worker at a time (a Running task is owned by exactly one
// worker). Nothing thread-affine crosses the stack switch.
unsafe impl Send for TaskCoroutine {}

/// Suspends the calling task with `reason`.
///
/// # Safety
///
/// `yielder` must be the address published by the running coroutine's own
/// body; it is valid for as long as the coroutine has not completed, and
/// only the code currently executing inside that coroutine may call this.
pub(crate) unsafe fn suspend(yielder: *const Yielder<(), SwitchReason>, reason: SwitchReason) {
    debug_assert!(!yielder.is_null());
    let yielder = unsafe { &*yielder };
    yielder.suspend(reason);
}
