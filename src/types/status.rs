//! Task and context state machines.
//!
//! Status words live in `AtomicU32` fields and every transition is a CAS;
//! the enums here define the encoding. Task status additionally carries a
//! *scan overlay* bit: an external collaborator (the garbage collector's
//! stack scanner) may pin a task's status by OR-ing in [`TASK_SCAN_BIT`],
//! and transitions must spin until the overlay clears.

use core::fmt;

/// Scan overlay bit OR-ed into a task status word while the task's stack is
/// being scanned. Transitions observing the overlay retry; they never mutate
/// a pinned status.
pub const TASK_SCAN_BIT: u32 = 0x1000;

/// Life-cycle states of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TaskStatus {
    /// Just allocated, not yet initialized.
    Idle = 0,
    /// On a run queue, ready to execute.
    Runnable = 1,
    /// Executing on a worker.
    Running = 2,
    /// Inside a (potentially) blocking system call; not on a run queue.
    Syscall = 3,
    /// Blocked; will be readied by the subsystem it waits on.
    Waiting = 4,
    /// Terminated; record is on a free list awaiting reuse.
    Dead = 5,
}

impl TaskStatus {
    /// Decodes a status word with the scan overlay masked off.
    ///
    /// Fatal on unknown encodings, which can only come from memory
    /// corruption.
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        match raw & !TASK_SCAN_BIT {
            0 => Self::Idle,
            1 => Self::Runnable,
            2 => Self::Running,
            3 => Self::Syscall,
            4 => Self::Waiting,
            5 => Self::Dead,
            other => panic!("corrupt task status word: {other:#x}"),
        }
    }

    /// Raw encoding without overlay.
    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    /// Short name used by schedtrace.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Runnable => "runnable",
            Self::Running => "running",
            Self::Syscall => "syscall",
            Self::Waiting => "waiting",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Life-cycle states of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ContextStatus {
    /// Unowned; on the idle-context list or in transit to a worker.
    Idle = 0,
    /// Owned by a worker that is dispatching or running a task.
    Running = 1,
    /// Released across a blocking system call; reclaimable by the original
    /// worker (fast path) or the monitor (retake).
    Syscall = 2,
    /// Parked by stop-the-world; no worker may acquire it until the world
    /// restarts.
    Stopped = 3,
    /// Removed by a context resize.
    Dead = 4,
}

impl ContextStatus {
    /// Decodes a raw status word. Fatal on unknown encodings.
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Syscall,
            3 => Self::Stopped,
            4 => Self::Dead,
            other => panic!("corrupt context status word: {other:#x}"),
        }
    }

    /// Raw encoding.
    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    /// Short name used by schedtrace.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Syscall => "syscall",
            Self::Stopped => "stopped",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_round_trip() {
        for status in [
            TaskStatus::Idle,
            TaskStatus::Runnable,
            TaskStatus::Running,
            TaskStatus::Syscall,
            TaskStatus::Waiting,
            TaskStatus::Dead,
        ] {
            assert_eq!(TaskStatus::from_raw(status.as_raw()), status);
            assert_eq!(TaskStatus::from_raw(status.as_raw() | TASK_SCAN_BIT), status);
        }
    }

    #[test]
    fn context_status_round_trip() {
        for status in [
            ContextStatus::Idle,
            ContextStatus::Running,
            ContextStatus::Syscall,
            ContextStatus::Stopped,
            ContextStatus::Dead,
        ] {
            assert_eq!(ContextStatus::from_raw(status.as_raw()), status);
        }
    }

    #[test]
    fn scan_bit_does_not_collide_with_statuses() {
        assert!(TaskStatus::Dead.as_raw() < TASK_SCAN_BIT);
    }
}
