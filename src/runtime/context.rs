//! Execution contexts.
//!
//! A context is the transferable right to execute user code. There are at
//! most `max_contexts` of them; a worker must hold one (status Running) to
//! dispatch tasks, releases it around blocking syscalls (status Syscall),
//! and stop-the-world drives every context to Stopped.
//!
//! Each context exclusively owns its local run queue, dead-task stash, and
//! run-id cache; everything else on the record is atomic so the monitor and
//! thieves can observe it without coordination.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::types::{ContextId, ContextStatus, TaskId, WorkerId, RAW_NONE};

use super::run_queue::LocalQueue;

/// Dead task records stashed on a context before spilling to the global
/// free list.
pub(crate) const FREE_STASH_CAP: usize = 64;

/// Run ids are pulled from the global generator in batches of this size so
/// spawns rarely touch shared state.
pub(crate) const RUN_ID_BATCH: u64 = 16;

/// Monitor-private snapshot of a context's progress counters.
///
/// `retake` compares the live tick against the snapshot: an unchanged tick
/// across two observations means the context made no progress in between.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct MonitorTick {
    pub(crate) sched_tick: u32,
    pub(crate) sched_when: u64,
    pub(crate) syscall_tick: u32,
    pub(crate) syscall_when: u64,
}

/// Per-context free resources: dead task records and a run-id batch.
#[derive(Debug, Default)]
pub(crate) struct FreeStash {
    pub(crate) dead: Vec<TaskId>,
    pub(crate) run_id_next: u64,
    pub(crate) run_id_end: u64,
}

/// One execution context.
pub(crate) struct ContextRecord {
    id: ContextId,
    status: AtomicU32,
    /// Local run queue; SPMC between the owning worker and thieves.
    pub(crate) runq: LocalQueue,
    /// Incremented per dispatched timeslice; stalls signal preemption.
    /// Dispatches off the `next` slot inherit the running timeslice and do
    /// not advance this.
    sched_tick: AtomicU32,
    /// Incremented on every dispatch round, inherited or not; drives the
    /// periodic global-queue fairness sample. A pair of tasks respawning
    /// each other through the `next` slot never advances `sched_tick`, so
    /// fairness needs its own clock.
    dispatch_seq: AtomicU32,
    /// Incremented when a syscall episode ends (fast exit, retake, eager
    /// handoff); stalls signal a stuck syscall.
    syscall_tick: AtomicU32,
    /// Worker owning this context; `RAW_NONE` while idle or in a syscall.
    owner: AtomicU32,
    /// GC background mark task bound to this context, if the collector
    /// registered one.
    mark_worker: AtomicU32,
    monitor: Mutex<MonitorTick>,
    free: Mutex<FreeStash>,
}

impl ContextRecord {
    pub(crate) fn new(id: ContextId, status: ContextStatus) -> Self {
        Self {
            id,
            status: AtomicU32::new(status.as_raw()),
            runq: LocalQueue::new(),
            sched_tick: AtomicU32::new(0),
            dispatch_seq: AtomicU32::new(0),
            syscall_tick: AtomicU32::new(0),
            owner: AtomicU32::new(RAW_NONE),
            mark_worker: AtomicU32::new(RAW_NONE),
            monitor: Mutex::new(MonitorTick::default()),
            free: Mutex::new(FreeStash::default()),
        }
    }

    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    pub(crate) fn status(&self) -> ContextStatus {
        ContextStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: ContextStatus) {
        self.status.store(status.as_raw(), Ordering::Release);
    }

    /// Single-winner status transition; the syscall-retake and
    /// stop-the-world races are settled here.
    pub(crate) fn cas_status(&self, old: ContextStatus, new: ContextStatus) -> bool {
        self.status
            .compare_exchange(
                old.as_raw(),
                new.as_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn owner(&self) -> Option<WorkerId> {
        WorkerId::decode(self.owner.load(Ordering::Acquire))
    }

    pub(crate) fn set_owner(&self, worker: Option<WorkerId>) {
        self.owner.store(WorkerId::encode(worker), Ordering::Release);
    }

    pub(crate) fn sched_tick(&self) -> u32 {
        self.sched_tick.load(Ordering::Relaxed)
    }

    pub(crate) fn bump_sched_tick(&self) {
        self.sched_tick.fetch_add(1, Ordering::Relaxed);
    }

    /// Advances the dispatch-round counter, returning the new value.
    pub(crate) fn bump_dispatch_seq(&self) -> u32 {
        self.dispatch_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn syscall_tick(&self) -> u32 {
        self.syscall_tick.load(Ordering::Relaxed)
    }

    pub(crate) fn bump_syscall_tick(&self) {
        self.syscall_tick.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_worker(&self) -> Option<TaskId> {
        TaskId::decode(self.mark_worker.load(Ordering::Acquire))
    }

    pub(crate) fn set_mark_worker(&self, task: Option<TaskId>) {
        self.mark_worker
            .store(TaskId::encode(task), Ordering::Release);
    }

    pub(crate) fn monitor_tick(&self) -> parking_lot::MutexGuard<'_, MonitorTick> {
        self.monitor.lock()
    }

    pub(crate) fn free_stash(&self) -> parking_lot::MutexGuard<'_, FreeStash> {
        self.free.lock()
    }

    /// Empties the dead-task stash; used when the context is destroyed.
    pub(crate) fn flush_free_stash(&self) -> Vec<TaskId> {
        std::mem::take(&mut self.free.lock().dead)
    }
}

impl std::fmt::Debug for ContextRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRecord")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("owner", &self.owner())
            .field("runq", &self.runq)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_cas_single_winner() {
        let ctx = ContextRecord::new(ContextId::from_index(0), ContextStatus::Syscall);
        assert!(ctx.cas_status(ContextStatus::Syscall, ContextStatus::Idle));
        assert!(!ctx.cas_status(ContextStatus::Syscall, ContextStatus::Running));
        assert_eq!(ctx.status(), ContextStatus::Idle);
    }

    #[test]
    fn ticks_are_independent() {
        let ctx = ContextRecord::new(ContextId::from_index(1), ContextStatus::Idle);
        ctx.bump_sched_tick();
        ctx.bump_sched_tick();
        ctx.bump_syscall_tick();
        assert_eq!(ctx.sched_tick(), 2);
        assert_eq!(ctx.syscall_tick(), 1);
    }

    #[test]
    fn free_stash_flush_empties() {
        let ctx = ContextRecord::new(ContextId::from_index(2), ContextStatus::Idle);
        ctx.free_stash().dead.push(TaskId::from_index(4));
        assert_eq!(ctx.flush_free_stash(), vec![TaskId::from_index(4)]);
        assert!(ctx.free_stash().dead.is_empty());
    }
}
