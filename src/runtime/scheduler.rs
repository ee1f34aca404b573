//! Global scheduler state.
//!
//! One [`Scheduler`] owns everything: the task/worker/context tables, the
//! scheduler mutex over [`SchedState`] (global queue, idle lists, STW
//! counters, deferred worker spawns), and the atomic counters the lock-free
//! paths coordinate through. All module-level state reaches through the
//! handle; there are no hidden singletons.
//!
//! Lock discipline: `state` is the scheduler mutex of the design; it
//! protects every non-lock-free transition. The atomic counters
//! (`spinning_workers`, `idle_context_count`, `gc_waiting`) are read outside
//! the lock but only mutated in the protocols described in the dispatch
//! module.

use parking_lot::{Condvar, Mutex, RwLock};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, trace};

use crate::config::SchedConfig;
use crate::error::{Error, ErrorKind};
use crate::types::{ContextId, ContextStatus, TaskId, TaskStatus, WorkerId};
use crate::util::HandleArena;

use super::context::{ContextRecord, FREE_STASH_CAP, RUN_ID_BATCH};
use super::coroutine::TaskCoroutine;
use super::dispatch;
use super::gc::{GcHooks, NullGc};
use super::global_queue::GlobalQueue;
use super::monitor;
use super::netpoll::{NetPoller, NoopPoller};
use super::stack::StackPolicy;
use super::task::{self, TaskRecord};
use super::worker::{self, Parker, PendingWorker, WorkerRecord};

/// State guarded by the scheduler mutex.
pub(crate) struct SchedState {
    /// The global FIFO run queue.
    pub(crate) runq: GlobalQueue,
    /// Parked workers, most recently parked last.
    pub(crate) idle_workers: Vec<WorkerId>,
    /// Unowned contexts with empty rings.
    pub(crate) idle_contexts: Vec<ContextId>,
    /// Contexts still missing from a stop-the-world.
    pub(crate) stop_wait: i32,
    /// Context count to apply at the next start-the-world.
    pub(crate) pending_resize: Option<usize>,
    /// Worker spawns deferred to the template worker.
    pub(crate) pending_workers: Vec<PendingWorker>,
    /// Dead task records spilled from per-context stashes.
    pub(crate) free_tasks: Vec<TaskId>,
}

/// Binary semaphore serializing stop-the-world sections.
struct WorldGate {
    stopped: Mutex<bool>,
    cvar: Condvar,
}

impl WorldGate {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut stopped = self.stopped.lock();
        while *stopped {
            self.cvar.wait(&mut stopped);
        }
        *stopped = true;
    }

    fn release(&self) {
        let mut stopped = self.stopped.lock();
        *stopped = false;
        self.cvar.notify_one();
    }
}

/// Point-in-time counters for observability and tests.
#[derive(Debug, Clone)]
pub struct SchedSnapshot {
    /// Configured context count.
    pub contexts: usize,
    /// Contexts on the idle list.
    pub idle_contexts: usize,
    /// Workers ever created.
    pub workers: usize,
    /// Workers parked on the idle list.
    pub idle_workers: usize,
    /// Workers currently spinning.
    pub spinning_workers: usize,
    /// Length of the global run queue.
    pub global_queue: usize,
    /// Live (spawned, not yet dead) user tasks.
    pub live_tasks: usize,
    /// Per-context local queue lengths.
    pub context_queues: Vec<u32>,
}

/// The M:N scheduler.
///
/// Created once via [`Scheduler::new`]; cloned freely as `Arc<Scheduler>`.
/// Worker OS threads, the monitor, and the template worker all hold the
/// handle and exit on [`Scheduler::shutdown`].
pub struct Scheduler {
    cfg: SchedConfig,
    stack_policy: StackPolicy,
    epoch: Instant,

    pub(crate) tasks: HandleArena<TaskRecord>,
    pub(crate) workers: HandleArena<WorkerRecord>,
    contexts: RwLock<Vec<Arc<ContextRecord>>>,

    state: crate::util::ContendedMutex<SchedState>,

    /// Workers whose spinning flag is set. Mutated with SeqCst RMWs: the
    /// decrement on spin-exit is the StoreLoad barrier the ready/wake
    /// handshake depends on.
    spinning_workers: AtomicU32,
    /// Mirrors `SchedState::idle_contexts.len()`, readable without the lock.
    idle_context_count: AtomicU32,
    /// Workers parked while lock-bound, plus transient monitor adjustments.
    idle_locked_workers: AtomicI32,
    /// A stop-the-world is pending; dispatch loops must stop.
    gc_waiting: AtomicBool,
    /// The monitor is deep-sleeping and wants a wake on syscall entry.
    monitor_asleep: AtomicBool,
    /// Nanosecond timestamp of the last netpoll; 0 while a worker is blocked
    /// inside one.
    last_poll: AtomicU64,
    run_id_gen: AtomicU64,
    live_user_tasks: AtomicU32,
    max_workers: AtomicUsize,
    shutting_down: AtomicBool,

    monitor_parker: Parker,
    template_parker: Parker,
    stop_parker: Parker,
    world: WorldGate,

    pub(crate) netpoll: Arc<dyn NetPoller>,
    pub(crate) gc: Arc<dyn GcHooks>,

    threads: Mutex<Vec<JoinHandle<()>>>,
    self_ref: Weak<Scheduler>,
}

impl Scheduler {
    /// Creates a scheduler with no-op collaborators.
    pub fn new(cfg: SchedConfig) -> Result<Arc<Self>, Error> {
        Self::with_collaborators(cfg, Arc::new(NoopPoller), Arc::new(NullGc))
    }

    /// Creates a scheduler wired to a network poller and GC hooks.
    pub fn with_collaborators(
        cfg: SchedConfig,
        netpoll: Arc<dyn NetPoller>,
        gc: Arc<dyn GcHooks>,
    ) -> Result<Arc<Self>, Error> {
        cfg.validate()?;

        let sched = Arc::new_cyclic(|self_ref| {
            let mut contexts = Vec::with_capacity(cfg.max_contexts);
            let mut idle = Vec::with_capacity(cfg.max_contexts);
            for i in 0..cfg.max_contexts {
                contexts.push(Arc::new(ContextRecord::new(
                    ContextId::from_index(i as u32),
                    ContextStatus::Idle,
                )));
                idle.push(ContextId::from_index(i as u32));
            }
            // Newest contexts are acquired first; matches the idle list
            // being used as a stack.
            idle.reverse();
            let idle_count = idle.len() as u32;

            Scheduler {
                stack_policy: StackPolicy::new(cfg.stack_size),
                epoch: Instant::now(),
                tasks: HandleArena::new(),
                workers: HandleArena::new(),
                contexts: RwLock::new(contexts),
                state: crate::util::ContendedMutex::new(
                    "sched",
                    SchedState {
                        runq: GlobalQueue::new(),
                        idle_workers: Vec::new(),
                        idle_contexts: idle,
                        stop_wait: 0,
                        pending_resize: None,
                        pending_workers: Vec::new(),
                        free_tasks: Vec::new(),
                    },
                ),
                spinning_workers: AtomicU32::new(0),
                idle_context_count: AtomicU32::new(idle_count),
                idle_locked_workers: AtomicI32::new(0),
                gc_waiting: AtomicBool::new(false),
                monitor_asleep: AtomicBool::new(false),
                last_poll: AtomicU64::new(1),
                run_id_gen: AtomicU64::new(0),
                live_user_tasks: AtomicU32::new(0),
                max_workers: AtomicUsize::new(cfg.max_workers),
                shutting_down: AtomicBool::new(false),
                monitor_parker: Parker::new(),
                template_parker: Parker::new(),
                stop_parker: Parker::new(),
                world: WorldGate::new(),
                netpoll,
                gc,
                threads: Mutex::new(Vec::new()),
                self_ref: self_ref.clone(),
                cfg,
            }
        });

        sched.last_poll.store(sched.now_nanos(), Ordering::Release);

        // Background threads: the monitor and the template worker.
        let for_monitor = Arc::clone(&sched);
        let handle = std::thread::Builder::new()
            .name("switchyard-monitor".into())
            .spawn(move || monitor::monitor_main(&for_monitor))
            .map_err(|e| Error::with_detail(ErrorKind::StackExhausted, e.to_string()))?;
        sched.adopt_thread(handle);

        let for_template = Arc::clone(&sched);
        let handle = std::thread::Builder::new()
            .name("switchyard-template".into())
            .spawn(move || worker::template_main(&for_template))
            .map_err(|e| Error::with_detail(ErrorKind::StackExhausted, e.to_string()))?;
        sched.adopt_thread(handle);

        debug!(contexts = sched.cfg.max_contexts, "scheduler initialized");
        Ok(sched)
    }

    pub(crate) fn arc(&self) -> Arc<Scheduler> {
        self.self_ref
            .upgrade()
            .unwrap_or_else(|| crate::fatal!("scheduler used after drop"))
    }

    pub(crate) fn config(&self) -> &SchedConfig {
        &self.cfg
    }

    /// Nanoseconds since scheduler construction, offset so 0 stays reserved
    /// as the "blocked in netpoll" marker.
    pub(crate) fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64 + 1
    }

    // --- record tables -----------------------------------------------------

    pub(crate) fn task(&self, id: TaskId) -> Arc<TaskRecord> {
        self.tasks
            .get(id.index())
            .unwrap_or_else(|| crate::fatal!("dangling task handle {id}"))
    }

    /// The current run id of a task record (changes when the record is
    /// reused for a new spawn).
    #[must_use]
    pub fn task_run_id(&self, id: TaskId) -> u64 {
        self.task(id).run_id()
    }

    pub(crate) fn worker(&self, id: WorkerId) -> Arc<WorkerRecord> {
        self.workers
            .get(id.index())
            .unwrap_or_else(|| crate::fatal!("dangling worker handle {id}"))
    }

    pub(crate) fn context(&self, id: ContextId) -> Option<Arc<ContextRecord>> {
        self.contexts.read().get(id.index() as usize).cloned()
    }

    pub(crate) fn context_count(&self) -> u32 {
        self.contexts.read().len() as u32
    }

    pub(crate) fn contexts_snapshot(&self) -> Vec<Arc<ContextRecord>> {
        self.contexts.read().clone()
    }

    pub(crate) fn contexts_table(&self) -> &RwLock<Vec<Arc<ContextRecord>>> {
        &self.contexts
    }

    // --- counters ----------------------------------------------------------

    pub(crate) fn lock_state(&self) -> parking_lot::MutexGuard<'_, SchedState> {
        self.state.lock()
    }

    pub(crate) fn spinning_count(&self) -> u32 {
        self.spinning_workers.load(Ordering::SeqCst)
    }

    pub(crate) fn spinning_inc(&self) {
        self.spinning_workers.fetch_add(1, Ordering::SeqCst);
    }

    /// Attempts the 0 -> 1 transition that elects a single waker.
    pub(crate) fn spinning_try_take(&self) -> bool {
        self.spinning_workers
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Decrements the spinning count; the SeqCst RMW is the StoreLoad
    /// barrier of the spin-exit double-check.
    pub(crate) fn spinning_dec(&self) -> u32 {
        let prev = self.spinning_workers.fetch_sub(1, Ordering::SeqCst);
        if prev == 0 {
            crate::fatal!("negative spinning-worker count");
        }
        prev - 1
    }

    pub(crate) fn idle_context_count(&self) -> u32 {
        self.idle_context_count.load(Ordering::SeqCst)
    }

    pub(crate) fn gc_waiting(&self) -> bool {
        self.gc_waiting.load(Ordering::SeqCst)
    }

    pub(crate) fn set_gc_waiting(&self, value: bool) {
        self.gc_waiting.store(value, Ordering::SeqCst);
    }

    pub(crate) fn last_poll(&self) -> &AtomicU64 {
        &self.last_poll
    }

    pub(crate) fn monitor_parker(&self) -> &Parker {
        &self.monitor_parker
    }

    pub(crate) fn template_parker(&self) -> &Parker {
        &self.template_parker
    }

    pub(crate) fn stop_parker(&self) -> &Parker {
        &self.stop_parker
    }

    pub(crate) fn world_acquire(&self) {
        self.world.acquire();
    }

    pub(crate) fn world_release(&self) {
        self.world.release();
    }

    pub(crate) fn monitor_asleep(&self) -> bool {
        self.monitor_asleep.load(Ordering::Acquire)
    }

    pub(crate) fn set_monitor_asleep(&self, value: bool) {
        self.monitor_asleep.store(value, Ordering::Release);
    }

    /// Wakes the monitor out of deep sleep if it is there.
    pub(crate) fn wake_monitor(&self) {
        if self.monitor_asleep() {
            let _guard = self.lock_state();
            if self.monitor_asleep() {
                self.set_monitor_asleep(false);
                self.monitor_parker.unpark();
            }
        }
    }

    /// Adjusts the idle-locked-worker count consumed by deadlock detection.
    /// Incrementing re-runs the check, as a parked worker would.
    pub(crate) fn idle_locked_adjust(&self, delta: i32) {
        self.idle_locked_workers.fetch_add(delta, Ordering::SeqCst);
        if delta > 0 {
            let state = self.lock_state();
            self.check_deadlock(&state);
        }
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    // --- idle-context list -------------------------------------------------

    /// Puts a context on the idle list. The context must have an empty ring:
    /// idle contexts are invisible to stealing.
    pub(crate) fn put_idle_context(&self, state: &mut SchedState, ctx: &ContextRecord) {
        if !ctx.runq.is_empty() {
            crate::fatal!("idling context {} with runnable tasks", ctx.id());
        }
        state.idle_contexts.push(ctx.id());
        self.idle_context_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn take_idle_context(&self, state: &mut SchedState) -> Option<ContextId> {
        let id = state.idle_contexts.pop()?;
        self.idle_context_count.fetch_sub(1, Ordering::SeqCst);
        Some(id)
    }

    // --- workers -----------------------------------------------------------

    pub(crate) fn allocate_worker(&self) -> Arc<WorkerRecord> {
        let limit = self.max_workers.load(Ordering::Relaxed);
        if self.workers.len() >= limit {
            crate::fatal!("worker count exceeds max_workers={limit}");
        }
        let (_, record) = self
            .workers
            .push_with(|h| WorkerRecord::new(WorkerId::from_index(h)));
        record
    }

    pub(crate) fn adopt_thread(&self, handle: JoinHandle<()>) {
        self.threads.lock().push(handle);
    }

    pub(crate) fn defer_worker_spawn(&self, pending: PendingWorker) {
        self.lock_state().pending_workers.push(pending);
        self.template_parker.unpark();
    }

    pub(crate) fn take_pending_workers(&self) -> Vec<PendingWorker> {
        std::mem::take(&mut self.lock_state().pending_workers)
    }

    /// Adjusts the worker-thread cap, returning the previous value. Fatal if
    /// the live worker count already exceeds the new cap.
    pub fn set_max_workers(&self, limit: usize) -> Result<usize, Error> {
        if limit == 0 {
            return Err(Error::new(ErrorKind::InvalidWorkerLimit));
        }
        let old = self.max_workers.swap(limit, Ordering::Relaxed);
        if self.workers.len() > limit {
            crate::fatal!(
                "worker count {} exceeds new max_workers={limit}",
                self.workers.len()
            );
        }
        Ok(old)
    }

    // --- spawning ----------------------------------------------------------

    /// Spawns a task running `entry`.
    ///
    /// From inside a task, the new task lands in the spawning context's
    /// `next` slot (it is the likeliest to run soonest); from any other
    /// thread it goes to the global queue. Either way a worker is woken if
    /// one is idle and nobody is already spinning.
    pub fn spawn<F>(&self, entry: F) -> Result<TaskId, Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_inner(entry, true)
    }

    /// Spawns a scheduler-internal task, invisible to deadlock detection.
    /// Collaborators use this for background mark workers.
    pub fn spawn_system<F>(&self, entry: F) -> Result<TaskId, Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_inner(entry, false)
    }

    fn spawn_inner<F>(&self, entry: F, user: bool) -> Result<TaskId, Error>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shutting_down() {
            return Err(Error::new(ErrorKind::ShuttingDown));
        }
        let stack = self.stack_policy.allocate()?;

        let id = match self.current_dispatch_context() {
            Some((worker, ctx)) => {
                let id = self.take_free_task(Some(ctx.as_ref()));
                let run_id = self.next_run_id(Some(ctx.as_ref()));
                let record = self.task(id);
                record.prepare_spawn(run_id, user, self.build_coroutine(&record, stack, entry));
                if user {
                    self.live_user_tasks.fetch_add(1, Ordering::SeqCst);
                }
                trace!(task = %id, run_id, worker = %worker, "spawned locally");
                dispatch::push_local(self, &ctx, id, true);
                id
            }
            None => {
                // External spawn: publish Runnable and enqueue under the
                // scheduler mutex so deadlock detection never observes a
                // runnable task that is not yet queued.
                let mut state = self.lock_state();
                let id = match state.free_tasks.pop() {
                    Some(id) => id,
                    None => {
                        let (h, _) = self
                            .tasks
                            .push_with(|h| TaskRecord::new(TaskId::from_index(h)));
                        TaskId::from_index(h)
                    }
                };
                let run_id = self.run_id_gen.fetch_add(1, Ordering::Relaxed) + 1;
                let record = self.task(id);
                record.prepare_spawn(run_id, user, self.build_coroutine(&record, stack, entry));
                if user {
                    self.live_user_tasks.fetch_add(1, Ordering::SeqCst);
                }
                state.runq.push_tail(id);
                drop(state);
                trace!(task = %id, run_id, "spawned externally");
                dispatch::wake_for_external_push(self);
                return Ok(id);
            }
        };

        dispatch::wake_context(self);
        Ok(id)
    }

    fn build_coroutine<F>(
        &self,
        record: &Arc<TaskRecord>,
        stack: corosensei::stack::DefaultStack,
        entry: F,
    ) -> TaskCoroutine
    where
        F: FnOnce() + Send + 'static,
    {
        let weak = Arc::downgrade(record);
        TaskCoroutine::new(stack, move |yielder| {
            if let Some(record) = weak.upgrade() {
                record.set_yielder(yielder as *const _ as usize);
            }
            entry();
        })
    }

    /// The (worker, context) pair of the calling thread, when it is a worker
    /// of this scheduler actively dispatching (not detached in a syscall).
    fn current_dispatch_context(&self) -> Option<(WorkerId, Arc<ContextRecord>)> {
        let current = task::try_current()?;
        if !std::ptr::eq(Arc::as_ptr(&current.sched), self) {
            return None;
        }
        let worker = self.worker(current.worker);
        let ctx = self.context(worker.context()?)?;
        if ctx.owner() != Some(current.worker) {
            return None;
        }
        Some((current.worker, ctx))
    }

    /// Pops a reusable dead record, preferring the context's stash, then the
    /// global free list, finally allocating a fresh record.
    ///
    /// The stash mutex and the scheduler mutex are never held together:
    /// the refill moves records through a local buffer.
    fn take_free_task(&self, ctx: Option<&ContextRecord>) -> TaskId {
        if let Some(ctx) = ctx {
            if let Some(id) = ctx.free_stash().dead.pop() {
                return id;
            }
            // Stash empty: refill up to half its cap from the global list.
            let refill: SmallVec<[TaskId; 32]> = {
                let mut state = self.lock_state();
                let take = state.free_tasks.len().min(FREE_STASH_CAP / 2);
                let from = state.free_tasks.len() - take;
                state.free_tasks.drain(from..).collect()
            };
            if !refill.is_empty() {
                let mut stash = ctx.free_stash();
                stash.dead.extend(refill);
                if let Some(id) = stash.dead.pop() {
                    return id;
                }
            }
        }
        let (h, _) = self
            .tasks
            .push_with(|h| TaskRecord::new(TaskId::from_index(h)));
        TaskId::from_index(h)
    }

    /// Draws a run id from the context's batch, refilling from the global
    /// generator when exhausted.
    fn next_run_id(&self, ctx: Option<&ContextRecord>) -> u64 {
        if let Some(ctx) = ctx {
            let mut stash = ctx.free_stash();
            if stash.run_id_next == stash.run_id_end {
                let base = self.run_id_gen.fetch_add(RUN_ID_BATCH, Ordering::Relaxed);
                stash.run_id_next = base + 1;
                stash.run_id_end = base + RUN_ID_BATCH + 1;
            }
            let id = stash.run_id_next;
            stash.run_id_next += 1;
            id
        } else {
            self.run_id_gen.fetch_add(1, Ordering::Relaxed) + 1
        }
    }

    /// Returns a dead task record to the free lists (per-context stash,
    /// spilling half to the global list when full).
    pub(crate) fn free_task(&self, ctx: &ContextRecord, task: TaskId) {
        let record = self.task(task);
        if record.is_user() {
            self.live_user_tasks.fetch_sub(1, Ordering::SeqCst);
        }
        let mut stash = ctx.free_stash();
        stash.dead.push(task);
        if stash.dead.len() > FREE_STASH_CAP {
            let spill_from = stash.dead.len() / 2;
            let spilled: SmallVec<[TaskId; 32]> = stash.dead.drain(spill_from..).collect();
            drop(stash);
            self.lock_state().free_tasks.extend(spilled);
        }
    }

    // --- readying ----------------------------------------------------------

    /// Transitions a Waiting task to Runnable and queues it: into the
    /// calling context's `next` slot when called from a task, else onto the
    /// global queue. Wakes a worker per the spinning protocol.
    pub fn ready(&self, task_id: TaskId) {
        match self.current_dispatch_context() {
            Some((_, ctx)) => {
                let record = self.task(task_id);
                record.cas_status(TaskStatus::Waiting, TaskStatus::Runnable);
                record.set_wait_reason("");
                dispatch::push_local(self, &ctx, task_id, true);
            }
            None => {
                let mut state = self.lock_state();
                let record = self.task(task_id);
                record.cas_status(TaskStatus::Waiting, TaskStatus::Runnable);
                record.set_wait_reason("");
                state.runq.push_tail(task_id);
                drop(state);
                dispatch::wake_for_external_push(self);
                return;
            }
        }
        dispatch::wake_context(self);
    }

    /// Registers `task` as the background mark worker of `ctx` (consumed by
    /// idle-time GC dispatch in `find_runnable`).
    pub fn set_mark_worker(&self, ctx: ContextId, task: Option<TaskId>) {
        if let Some(record) = self.context(ctx) {
            record.set_mark_worker(task);
        }
    }

    /// Requests cooperative preemption of `task`: the next [`task::yield_check`]
    /// it executes diverts to the scheduler.
    pub(crate) fn preempt(&self, task_id: TaskId) {
        self.task(task_id).request_preempt();
    }

    // --- deadlock detection ------------------------------------------------

    /// Aborts when every worker is idle yet live user tasks remain. Runs
    /// under the scheduler mutex whenever a worker parks or the idle-locked
    /// count rises.
    pub(crate) fn check_deadlock(&self, state: &SchedState) {
        if self.gc_waiting() {
            // The stopper thread counts as progress: workers idling during
            // a stop-the-world are expected, not deadlocked.
            return;
        }
        let total = self.workers.len() as i64;
        let idle = state.idle_workers.len() as i64;
        let locked = i64::from(self.idle_locked_workers.load(Ordering::SeqCst));
        let running = total - idle - locked;
        if running > 0 {
            return;
        }
        if running < 0 {
            crate::fatal!(
                "inconsistent worker counts: total={total} idle={idle} locked={locked}"
            );
        }
        if self.live_user_tasks.load(Ordering::SeqCst) == 0 {
            // Nothing spawned or everything finished; an idle scheduler is
            // not a deadlock.
            return;
        }
        let mut blocked = 0usize;
        let mut pending = 0usize;
        self.tasks.for_each(|_, record| {
            if !record.is_user() {
                return;
            }
            match record.status() {
                TaskStatus::Waiting => blocked += 1,
                TaskStatus::Runnable | TaskStatus::Running | TaskStatus::Syscall => pending += 1,
                TaskStatus::Idle | TaskStatus::Dead => {}
            }
        });
        if pending > 0 {
            crate::fatal!("deadlock check found {pending} ready tasks with no running workers");
        }
        if blocked > 0 {
            crate::fatal!("all tasks are blocked - deadlock!");
        }
    }

    // --- world control -----------------------------------------------------

    /// Stops every context; returns once the world is stopped. See the stw
    /// module for the protocol.
    pub fn stop_the_world(&self, reason: &'static str) {
        super::stw::stop_the_world(self, reason);
    }

    /// Restarts the world after [`Scheduler::stop_the_world`].
    pub fn start_the_world(&self) {
        super::stw::start_the_world(self);
    }

    /// Changes the context count, returning the previous value. Reuses the
    /// stop-the-world machinery; expensive.
    pub fn set_max_contexts(&self, n: usize) -> Result<usize, Error> {
        if n == 0 || n > crate::config::MAX_CONTEXTS {
            return Err(Error::with_detail(
                ErrorKind::InvalidContextCount,
                format!("requested {n}"),
            ));
        }
        let old = self.context_count() as usize;
        self.stop_the_world("resize contexts");
        self.lock_state().pending_resize = Some(n);
        self.start_the_world();
        Ok(old)
    }

    // --- observability -----------------------------------------------------

    /// Counters snapshot; consistent enough for assertions at quiescence.
    #[must_use]
    pub fn snapshot(&self) -> SchedSnapshot {
        let state = self.lock_state();
        let contexts = self.contexts_snapshot();
        SchedSnapshot {
            contexts: contexts.len(),
            idle_contexts: state.idle_contexts.len(),
            workers: self.workers.len(),
            idle_workers: state.idle_workers.len(),
            spinning_workers: self.spinning_count() as usize,
            global_queue: state.runq.len(),
            live_tasks: self.live_user_tasks.load(Ordering::SeqCst) as usize,
            context_queues: contexts.iter().map(|c| c.runq.len()).collect(),
        }
    }

    /// Live user task count (spawned and not yet dead).
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.live_user_tasks.load(Ordering::SeqCst) as usize
    }

    /// True when every context is Stopped and no task is mid-execution;
    /// holds between [`Scheduler::stop_the_world`] and
    /// [`Scheduler::start_the_world`].
    #[must_use]
    pub fn world_stopped(&self) -> bool {
        let contexts_stopped = self
            .contexts_snapshot()
            .iter()
            .all(|ctx| ctx.status() == ContextStatus::Stopped);
        if !contexts_stopped {
            return false;
        }
        let mut running = false;
        self.tasks.for_each(|_, record| {
            if record.status() == TaskStatus::Running {
                running = true;
            }
        });
        !running
    }

    // --- shutdown ----------------------------------------------------------

    /// Stops accepting work, wakes every thread, and joins them. Tasks that
    /// never yield will block the join; this is the exceptional-teardown
    /// path, not a cancellation mechanism.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("scheduler shutting down");
        self.monitor_parker.unpark();
        self.template_parker.unpark();
        self.stop_parker.unpark();
        self.workers.for_each(|_, w| w.parker.unpark());

        loop {
            let drained: Vec<JoinHandle<()>> = std::mem::take(&mut *self.threads.lock());
            if drained.is_empty() {
                break;
            }
            for handle in drained {
                let _ = handle.join();
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("contexts", &self.context_count())
            .field("workers", &self.workers.len())
            .field("spinning", &self.spinning_count())
            .field("idle_contexts", &self.idle_context_count())
            .finish_non_exhaustive()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // All Arcs are held by threads we join in shutdown(); reaching drop
        // without shutdown means the embedder leaked threads intentionally
        // (process exit) and there is nothing left to do.
    }
}
