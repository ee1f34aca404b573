//! Per-context local run queue.
//!
//! A fixed 256-slot ring of task handles plus a single-slot `next` priority
//! hint. The owning worker is the only producer; consumers are the owner
//! (pop) and thieves (half-steals). The ring is lock-free: the producer
//! publishes the tail with a release store, consumers commit with a CAS on
//! the head. Overflow spills half the ring plus the incoming task to the
//! global queue, keeping spare capacity on both sides of the handoff.
//!
//! Handles are dense `u32`s, so slots are plain `AtomicU32`s and the whole
//! structure needs no unsafe code.

use crate::types::{TaskId, RAW_NONE};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Ring capacity. Must stay a power of two so slot indexing is a cheap mask,
/// and small enough that a full spill (half the ring) is a bounded burst on
/// the global queue.
pub const RING_CAPACITY: usize = 256;

const CAP: u32 = RING_CAPACITY as u32;

/// Result of a `pop`: the task plus whether it came from the `next` slot and
/// should inherit the current timeslice (the dispatch tick is not advanced).
pub(crate) type Popped = (TaskId, bool);

/// The local run queue of one context.
pub(crate) struct LocalQueue {
    /// First unconsumed slot. Advanced by CAS from owner and thieves.
    head: AtomicU32,
    /// Next free slot. Written only by the owning worker (release), read by
    /// thieves (acquire).
    tail: AtomicU32,
    /// Single-slot priority hint; `RAW_NONE` when empty.
    next: AtomicU32,
    ring: [AtomicU32; RING_CAPACITY],
}

impl LocalQueue {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            next: AtomicU32::new(RAW_NONE),
            ring: std::array::from_fn(|_| AtomicU32::new(RAW_NONE)),
        }
    }

    /// Enqueues `task`.
    ///
    /// With `favor_next` the task goes into the `next` slot and the previous
    /// occupant (if any) is the one actually pushed onto the ring. If the
    /// ring is full, returns the overflow batch (half the ring plus the
    /// incoming task, in queue order) which the caller must append to the
    /// global queue.
    ///
    /// Only the owning worker may call this.
    #[must_use]
    pub(crate) fn push(&self, task: TaskId, favor_next: bool) -> Option<Vec<TaskId>> {
        let mut task = task;
        if favor_next {
            let mut old = self.next.load(Ordering::Relaxed);
            loop {
                match self.next.compare_exchange(
                    old,
                    task.index(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(current) => old = current,
                }
            }
            match TaskId::decode(old) {
                // Slot was empty; nothing to spill into the ring.
                None => return None,
                // Kick the previous occupant out to the ring.
                Some(previous) => task = previous,
            }
        }

        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Relaxed);
            if tail.wrapping_sub(head) < CAP {
                self.ring[(tail % CAP) as usize].store(task.index(), Ordering::Relaxed);
                self.tail.store(tail.wrapping_add(1), Ordering::Release);
                return None;
            }
            if let Some(batch) = self.push_overflow(task, head, tail) {
                return Some(batch);
            }
            // Lost the overflow CAS to a concurrent steal; the ring has room
            // again, so retry the ordinary enqueue.
        }
    }

    /// Takes half the ring plus `task` for the global queue. Fails (returns
    /// `None`) if a concurrent consumer moved the head first.
    fn push_overflow(&self, task: TaskId, head: u32, tail: u32) -> Option<Vec<TaskId>> {
        let n = tail.wrapping_sub(head) / 2;
        if n != CAP / 2 {
            crate::fatal!("local queue overflow with inconsistent occupancy: n={n}");
        }
        let mut batch = Vec::with_capacity(n as usize + 1);
        for i in 0..n {
            let slot = self.ring[(head.wrapping_add(i) % CAP) as usize].load(Ordering::Relaxed);
            batch.push(TaskId::from_index(slot));
        }
        if self
            .head
            .compare_exchange(head, head.wrapping_add(n), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        batch.push(task);
        Some(batch)
    }

    /// Dequeues the highest-priority local task: the `next` slot first (the
    /// caller inherits the timeslice), then the ring head.
    ///
    /// Only the owning worker may call this.
    pub(crate) fn pop(&self) -> Option<Popped> {
        loop {
            let next = self.next.load(Ordering::Relaxed);
            let Some(task) = TaskId::decode(next) else {
                break;
            };
            if self
                .next
                .compare_exchange(next, RAW_NONE, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some((task, true));
            }
        }

        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Relaxed);
            if tail == head {
                return None;
            }
            let slot = self.ring[(head % CAP) as usize].load(Ordering::Relaxed);
            if self
                .head
                .compare_exchange(head, head.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some((TaskId::from_index(slot), false));
            }
        }
    }

    /// Steals half of this queue into `thief`'s ring and returns one of the
    /// stolen tasks.
    ///
    /// `steal_next` additionally permits taking the victim's `next` slot
    /// when the ring is empty; in that case, if `owner_running()` reports
    /// the victim's worker as actively dispatching, the thief backs off for
    /// `next_backoff` first (yielding when no backoff is configured) so an
    /// owner that is about to dispatch its own `next` is not thrashed.
    ///
    /// Only `thief`'s owning worker may call this.
    pub(crate) fn steal_into<F>(
        &self,
        thief: &LocalQueue,
        steal_next: bool,
        owner_running: F,
        next_backoff: Option<Duration>,
    ) -> Option<TaskId>
    where
        F: Fn() -> bool,
    {
        let thief_tail = thief.tail.load(Ordering::Relaxed);
        let n = self.grab_into(thief, thief_tail, steal_next, owner_running, next_backoff);
        if n == 0 {
            return None;
        }
        let n = n - 1;
        let last = thief.ring[(thief_tail.wrapping_add(n) % CAP) as usize].load(Ordering::Relaxed);
        let task = TaskId::from_index(last);
        if n == 0 {
            // Single task: hand it straight to the thief without publishing.
            return Some(task);
        }
        let thief_head = thief.head.load(Ordering::Acquire);
        if thief_tail.wrapping_sub(thief_head).wrapping_add(n) >= CAP {
            crate::fatal!("thief ring overflow during steal");
        }
        thief.tail.store(thief_tail.wrapping_add(n), Ordering::Release);
        Some(task)
    }

    /// Copies `ceil(len/2)` tasks from this queue into `thief`'s ring at
    /// `dst`, committing with a CAS on this queue's head. Returns the number
    /// grabbed.
    fn grab_into<F>(
        &self,
        thief: &LocalQueue,
        dst: u32,
        steal_next: bool,
        owner_running: F,
        next_backoff: Option<Duration>,
    ) -> u32
    where
        F: Fn() -> bool,
    {
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            let len = tail.wrapping_sub(head);
            let n = len - len / 2;
            if n == 0 {
                if steal_next {
                    let next = self.next.load(Ordering::Relaxed);
                    if next != RAW_NONE {
                        if owner_running() {
                            // The owner readied this task moments ago and is
                            // likely about to dispatch it; give it a window
                            // before thrashing the task between contexts.
                            match next_backoff {
                                Some(pause) if !pause.is_zero() => std::thread::sleep(pause),
                                _ => std::thread::yield_now(),
                            }
                        }
                        if self
                            .next
                            .compare_exchange(next, RAW_NONE, Ordering::AcqRel, Ordering::Acquire)
                            .is_err()
                        {
                            continue;
                        }
                        thief.ring[(dst % CAP) as usize].store(next, Ordering::Relaxed);
                        return 1;
                    }
                }
                return 0;
            }
            if n > CAP / 2 {
                // Inconsistent head/tail snapshot; re-read.
                continue;
            }
            for i in 0..n {
                let slot =
                    self.ring[(head.wrapping_add(i) % CAP) as usize].load(Ordering::Relaxed);
                thief.ring[(dst.wrapping_add(i) % CAP) as usize].store(slot, Ordering::Relaxed);
            }
            if self
                .head
                .compare_exchange(head, head.wrapping_add(n), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return n;
            }
        }
    }

    /// True when both the ring and the `next` slot are empty.
    ///
    /// Callable from any thread. The tail is confirmed stable across the
    /// reads so a concurrent push/pop pair cannot produce a false positive.
    pub(crate) fn is_empty(&self) -> bool {
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            let next = self.next.load(Ordering::Relaxed);
            if tail == self.tail.load(Ordering::Acquire) {
                return head == tail && next == RAW_NONE;
            }
        }
    }

    /// Approximate number of queued tasks (ring plus `next` slot). Exact
    /// when no concurrent operations are in flight.
    pub(crate) fn len(&self) -> u32 {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        let next = u32::from(self.next.load(Ordering::Relaxed) != RAW_NONE);
        tail.wrapping_sub(head) + next
    }

    /// Drains every queued task in priority order (`next` first, then ring
    /// FIFO). Owner-only; used when a context is being torn down under
    /// stop-the-world.
    pub(crate) fn drain(&self) -> Vec<TaskId> {
        let mut out = Vec::with_capacity(self.len() as usize);
        while let Some((task, _)) = self.pop() {
            out.push(task);
        }
        out
    }
}

impl std::fmt::Debug for LocalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalQueue")
            .field("len", &self.len())
            .field("has_next", &(self.next.load(Ordering::Relaxed) != RAW_NONE))
            .finish()
    }
}
