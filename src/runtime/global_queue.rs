//! Global run queue.
//!
//! A FIFO of runnable tasks guarded by the scheduler mutex (it lives inside
//! [`super::scheduler::SchedState`]). Local-ring overflow arrives here in
//! batches; dispatch samples it every `global_queue_interval` ticks for
//! fairness; and `pop` amortizes the lock cost by transferring a share of
//! the queue into the calling context's ring along with the returned task.

use crate::types::TaskId;
use smallvec::SmallVec;
use std::collections::VecDeque;

use super::run_queue::RING_CAPACITY;

/// Tasks transferred per amortized pop, on the stack in the common case.
pub(crate) type Refill = SmallVec<[TaskId; 32]>;

/// The process-wide FIFO of runnable tasks.
#[derive(Debug, Default)]
pub(crate) struct GlobalQueue {
    queue: VecDeque<TaskId>,
}

impl GlobalQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Appends one task.
    pub(crate) fn push_tail(&mut self, task: TaskId) {
        self.queue.push_back(task);
    }

    /// Prepends one task.
    pub(crate) fn push_head(&mut self, task: TaskId) {
        self.queue.push_front(task);
    }

    /// Appends a batch, preserving its order.
    pub(crate) fn push_batch<I>(&mut self, batch: I)
    where
        I: IntoIterator<Item = TaskId>,
    {
        self.queue.extend(batch);
    }

    /// Prepends a batch so that `batch[0]` ends up at the queue head.
    ///
    /// Used when a context is torn down: its drained ring keeps its
    /// approximate dispatch order ahead of older global work.
    pub(crate) fn push_batch_head(&mut self, batch: &[TaskId]) {
        for task in batch.iter().rev() {
            self.queue.push_front(*task);
        }
    }

    /// Pops one task for a context with `room` free ring slots, transferring
    /// an amortizing share into `refill` (oldest first).
    ///
    /// The share is `len / context_count + 1`, capped at `max` when positive,
    /// at half a ring, and at `room + 1` so the caller's ring cannot
    /// overflow.
    pub(crate) fn pop(
        &mut self,
        context_count: u32,
        max: u32,
        room: u32,
        refill: &mut Refill,
    ) -> Option<TaskId> {
        if self.queue.is_empty() {
            return None;
        }
        let len = self.queue.len() as u32;
        let mut n = len / context_count.max(1) + 1;
        n = n.min(len);
        if max > 0 {
            n = n.min(max);
        }
        n = n.min(RING_CAPACITY as u32 / 2);
        n = n.min(room.saturating_add(1));

        let first = self.queue.pop_front()?;
        for _ in 1..n {
            match self.queue.pop_front() {
                Some(task) => refill.push(task),
                None => break,
            }
        }
        Some(first)
    }

    /// Removes and returns everything, front to back.
    pub(crate) fn drain(&mut self) -> Vec<TaskId> {
        self.queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(i: u32) -> TaskId {
        TaskId::from_index(i)
    }

    #[test]
    fn fifo_order() {
        let mut q = GlobalQueue::new();
        q.push_tail(t(1));
        q.push_tail(t(2));
        q.push_head(t(0));
        let mut refill = Refill::new();
        assert_eq!(q.pop(1, 0, 256, &mut refill), Some(t(0)));
        let drained = q.drain();
        // t(1) and t(2) either popped into refill or still queued, in order.
        let mut order: Vec<TaskId> = refill.into_iter().collect();
        order.extend(drained);
        assert_eq!(order, vec![t(1), t(2)]);
    }

    #[test]
    fn pop_amortizes_by_context_count() {
        let mut q = GlobalQueue::new();
        q.push_batch((0..40).map(t));
        let mut refill = Refill::new();
        let first = q.pop(4, 0, 256, &mut refill);
        // n = 40/4 + 1 = 11: one returned, ten transferred.
        assert_eq!(first, Some(t(0)));
        assert_eq!(refill.len(), 10);
        assert_eq!(q.len(), 29);
        assert_eq!(refill[0], t(1));
    }

    #[test]
    fn pop_honors_max_and_room() {
        let mut q = GlobalQueue::new();
        q.push_batch((0..100).map(t));
        let mut refill = Refill::new();
        assert_eq!(q.pop(1, 1, 256, &mut refill), Some(t(0)));
        assert!(refill.is_empty(), "max=1 transfers nothing");

        let mut refill = Refill::new();
        assert_eq!(q.pop(1, 0, 3, &mut refill), Some(t(1)));
        assert_eq!(refill.len(), 3, "room caps the transfer");
    }

    #[test]
    fn pop_never_exceeds_half_a_ring() {
        let mut q = GlobalQueue::new();
        q.push_batch((0..2000).map(t));
        let mut refill = Refill::new();
        let _ = q.pop(1, 0, 1000, &mut refill);
        assert_eq!(refill.len() + 1, RING_CAPACITY / 2);
    }

    #[test]
    fn batch_head_preserves_batch_order() {
        let mut q = GlobalQueue::new();
        q.push_tail(t(9));
        q.push_batch_head(&[t(0), t(1), t(2)]);
        assert_eq!(q.drain(), vec![t(0), t(1), t(2), t(9)]);
    }
}
