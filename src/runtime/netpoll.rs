//! Network poller contract.
//!
//! The scheduler does not own an event loop; it consumes one through this
//! trait. Idle workers poll non-blockingly before stealing, the last idle
//! worker parks inside a blocking poll, and the monitor forces a poll when
//! nobody has looked at the network for 10 ms. Returned tasks are in
//! Waiting state and are injected Runnable by the scheduler.

use crate::types::TaskId;

/// An external readiness poller (epoll/kqueue wrapper, timer wheel, or a
/// test double).
pub trait NetPoller: Send + Sync {
    /// Whether the poller has been set up at all. When false, the scheduler
    /// never calls [`NetPoller::poll`].
    fn initialized(&self) -> bool;

    /// Number of tasks currently blocked waiting on the poller.
    fn waiters(&self) -> u32;

    /// Collects tasks whose I/O became ready. With `blocking`, waits until
    /// at least one is ready (or the poller's own wakeup fires, returning
    /// empty).
    fn poll(&self, blocking: bool) -> Vec<TaskId>;
}

/// The default poller: permanently uninitialized.
#[derive(Debug, Default)]
pub struct NoopPoller;

impl NetPoller for NoopPoller {
    fn initialized(&self) -> bool {
        false
    }

    fn waiters(&self) -> u32 {
        0
    }

    fn poll(&self, _blocking: bool) -> Vec<TaskId> {
        Vec::new()
    }
}
