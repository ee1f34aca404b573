//! Garbage collector contract.
//!
//! The collector is an external collaborator; the scheduler only gives it
//! two levers. Stop-the-world is invoked directly through
//! [`super::Scheduler::stop_the_world`]; idle-time marking asks these hooks
//! whether a context that found no runnable work should run a background
//! mark task instead of going idle.

use crate::types::{ContextId, TaskId};

/// Hooks the collector implements for idle-time mark scheduling.
pub trait GcHooks: Send + Sync {
    /// Whether mark work is queued that `ctx` could usefully pick up.
    fn mark_work_available(&self, ctx: ContextId) -> bool;

    /// A parked mark-worker task for `ctx`, if the collector manages them
    /// itself; otherwise the scheduler falls back to the task registered
    /// via [`super::Scheduler::set_mark_worker`].
    fn find_mark_worker(&self, ctx: ContextId) -> Option<TaskId> {
        let _ = ctx;
        None
    }
}

/// The default collector: never has work.
#[derive(Debug, Default)]
pub struct NullGc;

impl GcHooks for NullGc {
    fn mark_work_available(&self, _ctx: ContextId) -> bool {
        false
    }
}
