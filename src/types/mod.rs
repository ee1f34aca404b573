//! Core types for the switchyard scheduler.
//!
//! - [`id`]: handle types (`TaskId`, `ContextId`, `WorkerId`) and raw-slot
//!   encoding for storing optional handles in atomics
//! - [`status`]: task and context state machines, wait reasons

pub mod id;
pub mod status;

pub use id::{ContextId, TaskId, WorkerId, RAW_NONE};
pub use status::{ContextStatus, TaskStatus};
