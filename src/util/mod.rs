//! Internal utilities shared across the scheduler.

pub mod arena;
pub mod contended_mutex;
pub mod det_rng;
pub mod steal_order;

pub use arena::HandleArena;
pub use contended_mutex::ContendedMutex;
pub use det_rng::DetRng;
pub use steal_order::StealOrder;
