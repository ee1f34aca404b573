//! Handle types for scheduler records.
//!
//! Tasks, workers, and contexts are addressed by dense `u32` handles into
//! append-only record tables, never by pointer. Cross-record references
//! (a worker's current context, a task's lock-affinity) are stored as raw
//! slots in atomics, with `u32::MAX` encoding "none".

use core::fmt;

/// Raw-slot encoding of "no handle".
pub const RAW_NONE: u32 = u32::MAX;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            /// Wraps a table index as a handle.
            #[inline]
            #[must_use]
            pub const fn from_index(index: u32) -> Self {
                Self(index)
            }

            /// The table index this handle addresses.
            #[inline]
            #[must_use]
            pub const fn index(self) -> u32 {
                self.0
            }

            /// Encodes an optional handle into a raw atomic slot.
            #[inline]
            #[must_use]
            pub const fn encode(value: Option<Self>) -> u32 {
                match value {
                    Some(id) => id.0,
                    None => RAW_NONE,
                }
            }

            /// Decodes a raw atomic slot into an optional handle.
            #[inline]
            #[must_use]
            pub const fn decode(raw: u32) -> Option<Self> {
                if raw == RAW_NONE {
                    None
                } else {
                    Some(Self(raw))
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

handle_type! {
    /// Handle of a task record. Distinct from the task's run id: the record
    /// is pooled, while [`crate::runtime::Scheduler::task_run_id`] changes on
    /// every reuse.
    TaskId, "T"
}

handle_type! {
    /// Handle of an execution context.
    ContextId, "C"
}

handle_type! {
    /// Handle of a worker thread.
    WorkerId, "W"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        assert_eq!(TaskId::decode(TaskId::encode(None)), None);
        let id = TaskId::from_index(17);
        assert_eq!(TaskId::decode(TaskId::encode(Some(id))), Some(id));
    }

    #[test]
    fn none_is_reserved() {
        assert_eq!(ContextId::decode(RAW_NONE), None);
        assert_eq!(WorkerId::encode(None), RAW_NONE);
    }

    #[test]
    fn display_uses_prefix() {
        assert_eq!(TaskId::from_index(3).to_string(), "T3");
        assert_eq!(ContextId::from_index(0).to_string(), "C0");
        assert_eq!(format!("{:?}", WorkerId::from_index(9)), "W9");
    }
}
