//! Error types and error handling strategy for the scheduler.
//!
//! Errors fall into three classes with different delivery mechanisms:
//!
//! - **Fatal**: a scheduler invariant is broken (impossible status
//!   transition, worker-count overflow, deadlock). Continuing would corrupt
//!   scheduling state, so these abort via [`fatal!`](crate::fatal), which
//!   logs at error level and panics on the offending thread.
//! - **Recoverable internal**: transient CAS failures against a pinned
//!   (scan-overlaid) task status. These retry with a bounded spin-then-yield
//!   backoff and are never surfaced.
//! - **Surfaced**: failures the caller can act on: invalid configuration,
//!   task-stack allocation failure, operations on a shut-down scheduler.
//!   These return [`Error`].

use core::fmt;

/// The kind of a surfaced error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Configuration ===
    /// `max_contexts` outside `1..=MAX_CONTEXTS`.
    InvalidContextCount,
    /// `max_workers` is zero or below the current worker count.
    InvalidWorkerLimit,
    /// Task stack size below the supported minimum.
    StackTooSmall,
    /// An environment override could not be parsed.
    InvalidEnvOverride,

    // === Spawning ===
    /// The OS refused memory for a task stack.
    StackExhausted,
    /// The scheduler is shutting down; no new tasks or workers.
    ShuttingDown,
}

impl ErrorKind {
    /// Whether retrying the same call can succeed without intervention.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::StackExhausted)
    }

    const fn message(self) -> &'static str {
        match self {
            Self::InvalidContextCount => "context count must be in 1..=MAX_CONTEXTS",
            Self::InvalidWorkerLimit => "worker limit must cover the live worker count",
            Self::StackTooSmall => "task stack size below minimum",
            Self::InvalidEnvOverride => "malformed environment override",
            Self::StackExhausted => "failed to allocate a task stack",
            Self::ShuttingDown => "scheduler is shutting down",
        }
    }
}

/// A surfaced scheduler error.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    detail: Option<String>,
}

impl Error {
    /// Creates an error of the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, detail: None }
    }

    /// Attaches human-readable detail.
    #[must_use]
    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    /// The error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self.kind.message()),
            None => f.write_str(self.kind.message()),
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Aborts on a broken scheduler invariant.
///
/// Logs the message at error level (so it reaches subscribers even when the
/// panic is swallowed by a foreign unwind boundary), then panics.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        tracing::error!($($arg)*);
        panic!($($arg)*);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_and_without_detail() {
        let plain = Error::new(ErrorKind::ShuttingDown);
        assert_eq!(plain.to_string(), "scheduler is shutting down");

        let detailed = Error::with_detail(ErrorKind::InvalidEnvOverride, "SWITCHYARD_SCHEDTRACE=x");
        let rendered = detailed.to_string();
        assert!(rendered.contains("malformed"));
        assert!(rendered.contains("SCHEDTRACE"));
    }

    #[test]
    fn transient_classification() {
        assert!(ErrorKind::StackExhausted.is_transient());
        assert!(!ErrorKind::ShuttingDown.is_transient());
        assert!(!ErrorKind::InvalidContextCount.is_transient());
    }

    #[test]
    fn kind_is_preserved() {
        let err: Error = ErrorKind::StackTooSmall.into();
        assert_eq!(err.kind(), ErrorKind::StackTooSmall);
    }
}
