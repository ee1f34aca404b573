//! Feature-gated contention-instrumented mutex.
//!
//! The scheduler mutex serializes every non-lock-free transition (global
//! queue, idle lists, stop-the-world counters), so its contention profile is
//! the first thing to look at when dispatch latency regresses. With the
//! `lock-metrics` feature enabled, `ContendedMutex<T>` tracks acquisitions,
//! contended acquisitions, and cumulative wait time. When disabled it is a
//! zero-cost wrapper around `parking_lot::Mutex`.

/// Snapshot of lock contention counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockMetricsSnapshot {
    /// Human-readable name for this lock.
    pub name: &'static str,
    /// Total successful acquisitions.
    pub acquisitions: u64,
    /// Acquisitions that had to wait.
    pub contentions: u64,
    /// Cumulative nanoseconds spent waiting to acquire.
    pub wait_ns: u64,
}

#[cfg(feature = "lock-metrics")]
mod inner {
    use super::LockMetricsSnapshot;
    use parking_lot::{Mutex, MutexGuard};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Instant;

    /// Contention-instrumented mutex.
    #[derive(Debug)]
    pub struct ContendedMutex<T> {
        inner: Mutex<T>,
        name: &'static str,
        acquisitions: AtomicU64,
        contentions: AtomicU64,
        wait_ns: AtomicU64,
    }

    impl<T> ContendedMutex<T> {
        /// Creates a new instrumented mutex with the given name and value.
        pub fn new(name: &'static str, value: T) -> Self {
            Self {
                inner: Mutex::new(value),
                name,
                acquisitions: AtomicU64::new(0),
                contentions: AtomicU64::new(0),
                wait_ns: AtomicU64::new(0),
            }
        }

        /// Acquires the lock, recording whether the acquisition contended.
        pub fn lock(&self) -> MutexGuard<'_, T> {
            self.acquisitions.fetch_add(1, Ordering::Relaxed);
            if let Some(guard) = self.inner.try_lock() {
                return guard;
            }
            self.contentions.fetch_add(1, Ordering::Relaxed);
            let start = Instant::now();
            let guard = self.inner.lock();
            self.wait_ns
                .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
            guard
        }

        /// Current counter values.
        pub fn snapshot(&self) -> LockMetricsSnapshot {
            LockMetricsSnapshot {
                name: self.name,
                acquisitions: self.acquisitions.load(Ordering::Relaxed),
                contentions: self.contentions.load(Ordering::Relaxed),
                wait_ns: self.wait_ns.load(Ordering::Relaxed),
            }
        }
    }
}

#[cfg(not(feature = "lock-metrics"))]
mod inner {
    use super::LockMetricsSnapshot;
    use parking_lot::{Mutex, MutexGuard};

    /// Zero-cost wrapper; see the `lock-metrics` variant.
    #[derive(Debug)]
    pub struct ContendedMutex<T> {
        inner: Mutex<T>,
        name: &'static str,
    }

    impl<T> ContendedMutex<T> {
        /// Creates a new mutex with the given name and value.
        pub fn new(name: &'static str, value: T) -> Self {
            Self {
                inner: Mutex::new(value),
                name,
            }
        }

        /// Acquires the lock.
        #[inline]
        pub fn lock(&self) -> MutexGuard<'_, T> {
            self.inner.lock()
        }

        /// Counters are not collected in this configuration; only the name
        /// is populated.
        pub fn snapshot(&self) -> LockMetricsSnapshot {
            LockMetricsSnapshot {
                name: self.name,
                ..LockMetricsSnapshot::default()
            }
        }
    }
}

pub use inner::ContendedMutex;
