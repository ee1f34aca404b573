#![allow(dead_code)]
//! Shared helpers for the end-to-end scheduler scenarios.

use std::sync::Once;
use std::time::{Duration, Instant};

use switchyard::runtime::Scheduler;

/// Installs a fmt subscriber once per test binary. Filtered through
/// `RUST_LOG`; schedtrace lines come out at info level under the
/// `schedtrace` target.
pub fn init_test_logging() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Polls `cond` until it holds or `timeout` elapses (then panics naming
/// `what`).
pub fn wait_until(what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() > timeout {
            panic!("timed out after {timeout:?} waiting for {what}");
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Waits for full quiescence: no live tasks, empty queues, no spinners.
pub fn wait_quiescent(sched: &Scheduler, timeout: Duration) {
    wait_until("scheduler quiescence", timeout, || {
        let snap = sched.snapshot();
        snap.live_tasks == 0
            && snap.global_queue == 0
            && snap.spinning_workers == 0
            && snap.context_queues.iter().all(|&len| len == 0)
    });
}
