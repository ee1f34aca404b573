//! Schedtrace: one-line scheduler statistics.
//!
//! With `schedtrace` configured, the monitor emits a summary line on its
//! cadence through `tracing` at target `schedtrace`:
//!
//! ```text
//! SCHED 1034ms: contexts=4 idlecontexts=1 workers=5 spinning=0 idleworkers=2 runqueue=3 [2 0 7 1]
//! ```
//!
//! The bracketed list is per-context local queue lengths. `scheddetail`
//! extends the output with one line per context, worker, and live task.

use std::fmt::Write as _;
use std::sync::Arc;
use tracing::info;

use crate::types::TaskStatus;

use super::scheduler::Scheduler;

pub(crate) fn emit(sched: &Arc<Scheduler>, detailed: bool) {
    let millis = (sched.now_nanos() - 1) / 1_000_000;
    let snapshot = sched.snapshot();

    let mut line = format!(
        "SCHED {millis}ms: contexts={} idlecontexts={} workers={} spinning={} idleworkers={} runqueue={}",
        snapshot.contexts,
        snapshot.idle_contexts,
        snapshot.workers,
        snapshot.spinning_workers,
        snapshot.idle_workers,
        snapshot.global_queue,
    );
    let mut queues = String::new();
    for (i, len) in snapshot.context_queues.iter().enumerate() {
        if i > 0 {
            queues.push(' ');
        }
        let _ = write!(queues, "{len}");
    }
    let _ = write!(line, " [{queues}]");
    info!(target: "schedtrace", "{line}");

    if !detailed {
        return;
    }

    for ctx in sched.contexts_snapshot() {
        info!(
            target: "schedtrace",
            "  {}: status={} schedtick={} syscalltick={} worker={} runqsize={}",
            ctx.id(),
            ctx.status(),
            ctx.sched_tick(),
            ctx.syscall_tick(),
            ctx.owner().map_or_else(|| "-".into(), |w| w.to_string()),
            ctx.runq.len(),
        );
    }
    sched.workers.for_each(|_, worker| {
        info!(
            target: "schedtrace",
            "  {}: ctx={} curtask={} spinning={} locked={}",
            worker.id(),
            worker.context().map_or_else(|| "-".into(), |c| c.to_string()),
            worker
                .current_task()
                .map_or_else(|| "-".into(), |t| t.to_string()),
            worker.is_spinning(),
            worker
                .locked_task()
                .map_or_else(|| "-".into(), |t| t.to_string()),
        );
    });
    sched.tasks.for_each(|_, task| {
        let status = task.status();
        if matches!(status, TaskStatus::Idle | TaskStatus::Dead) {
            return;
        }
        info!(
            target: "schedtrace",
            "  {} (run {}): status={}({}) owner={} locked={}",
            task.id(),
            task.run_id(),
            status,
            task.wait_reason(),
            task.owner().map_or_else(|| "-".into(), |w| w.to_string()),
            task
                .locked_worker()
                .map_or_else(|| "-".into(), |w| w.to_string()),
        );
    });
}
