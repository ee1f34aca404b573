#![allow(missing_docs)]
//! Poller integration: tasks parked on I/O are resumed when the poller
//! reports them ready, whether the list is picked up by an idle worker's
//! blocking poll or by the monitor's forced poll.

mod common;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use switchyard::config::SchedConfig;
use switchyard::runtime::netpoll::NetPoller;
use switchyard::runtime::{NullGc, Scheduler};
use switchyard::task;
use switchyard::TaskId;

/// Test double: a hand-fed readiness queue.
#[derive(Default)]
struct FakePoller {
    ready: Mutex<Vec<TaskId>>,
    waiters: AtomicU32,
    closed: AtomicBool,
}

impl FakePoller {
    fn feed(&self, tasks: &[TaskId]) {
        self.ready.lock().extend_from_slice(tasks);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl NetPoller for FakePoller {
    fn initialized(&self) -> bool {
        true
    }

    fn waiters(&self) -> u32 {
        self.waiters.load(Ordering::SeqCst)
    }

    fn poll(&self, blocking: bool) -> Vec<TaskId> {
        loop {
            let drained: Vec<TaskId> = std::mem::take(&mut *self.ready.lock());
            if !drained.is_empty() || !blocking || self.closed.load(Ordering::SeqCst) {
                return drained;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

#[test]
fn polled_ready_list_resumes_parked_tasks() {
    common::init_test_logging();
    let mut cfg = SchedConfig::default();
    cfg.max_contexts = 2;
    cfg.stack_size = 32 * 1024;
    let poller = Arc::new(FakePoller::default());
    let poller_iface: Arc<dyn NetPoller> = Arc::clone(&poller) as Arc<dyn NetPoller>;
    let sched =
        Scheduler::with_collaborators(cfg, poller_iface, Arc::new(NullGc)).expect("scheduler");

    let parked = Arc::new(AtomicU32::new(0));
    let resumed = Arc::new(AtomicU32::new(0));
    let ids: Vec<TaskId> = (0..3)
        .map(|_| {
            let parked = Arc::clone(&parked);
            let resumed = Arc::clone(&resumed);
            let poller = Arc::clone(&poller);
            sched
                .spawn(move || {
                    // Register with the poller before blocking, as an I/O
                    // submission path would: an idle worker then babysits
                    // the poller instead of parking, which is also what
                    // keeps deadlock detection out of the picture.
                    poller.waiters.fetch_add(1, Ordering::SeqCst);
                    task::park_unlock("io-wait", move |_| {
                        parked.fetch_add(1, Ordering::SeqCst);
                        true
                    });
                    poller.waiters.fetch_sub(1, Ordering::SeqCst);
                    resumed.fetch_add(1, Ordering::SeqCst);
                })
                .expect("spawn waiter")
        })
        .collect();

    common::wait_until("tasks to park on io", Duration::from_secs(10), || {
        parked.load(Ordering::SeqCst) == 3
    });

    // Every task is safely Waiting; feed the ready list.
    poller.feed(&ids);

    common::wait_until("io tasks to resume", Duration::from_secs(30), || {
        resumed.load(Ordering::SeqCst) == 3
    });

    common::wait_quiescent(&sched, Duration::from_secs(10));
    poller.close();
    sched.shutdown();
}
