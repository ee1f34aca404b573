//! Scheduler configuration.
//!
//! All tunables are plain typed fields with process-appropriate defaults.
//! [`SchedConfig::from_env`] layers `SWITCHYARD_*` environment overrides on
//! top of the defaults, mirroring how the tunables are usually flipped in
//! production (trace cadence, context count) without a rebuild.

use crate::error::{Error, ErrorKind};
use std::time::Duration;

/// Upper bound on the context count; a resize beyond this is rejected.
pub const MAX_CONTEXTS: usize = 1 << 10;

/// Smallest supported task stack. Below this, coroutine prologues and the
/// guard page leave no usable room.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Tunables fixed at scheduler construction.
#[derive(Debug, Clone)]
pub struct SchedConfig {
    /// Number of execution contexts (the parallelism cap). Defaults to the
    /// host's available parallelism. Changeable later through
    /// [`crate::runtime::Scheduler::set_max_contexts`].
    pub max_contexts: usize,
    /// Hard cap on worker threads; exceeding it is fatal. Default 10 000.
    pub max_workers: usize,
    /// Size of each task stack in bytes. Default 128 KiB.
    pub stack_size: usize,
    /// Emit one-line scheduler statistics at this cadence; `None` disables.
    pub schedtrace: Option<Duration>,
    /// Extend schedtrace output with per-context, per-worker, and per-task
    /// detail lines.
    pub scheddetail: bool,
    /// Dispatches between forced global-queue samples. Prime; default 61.
    pub global_queue_interval: u32,
    /// Monitor sleep floor (one monitor tick). Default 20 µs.
    pub monitor_min_sleep: Duration,
    /// Monitor sleep ceiling after idle backoff. Default 10 ms.
    pub monitor_max_sleep: Duration,
    /// How long a context may sit in a syscall before the monitor retakes
    /// it, provided other workers could use it. Default 20 µs (one tick).
    pub syscall_retake: Duration,
    /// Running time after which the monitor requests preemption. Default
    /// 10 ms.
    pub preempt_after: Duration,
    /// Back-off before stealing a running victim's `next` slot, giving the
    /// owner a chance to dispatch it locally. `None` yields instead of
    /// sleeping (for platforms with coarse sleep granularity). Default 3 µs.
    pub steal_next_backoff: Option<Duration>,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            max_contexts: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
            max_workers: 10_000,
            stack_size: 128 * 1024,
            schedtrace: None,
            scheddetail: false,
            global_queue_interval: 61,
            monitor_min_sleep: Duration::from_micros(20),
            monitor_max_sleep: Duration::from_millis(10),
            syscall_retake: Duration::from_micros(20),
            preempt_after: Duration::from_millis(10),
            steal_next_backoff: Some(Duration::from_micros(3)),
        }
    }
}

impl SchedConfig {
    /// Defaults with `SWITCHYARD_*` environment overrides applied.
    ///
    /// Recognized variables: `SWITCHYARD_MAX_CONTEXTS`,
    /// `SWITCHYARD_MAX_WORKERS`, `SWITCHYARD_STACK_SIZE`,
    /// `SWITCHYARD_SCHEDTRACE` (milliseconds; 0 disables),
    /// `SWITCHYARD_SCHEDDETAIL` (0/1).
    pub fn from_env() -> Result<Self, Error> {
        let mut cfg = Self::default();
        if let Some(v) = env_usize("SWITCHYARD_MAX_CONTEXTS")? {
            cfg.max_contexts = v;
        }
        if let Some(v) = env_usize("SWITCHYARD_MAX_WORKERS")? {
            cfg.max_workers = v;
        }
        if let Some(v) = env_usize("SWITCHYARD_STACK_SIZE")? {
            cfg.stack_size = v;
        }
        if let Some(ms) = env_usize("SWITCHYARD_SCHEDTRACE")? {
            cfg.schedtrace = (ms > 0).then(|| Duration::from_millis(ms as u64));
        }
        if let Some(v) = env_usize("SWITCHYARD_SCHEDDETAIL")? {
            cfg.scheddetail = v != 0;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_contexts == 0 || self.max_contexts > MAX_CONTEXTS {
            return Err(Error::with_detail(
                ErrorKind::InvalidContextCount,
                format!("max_contexts={}", self.max_contexts),
            ));
        }
        if self.max_workers == 0 {
            return Err(Error::new(ErrorKind::InvalidWorkerLimit));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(Error::with_detail(
                ErrorKind::StackTooSmall,
                format!("stack_size={} min={}", self.stack_size, MIN_STACK_SIZE),
            ));
        }
        if self.global_queue_interval == 0 {
            return Err(Error::with_detail(
                ErrorKind::InvalidEnvOverride,
                "global_queue_interval must be non-zero",
            ));
        }
        Ok(())
    }

    /// Builder-style setter for the context count.
    #[must_use]
    pub fn with_contexts(mut self, n: usize) -> Self {
        self.max_contexts = n;
        self
    }

    /// Builder-style setter for the schedtrace cadence.
    #[must_use]
    pub fn with_schedtrace(mut self, every: Duration, detailed: bool) -> Self {
        self.schedtrace = Some(every);
        self.scheddetail = detailed;
        self
    }
}

fn env_usize(name: &str) -> Result<Option<usize>, Error> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| Error::with_detail(ErrorKind::InvalidEnvOverride, format!("{name}={raw}"))),
        Err(_) => Ok(None),
    }
}
