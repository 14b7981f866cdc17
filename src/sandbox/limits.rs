//! Timeout and memory enforcement for the embedded engine.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rquickjs::Runtime;

/// Wall-clock deadline polled by the engine's interrupt hook.
///
/// The engine calls [`Watchdog::should_interrupt`] at its own pace between
/// bytecode steps, and value conversion polls it between elements. Once the
/// armed run has been going longer than the timeout the watchdog latches
/// `timed_out` and asks the caller to abort.
///
/// Only the thread that owns the sandbox touches it, so plain cells suffice.
#[derive(Debug)]
pub struct Watchdog {
    timeout: Duration,
    started_at: Cell<Option<Instant>>,
    timed_out: Cell<bool>,
}

impl Watchdog {
    /// Create a disarmed watchdog. A zero timeout never fires.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            started_at: Cell::new(None),
            timed_out: Cell::new(false),
        }
    }

    /// Start timing a new run and clear the previous verdict.
    pub fn arm(&self) {
        self.timed_out.set(false);
        self.started_at.set(Some(Instant::now()));
    }

    /// Stop timing. The `timed_out` verdict is kept until the next `arm`.
    pub fn disarm(&self) {
        self.started_at.set(None);
    }

    /// Interrupt-hook body: `true` tells the engine to abort.
    pub fn should_interrupt(&self) -> bool {
        let Some(started) = self.started_at.get() else {
            return false;
        };
        if self.timeout.is_zero() {
            return false;
        }
        if self.timed_out.get() {
            return true;
        }

        if started.elapsed() > self.timeout {
            self.timed_out.set(true);
            return true;
        }
        false
    }

    /// Whether the last armed run was aborted for running too long.
    pub fn timed_out(&self) -> bool {
        self.timed_out.get()
    }

    /// Time since the current run was armed, zero while disarmed.
    pub fn elapsed(&self) -> Duration {
        self.started_at
            .get()
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Bind the watchdog to a runtime's interrupt hook.
pub fn install_interrupt_handler(runtime: &Runtime, watchdog: Rc<Watchdog>) {
    runtime.set_interrupt_handler(Some(Box::new(move || watchdog.should_interrupt())));
}

/// Apply the heap ceiling. Must run after the context has been built so the
/// engine's own intrinsics are not counted against the limit during setup.
pub fn apply_memory_limit(runtime: &Runtime, max_memory: usize) {
    runtime.set_memory_limit(max_memory);
}

/// Whether the engine heap is within 1/16 of its ceiling.
///
/// The engine often reports exhaustion by throwing a bare `null`, so the
/// heap level is checked alongside the thrown value when classifying.
pub fn near_memory_limit(runtime: &Runtime) -> bool {
    let usage = runtime.memory_usage();
    let limit = usage.malloc_limit;
    let used = usage.malloc_size;
    limit > 0 && used >= limit - limit / 16
}
