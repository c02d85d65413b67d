//! Per-invocation cancellation and output carrier.
//!
//! Every top-level call runs under a [`Context`]: a deadline, a cancel
//! flag with a cause, the buffer that collects `print`/`println` output,
//! and an atomic count of tasks spawned with `go`. Clones share the same
//! state, so spawned tasks observe cancellation and write to the same
//! buffer as the root call.

use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::error::{Panic, RunResult};

/// Default invocation deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Cause recorded when the deadline expires without an explicit cancel.
pub(crate) const DEADLINE_CAUSE: &str = "context deadline exceeded";

/// Shared per-invocation state. Cheap to clone; all clones alias.
#[derive(Debug, Clone)]
pub struct Context(std::sync::Arc<ContextInner>);

#[derive(Debug)]
struct ContextInner {
    deadline: Instant,
    cancelled: AtomicBool,
    cause: Mutex<Option<String>>,
    output: Mutex<String>,
    tasks: AtomicUsize,
}

impl Context {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self(std::sync::Arc::new(ContextInner {
            deadline: Instant::now() + timeout,
            cancelled: AtomicBool::new(false),
            cause: Mutex::new(None),
            output: Mutex::new(String::new()),
            tasks: AtomicUsize::new(0),
        }))
    }

    /// Cancels the context with the given cause.
    ///
    /// Running tasks observe the cancellation at their next poll or blocking
    /// channel operation and unwind with a panic carrying the cause.
    pub fn cancel(&self, cause: &str) {
        let mut slot = self.0.cause.lock();
        if slot.is_none() {
            *slot = Some(cause.to_owned());
        }
        self.0.cancelled.store(true, Ordering::Release);
    }

    /// Returns true once the context has been cancelled or its deadline has
    /// passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire) || Instant::now() >= self.0.deadline
    }

    /// The recorded cancellation cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<String> {
        self.0.cause.lock().clone()
    }

    /// Accumulated `print`/`println` output and goroutine panic diagnostics.
    #[must_use]
    pub fn output(&self) -> String {
        self.0.output.lock().clone()
    }

    /// Number of tasks spawned with `go` that have not yet finished.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.0.tasks.load(Ordering::Acquire)
    }

    /// Raises a cancellation panic if the context is cancelled or past its
    /// deadline. Called between instructions and before blocking operations.
    pub(crate) fn check(&self) -> RunResult<()> {
        if self.0.cancelled.load(Ordering::Acquire) {
            let cause = self.cause().unwrap_or_else(|| DEADLINE_CAUSE.to_owned());
            return Err(Panic::cancelled(cause));
        }
        if Instant::now() >= self.0.deadline {
            self.cancel(DEADLINE_CAUSE);
            return Err(Panic::cancelled(DEADLINE_CAUSE));
        }
        Ok(())
    }

    /// Time left until the deadline; zero once it has passed.
    pub(crate) fn remaining(&self) -> Duration {
        self.0.deadline.saturating_duration_since(Instant::now())
    }

    /// Appends one line to the output buffer. Writes are serialised by the
    /// buffer mutex so task diagnostics interleave whole lines only.
    pub(crate) fn write_line(&self, line: &str) {
        let mut buf = self.0.output.lock();
        buf.push_str(line);
        buf.push('\n');
    }

    pub(crate) fn task_started(&self) {
        self.0.tasks.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn task_finished(&self) {
        self.0.tasks.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_expiry_reports_cause() {
        let ctx = Context::new(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        let err = ctx.check().unwrap_err();
        assert!(err.cancelled);
        assert_eq!(err.value.to_string(), DEADLINE_CAUSE);
    }

    #[test]
    fn explicit_cancel_wins_over_deadline() {
        let ctx = Context::new(DEFAULT_TIMEOUT);
        ctx.cancel("shutting down");
        let err = ctx.check().unwrap_err();
        assert_eq!(err.value.to_string(), "shutting down");
    }

    #[test]
    fn output_lines_accumulate() {
        let ctx = Context::new(DEFAULT_TIMEOUT);
        ctx.write_line("a");
        ctx.write_line("b");
        assert_eq!(ctx.output(), "a\nb\n");
    }
}
