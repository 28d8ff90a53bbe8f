//! Lightweight timing utilities for optional performance tracing.
//!
//! A simple RAII guard records the elapsed duration of a scoped operation and
//! logs it under the `otoseg::telemetry` target when the guard is dropped.
//! When the target's log level is disabled the guard is inert, so the overhead
//! is a single `Instant::now()` call.

use std::{
    borrow::Cow,
    time::{Duration, Instant},
};

use log::{Level, log, log_enabled};

const TARGET: &str = "otoseg::telemetry";

/// RAII helper that logs how long an operation took when dropped.
///
/// Guards are usually created via [`timing_guard`], so most callers do not
/// need to interact with this type directly.
pub struct TimingGuard {
    label: Cow<'static, str>,
    level: Level,
    start: Instant,
    active: bool,
}

impl TimingGuard {
    /// Returns `true` when the guard will emit a log entry on drop.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns the elapsed duration since the guard was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Consume the guard and return the elapsed duration without logging.
    pub fn finish(mut self) -> Duration {
        let duration = self.start.elapsed();
        self.active = false;
        duration
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if self.active {
            let duration = self.start.elapsed();
            log!(
                target: TARGET,
                self.level,
                "{} completed in {:.2?}",
                self.label,
                duration
            );
        }
    }
}

/// Create a timing guard that logs at the provided level when that level is
/// enabled for the telemetry target (e.g. via `RUST_LOG=otoseg=debug`).
pub fn timing_guard(label: impl Into<Cow<'static, str>>, level: Level) -> TimingGuard {
    TimingGuard {
        label: label.into(),
        level,
        start: Instant::now(),
        active: log_enabled!(target: TARGET, level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_monotonic() {
        let guard = timing_guard("test_op", Level::Trace);
        let first = guard.elapsed();
        let second = guard.elapsed();
        assert!(second >= first);
        let _ = guard.finish();
    }

    #[test]
    fn guard_without_logger_is_inert() {
        // No logger is installed in unit tests, so the guard must not activate.
        let guard = timing_guard("noop", Level::Error);
        assert!(!guard.is_active());
    }
}
