//! Wall-clock source for heartbeats.
//!
//! Heartbeats are compared across machines, so they use Unix seconds rather
//! than a monotonic `Instant`. The presence service takes the clock as a trait
//! object so tests can drive it by hand.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::{
    report_violation,
    telemetry::{ViolationKind, ViolationSeverity},
};

/// Source of Unix time in whole seconds.
pub trait UnixClock: Send + Sync {
    /// Current Unix time in seconds.
    fn now_unix(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl UnixClock for SystemClock {
    fn now_unix(&self) -> i64 {
        match web_time::SystemTime::now().duration_since(web_time::UNIX_EPOCH) {
            Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
            Err(_) => {
                report_violation!(
                    ViolationSeverity::Warning,
                    ViolationKind::Presence,
                    "system time is before UNIX_EPOCH; heartbeats will read as stale"
                );
                0
            },
        }
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    secs: Arc<AtomicI64>,
}

impl ManualClock {
    /// Starts at `secs`.
    #[must_use]
    pub fn new(secs: i64) -> Self {
        Self {
            secs: Arc::new(AtomicI64::new(secs)),
        }
    }

    /// Jumps to `secs`.
    pub fn set(&self, secs: i64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    /// Moves forward by `secs`.
    pub fn advance(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl UnixClock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.secs.load(Ordering::SeqCst)
    }
}
