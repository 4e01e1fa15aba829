//! Time abstraction for testable timing behaviour.
//!
//! All timing decisions in the engine (tick scheduling, retry timers,
//! retention cutoffs, delivery timestamps) go through the [`Clock`] trait
//! so tests can drive virtual time deterministically.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, TimeZone, Utc};

/// Clock abstraction for time operations.
///
/// Production code uses [`RealClock`]; tests inject [`TestClock`] to
/// advance time without sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current instant for duration measurements.
    fn now(&self) -> Instant;

    /// Current UTC wall-clock time for timestamps.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    ///
    /// Maps to `tokio::time::sleep` in production; a test clock may
    /// advance virtual time and return immediately.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real clock backed by system time and tokio's sleep.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Controllable clock for deterministic tests.
///
/// Both the monotonic instant and the UTC timestamp advance together
/// through [`TestClock::advance`]. Sleeping advances virtual time and
/// yields once so other tasks can run.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Virtual elapsed time in milliseconds since clock creation.
    elapsed_ms: Arc<AtomicI64>,
    /// UTC milliseconds at clock creation.
    epoch_ms: i64,
    /// Base instant for monotonic calculations.
    base_instant: Instant,
}

impl TestClock {
    /// Creates a test clock starting at the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a test clock starting at a specific UTC time.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            elapsed_ms: Arc::new(AtomicI64::new(0)),
            epoch_ms: start.timestamp_millis(),
            base_instant: Instant::now(),
        }
    }

    /// Advances virtual time by the given duration.
    pub fn advance(&self, duration: Duration) {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.elapsed_ms.fetch_add(millis, Ordering::AcqRel);
    }

    /// Virtual time elapsed since clock creation.
    pub fn elapsed(&self) -> Duration {
        let millis = self.elapsed_ms.load(Ordering::Acquire).max(0);
        Duration::from_millis(millis as u64)
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let millis = self.epoch_ms.saturating_add(self.elapsed_ms.load(Ordering::Acquire));
        Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
