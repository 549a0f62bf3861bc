//! Clock abstraction for backoff sleeps and timestamps.
//!
//! Workers never call `tokio::time::sleep` directly; they go through a
//! [`Clock`] so tests can run retry schedules instantly and assert on the
//! exact delays requested.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::{Duration, Instant, SystemTime},
};

/// Source of time for delivery workers.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current instant for duration measurements.
    fn now(&self) -> Instant;

    /// Current wall-clock time for event timestamps.
    fn now_system(&self) -> SystemTime;

    /// Suspends the calling task for `duration`.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Production clock backed by the system and the tokio timer.
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

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Virtual clock for deterministic tests.
///
/// `sleep` advances virtual time by the requested duration, records the
/// request, and yields once so other tasks get scheduled. Clones share the
/// same timeline.
#[derive(Debug, Clone)]
pub struct TestClock {
    elapsed_ns: Arc<AtomicU64>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
    base_instant: Instant,
    base_system: SystemTime,
}

impl TestClock {
    /// Creates a clock anchored at the current real time.
    pub fn new() -> Self {
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
            base_instant: Instant::now(),
            base_system: SystemTime::now(),
        }
    }

    /// Moves virtual time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_ns.fetch_add(ns, Ordering::AcqRel);
    }

    /// Total virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }

    /// Every sleep requested so far, in request order.
    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(PoisonError::into_inner).clone()
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

    fn now_system(&self) -> SystemTime {
        self.base_system + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.sleeps.lock().unwrap_or_else(PoisonError::into_inner).push(duration);
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
