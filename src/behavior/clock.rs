//! Time source seam for the behavior simulator.
//!
//! Behavior primitives never read the wall clock directly; they go through
//! [`Clock`] so tests can drive reading loops on fake time instead of
//! sleeping for real.

use std::time::Duration;

use async_trait::async_trait;

/// Monotonic time source plus sleep.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Time elapsed since this clock was created.
    fn now(&self) -> Duration;

    /// Suspend the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by tokio's timer.
pub struct TokioClock {
    start: std::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock for tests: `sleep` advances `now` instantly.
#[cfg(test)]
pub(crate) struct FakeClock {
    elapsed: std::sync::Mutex<Duration>,
}

#[cfg(test)]
impl FakeClock {
    pub(crate) fn new() -> Self {
        Self {
            elapsed: std::sync::Mutex::new(Duration::ZERO),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        *self.elapsed.lock().unwrap() += duration;
    }
}
