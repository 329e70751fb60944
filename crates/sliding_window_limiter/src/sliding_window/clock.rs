//! Clock adapters for time operations.
//!
//! The limiter reads the time and sleeps through a [`Clock`] so tests can drive it
//! deterministically. See `MockClock` (in `crate::sliding_window::mocks`), available
//! with the `test-helpers` feature or in test builds:
//!
//! ```toml
//! [dev-dependencies]
//! sliding_window_limiter = { version = "*", features = ["test-helpers"] }
//! ```

use std::time::Duration;

use futures::{FutureExt, future::BoxFuture};
use tokio::time::Instant;

/// Source of time for the limiter.
pub trait Clock: Send + Sync + 'static {
    /// The current instant.
    fn now(&self) -> Instant;

    /// A future that completes once `duration` has elapsed on this clock.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Clock backed by the tokio timer.
///
/// Honours `tokio::time::pause()`, so tests on a paused runtime see virtual time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn system_clock_follows_tokio_time() {
        let clock = SystemClock::new();
        let t1 = clock.now();
        clock.sleep(Duration::from_millis(250)).await;
        let t2 = clock.now();

        assert!(t2 - t1 >= Duration::from_millis(250));
    }
}
