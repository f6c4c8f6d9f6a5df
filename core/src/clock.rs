//! Time sources for the poller.
//!
//! Time is expressed as a monotonic offset from the clock's own origin, which
//! lets [`ManualClock`] start at zero and move only when told to.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::CancelToken;

pub trait Clock {
    /// Monotonic time elapsed since this clock's origin.
    fn now(&self) -> Duration;

    /// Sleep for `duration`, waking early if `cancel` fires.
    fn sleep(&self, duration: Duration, cancel: &CancelToken);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) {
        (**self).sleep(duration, cancel);
    }
}

/// Wall-clock time backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) {
        let _ = cancel.wait_timeout(duration);
    }
}

/// Shared fake clock. Clones observe and advance the same time.
///
/// `sleep` advances the clock instead of blocking, so code under test can
/// simulate half an hour of retries instantly.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    elapsed_nanos: Arc<AtomicU64>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .elapsed_nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_add(by))
            });
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) {
        if !cancel.is_cancelled() {
            self.advance(duration);
        }
    }
}
