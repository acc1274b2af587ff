//! Time-window rate limiting for outbound provider requests.
//!
//! A [`RateLimiter`] combines one or more `(max_requests, window)` pairs.
//! A slot is only granted when *every* window has capacity, and a granted
//! slot stays occupied until its window elapses. Dropping the returned
//! [`RateLease`] does not give the slot back, so a burst can never be
//! replayed faster than the windows allow.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{EngineError, Result};

/// One `(max_requests, window)` constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub max_requests: usize,
    pub window: Duration,
}

impl RateWindow {
    /// A window admitting at least one request.
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
        }
    }

    #[must_use]
    pub fn per_second(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(1))
    }

    #[must_use]
    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }
}

#[derive(Debug)]
struct WindowState {
    limit: RateWindow,
    /// Grant times still inside the window, oldest first.
    grants: VecDeque<Instant>,
}

impl WindowState {
    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.grants.front() {
            if now.duration_since(oldest) >= self.limit.window {
                self.grants.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until a slot frees up, or `None` if one is free now.
    fn wait_time(&self, now: Instant) -> Option<Duration> {
        if self.grants.len() < self.limit.max_requests {
            return None;
        }
        self.grants
            .front()
            .map(|&oldest| (oldest + self.limit.window).saturating_duration_since(now))
    }

    fn free_slots(&self, now: Instant) -> usize {
        let live = self
            .grants
            .iter()
            .filter(|&&at| now.duration_since(at) < self.limit.window)
            .count();
        self.limit.max_requests.saturating_sub(live)
    }
}

/// Proof that a slot was granted. Holding or dropping it has no effect on
/// the windows.
#[derive(Debug)]
#[must_use]
pub struct RateLease {
    granted_at: Instant,
}

impl RateLease {
    #[must_use]
    pub fn granted_at(&self) -> Instant {
        self.granted_at
    }
}

/// Combined time-window semaphore shared by all requests to one provider.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    windows: Arc<Mutex<Vec<WindowState>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(windows: impl IntoIterator<Item = RateWindow>) -> Self {
        let windows = windows
            .into_iter()
            .map(|limit| WindowState {
                limit,
                grants: VecDeque::with_capacity(limit.max_requests),
            })
            .collect();
        Self {
            windows: Arc::new(Mutex::new(windows)),
        }
    }

    /// Wait until every window has a free slot and claim it.
    ///
    /// Cancellation ends the wait with [`EngineError::Canceled`] and claims
    /// nothing.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<RateLease> {
        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Canceled);
            }

            let wait = {
                let mut windows = self.windows.lock().await;
                let now = Instant::now();
                let mut wait = Duration::ZERO;
                for window in windows.iter_mut() {
                    window.evict(now);
                    if let Some(needed) = window.wait_time(now) {
                        wait = wait.max(needed);
                    }
                }

                if wait.is_zero() {
                    for window in windows.iter_mut() {
                        window.grants.push_back(now);
                    }
                    return Ok(RateLease { granted_at: now });
                }
                wait
            };

            trace!(wait = ?wait, "rate window full, waiting");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(EngineError::Canceled),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Smallest free slot count across all windows (`usize::MAX` when the
    /// limiter has no windows).
    pub async fn available(&self) -> usize {
        let windows = self.windows.lock().await;
        let now = Instant::now();
        windows
            .iter()
            .map(|w| w.free_slots(now))
            .min()
            .unwrap_or(usize::MAX)
    }
}
