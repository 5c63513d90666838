//! Fixed-window request throttling keyed by client identity.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::debug;

/// Per-identity counter for the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub reset_time: DateTime<Utc>,
}

/// Outcome of a single [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
}

/// Fixed-window throttle: at most `max_requests` per identity per window.
///
/// A window opens on an identity's first request and lasts `window`. Once
/// `reset_time` has passed, the next request opens a fresh window. Counts are
/// process-local and approximate; nothing is persisted.
///
/// # Examples
///
/// ```
/// use chrono::TimeDelta;
/// use scrobble_edge::security::RateLimiter;
///
/// let limiter = RateLimiter::new(2, TimeDelta::minutes(1));
/// assert!(limiter.check("203.0.113.9").allowed);
/// assert!(limiter.check("203.0.113.9").allowed);
/// let third = limiter.check("203.0.113.9");
/// assert!(!third.allowed);
/// assert_eq!(third.remaining, 0);
/// ```
pub struct RateLimiter {
    windows: Mutex<HashMap<String, RateWindow>>,
    max_requests: u32,
    window: TimeDelta,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_REQUESTS, TimeDelta::milliseconds(Self::DEFAULT_WINDOW_MS))
    }
}

impl RateLimiter {
    pub const DEFAULT_MAX_REQUESTS: u32 = 100;
    pub const DEFAULT_WINDOW_MS: i64 = 60_000;

    pub fn new(max_requests: u32, window: TimeDelta) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    /// Counts one request from `identifier` against the wall clock.
    pub fn check(&self, identifier: &str) -> RateDecision {
        self.check_at(identifier, Utc::now())
    }

    /// Counts one request from `identifier` as if it arrived at `now`.
    pub fn check_at(&self, identifier: &str, now: DateTime<Utc>) -> RateDecision {
        let mut windows = self.windows.lock();

        if let Some(window) = windows.get_mut(identifier).filter(|w| now <= w.reset_time) {
            if window.count >= self.max_requests {
                return RateDecision {
                    allowed: false,
                    remaining: 0,
                    reset_time: window.reset_time,
                };
            }
            window.count += 1;
            return RateDecision {
                allowed: true,
                remaining: self.max_requests - window.count,
                reset_time: window.reset_time,
            };
        }

        let reset_time = now.checked_add_signed(self.window).unwrap_or(DateTime::<Utc>::MAX_UTC);
        windows.insert(
            identifier.to_owned(),
            RateWindow {
                count: 1,
                reset_time,
            },
        );
        RateDecision {
            allowed: true,
            remaining: self.max_requests.saturating_sub(1),
            reset_time,
        }
    }

    /// Removes every window whose reset time has passed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now())
    }

    /// Removes every window whose reset time is before `now`, returning how many went.
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, window| now <= window.reset_time);
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, remaining = windows.len(), "expired rate windows swept");
        }
        removed
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows.lock().len()
    }

    /// The current window for `identifier`, if one is tracked.
    pub fn window_for(&self, identifier: &str) -> Option<RateWindow> {
        self.windows.lock().get(identifier).copied()
    }
}
