use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::domain::UserId;

use super::reaper::Cleanable;

/// Result of a single rate-limit check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Time until the oldest request leaves the window. Zero when allowed.
    pub reset_after: Duration,
}

/// Per-identity sliding-window request counter.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    period: Duration,
    windows: Mutex<HashMap<UserId, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, period: Duration) -> Self {
        Self {
            max_requests,
            period,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<UserId, VecDeque<Instant>>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn check(&self, id: &UserId) -> RateDecision {
        self.check_at(id, Instant::now())
    }

    pub fn check_at(&self, id: &UserId, now: Instant) -> RateDecision {
        let period = self.period;
        let mut windows = self.windows();
        let window = windows.entry(id.clone()).or_default();

        while let Some(&oldest) = window.front() {
            if now.saturating_duration_since(oldest) < period {
                break;
            }
            window.pop_front();
        }

        if window.len() < self.max_requests {
            window.push_back(now);
            return RateDecision {
                allowed: true,
                reset_after: Duration::ZERO,
            };
        }

        let reset_after = window
            .front()
            .map(|&oldest| (oldest + period).saturating_duration_since(now))
            .unwrap_or_default();
        RateDecision {
            allowed: false,
            reset_after,
        }
    }

    /// Drop identities whose whole window has expired.
    pub fn cleanup_at(&self, now: Instant) {
        let period = self.period;
        self.windows().retain(|_, window| {
            window
                .back()
                .is_some_and(|&last| now.saturating_duration_since(last) < period)
        });
    }

    pub fn tracked(&self) -> usize {
        self.windows().len()
    }
}

impl Cleanable for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limiter"
    }

    fn cleanup(&self) {
        self.cleanup_at(Instant::now());
    }
}
