//! In-memory rate limiting: sliding-window limiter, notification throttle and
//! the background reaper that bounds their memory.

pub mod limiter;
pub mod notifier;
pub mod reaper;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{config::RateLimitConfig, domain::UserId};

pub use limiter::{RateDecision, RateLimiter};
pub use notifier::NotificationThrottle;
pub use reaper::{BackgroundReaper, Cleanable};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateOutcome {
    Allowed,
    Limited {
        reset_after: Duration,
        /// Whether a text reminder should accompany the reaction.
        notify: bool,
    },
}

/// Limiter + throttle pair with their shared reaper.
pub struct RateLimitService {
    limiter: Arc<RateLimiter>,
    throttle: Arc<NotificationThrottle>,
    reaper: BackgroundReaper,
}

impl RateLimitService {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::new(cfg.requests, cfg.period)),
            throttle: Arc::new(NotificationThrottle::new(cfg.notification_cooldown)),
            reaper: BackgroundReaper::new(cfg.cleanup_interval),
        }
    }

    /// Register both maps with the reaper (which starts it).
    pub fn start(&self) {
        self.reaper.register(self.limiter.clone());
        self.reaper.register(self.throttle.clone());
    }

    pub async fn stop(&self) {
        self.reaper.stop().await;
    }

    pub fn check(&self, id: &UserId) -> RateOutcome {
        self.check_at(id, Instant::now())
    }

    pub fn check_at(&self, id: &UserId, now: Instant) -> RateOutcome {
        let decision = self.limiter.check_at(id, now);
        if decision.allowed {
            self.throttle.clear(id);
            return RateOutcome::Allowed;
        }
        RateOutcome::Limited {
            reset_after: decision.reset_after,
            notify: self.throttle.should_notify_at(id, now),
        }
    }

    pub fn reaper(&self) -> &BackgroundReaper {
        &self.reaper
    }
}
