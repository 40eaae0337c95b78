use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::domain::UserId;

use super::reaper::Cleanable;

/// Suppresses repeated "you are rate-limited" texts within a cooldown.
#[derive(Debug)]
pub struct NotificationThrottle {
    cooldown: Duration,
    last_notified: Mutex<HashMap<UserId, Instant>>,
}

impl NotificationThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_notified: Mutex::new(HashMap::new()),
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<UserId, Instant>> {
        self.last_notified
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn should_notify(&self, id: &UserId) -> bool {
        self.should_notify_at(id, Instant::now())
    }

    /// True on first call or once the cooldown has elapsed; stamps `now` when true.
    pub fn should_notify_at(&self, id: &UserId, now: Instant) -> bool {
        let mut records = self.records();
        let due = match records.get(id) {
            None => true,
            Some(&last) => now.saturating_duration_since(last) >= self.cooldown,
        };
        if due {
            records.insert(id.clone(), now);
        }
        due
    }

    pub fn clear(&self, id: &UserId) {
        self.records().remove(id);
    }

    pub fn cleanup_at(&self, now: Instant) {
        let cooldown = self.cooldown;
        self.records()
            .retain(|_, last| now.saturating_duration_since(*last) < cooldown);
    }

    pub fn tracked(&self) -> usize {
        self.records().len()
    }
}

impl Cleanable for NotificationThrottle {
    fn name(&self) -> &'static str {
        "notification_throttle"
    }

    fn cleanup(&self) {
        self.cleanup_at(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifies_once_per_cooldown() {
        let now = Instant::now();
        let t = NotificationThrottle::new(Duration::from_secs(300));
        let u = UserId::from("alice");

        assert!(t.should_notify_at(&u, now));
        assert!(!t.should_notify_at(&u, now + Duration::from_secs(1)));
        assert!(!t.should_notify_at(&u, now + Duration::from_secs(299)));
        assert!(t.should_notify_at(&u, now + Duration::from_secs(300)));
    }

    #[test]
    fn clear_resets_cooldown() {
        let now = Instant::now();
        let t = NotificationThrottle::new(Duration::from_secs(300));
        let u = UserId::from("alice");

        assert!(t.should_notify_at(&u, now));
        assert!(!t.should_notify_at(&u, now));
        t.clear(&u);
        assert!(t.should_notify_at(&u, now));
    }

    #[test]
    fn cleanup_evicts_stale_records() {
        let now = Instant::now();
        let t = NotificationThrottle::new(Duration::from_secs(60));
        t.should_notify_at(&UserId::from("a"), now);
        t.should_notify_at(&UserId::from("b"), now + Duration::from_secs(50));

        t.cleanup_at(now + Duration::from_secs(70));
        assert_eq!(t.tracked(), 1);
    }
}
