//! Opt-in timing instrumentation around command execution.
//!
//! Operations are named explicitly by the caller; there is no ambient
//! request-scoped state.

use std::{future::Future, str::FromStr, time::Duration};

use tokio::time::Instant;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimingLevel {
    #[default]
    Disabled,
    Basic,
    Detailed,
    Debug,
}

impl TimingLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            TimingLevel::Disabled => "disabled",
            TimingLevel::Basic => "basic",
            TimingLevel::Detailed => "detailed",
            TimingLevel::Debug => "debug",
        }
    }
}

impl FromStr for TimingLevel {
    type Err = std::convert::Infallible;

    /// Unknown values disable tracking rather than failing startup.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "basic" => TimingLevel::Basic,
            "detailed" => TimingLevel::Detailed,
            "debug" => TimingLevel::Debug,
            _ => TimingLevel::Disabled,
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Tracker {
    level: TimingLevel,
    threshold: Duration,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::disabled()
    }
}

impl Tracker {
    pub fn new(level: TimingLevel, threshold: Duration) -> Self {
        Self { level, threshold }
    }

    pub fn disabled() -> Self {
        Self::new(TimingLevel::Disabled, Duration::from_millis(100))
    }

    pub fn level(&self) -> TimingLevel {
        self.level
    }

    fn admits(&self, level: TimingLevel) -> bool {
        match self.level {
            TimingLevel::Disabled => false,
            TimingLevel::Debug => true,
            configured => level <= configured,
        }
    }

    /// Whether an operation at `level` that took `elapsed` would be logged.
    pub fn should_log(&self, level: TimingLevel, elapsed: Duration) -> bool {
        self.admits(level) && elapsed >= self.threshold
    }

    pub async fn track<F, T>(&self, operation: &str, level: TimingLevel, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        if !self.admits(level) {
            return fut.await;
        }

        let start = Instant::now();
        let out = fut.await;
        let elapsed = start.elapsed();

        if elapsed >= self.threshold {
            tracing::info!(
                operation,
                elapsed_ms = elapsed.as_millis() as u64,
                level = level.as_str(),
                "performance tracking"
            );
        }
        out
    }

    pub async fn track_command<F, T>(&self, command: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let operation = format!("command_execution:{command}");
        self.track(&operation, TimingLevel::Basic, fut).await
    }

    pub async fn track_sub_operation<F, T>(&self, operation: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        self.track(operation, TimingLevel::Detailed, fut).await
    }

    pub async fn track_internal<F, T>(&self, operation: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        self.track(operation, TimingLevel::Debug, fut).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!("Basic".parse::<TimingLevel>().unwrap(), TimingLevel::Basic);
        assert_eq!(
            " detailed ".parse::<TimingLevel>().unwrap(),
            TimingLevel::Detailed
        );
        assert_eq!("DEBUG".parse::<TimingLevel>().unwrap(), TimingLevel::Debug);
        assert_eq!("nope".parse::<TimingLevel>().unwrap(), TimingLevel::Disabled);
    }

    #[test]
    fn level_gates_operations() {
        let ms = Duration::from_millis;
        let basic = Tracker::new(TimingLevel::Basic, ms(100));
        assert!(basic.should_log(TimingLevel::Basic, ms(150)));
        assert!(!basic.should_log(TimingLevel::Detailed, ms(150)));
        assert!(!basic.should_log(TimingLevel::Basic, ms(50)));

        let debug = Tracker::new(TimingLevel::Debug, ms(0));
        assert!(debug.should_log(TimingLevel::Debug, ms(0)));
        assert!(debug.should_log(TimingLevel::Basic, ms(0)));

        let off = Tracker::disabled();
        assert!(!off.should_log(TimingLevel::Basic, ms(10_000)));
    }

    #[tokio::test]
    async fn track_returns_inner_output() {
        let t = Tracker::new(TimingLevel::Debug, Duration::ZERO);
        let v = t.track_command("help", async { 41 + 1 }).await;
        assert_eq!(v, 42);
        let v = Tracker::disabled().track_internal("noop", async { "ok" }).await;
        assert_eq!(v, "ok");
    }
}
