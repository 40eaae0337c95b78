//! Periodic sweep over in-memory rate-limit state.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{runtime::Handle, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// State that can evict its own expired entries.
pub trait Cleanable: Send + Sync {
    fn name(&self) -> &'static str {
        "resource"
    }

    fn cleanup(&self);
}

type Resources = Arc<Mutex<Vec<Arc<dyn Cleanable>>>>;

struct SweepTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Ticker-driven sweeper. Registering starts it; `stop` halts it and waits for the task.
pub struct BackgroundReaper {
    interval: Duration,
    resources: Resources,
    task: Mutex<Option<SweepTask>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BackgroundReaper {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            resources: Arc::new(Mutex::new(Vec::new())),
            task: Mutex::new(None),
        }
    }

    /// Add a resource to the sweep set, starting the ticker if it is not running.
    pub fn register(&self, resource: Arc<dyn Cleanable>) {
        tracing::debug!(resource = resource.name(), "reaper: registered");
        lock(&self.resources).push(resource);
        self.start();
    }

    /// Start the ticker. Returns false when already running or when there is no runtime.
    pub fn start(&self) -> bool {
        let mut task = lock(&self.task);
        if task.is_some() {
            return false;
        }

        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("reaper: no tokio runtime, periodic cleanup disabled");
            return false;
        };

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let resources = self.resources.clone();
        let interval = self.interval;

        let handle = runtime.spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => sweep(&resources),
                }
            }
            tracing::debug!("reaper: stopped");
        });

        *task = Some(SweepTask { cancel, handle });
        tracing::info!(interval_ms = interval.as_millis() as u64, "reaper: started");
        true
    }

    pub async fn stop(&self) {
        let task = lock(&self.task).take();
        if let Some(task) = task {
            task.cancel.cancel();
            let _ = task.handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task).is_some()
    }

    /// Run one sweep immediately, outside the ticker.
    pub fn sweep_now(&self) {
        sweep(&self.resources);
    }
}

impl Drop for BackgroundReaper {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.cancel.cancel();
        }
    }
}

fn sweep(resources: &Mutex<Vec<Arc<dyn Cleanable>>>) {
    let snapshot: Vec<Arc<dyn Cleanable>> = lock(resources).clone();
    for resource in snapshot {
        resource.cleanup();
        tracing::debug!(resource = resource.name(), "reaper: swept");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl Cleanable for Counter {
        fn cleanup(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn sweeps_registered_resources_until_stopped() {
        let reaper = BackgroundReaper::new(Duration::from_millis(10));
        let a = Arc::new(Counter::default());
        reaper.register(a.clone());
        assert!(reaper.is_running());

        // Registering after start just joins the sweep set.
        let b = Arc::new(Counter::default());
        reaper.register(b.clone());
        assert!(!reaper.start());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(a.0.load(Ordering::SeqCst) >= 1);
        assert!(b.0.load(Ordering::SeqCst) >= 1);

        reaper.stop().await;
        assert!(!reaper.is_running());
        let after_stop = a.0.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(a.0.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_restartable() {
        let reaper = BackgroundReaper::new(Duration::from_secs(3600));
        reaper.stop().await;
        assert!(reaper.start());
        reaper.stop().await;
        reaper.stop().await;
        assert!(reaper.start());
        reaper.stop().await;
    }

    #[test]
    fn sweep_now_runs_without_runtime() {
        let reaper = BackgroundReaper::new(Duration::from_secs(1));
        let c = Arc::new(Counter::default());
        reaper.register(c.clone());
        assert!(!reaper.is_running());
        reaper.sweep_now();
        assert_eq!(c.0.load(Ordering::SeqCst), 1);
    }
}
