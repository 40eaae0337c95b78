//! Bounded concurrency gate for command execution.

use std::{sync::Arc, time::Duration};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("too many concurrent commands (max {max})")]
    Busy { max: usize },

    #[error("cancelled while waiting for a slot")]
    Cancelled,

    #[error("admission controller is closed")]
    Closed,
}

/// A held execution slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl AdmissionController {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.max.saturating_sub(self.semaphore.available_permits())
    }

    /// Single non-blocking attempt.
    pub fn try_acquire(&self) -> Result<AdmissionPermit, AdmissionError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(AdmissionPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) => Err(AdmissionError::Busy { max: self.max }),
            Err(TryAcquireError::Closed) => Err(AdmissionError::Closed),
        }
    }

    /// Wait at most `wait` for a slot. A zero wait is the same as `try_acquire`.
    pub async fn acquire(
        &self,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<AdmissionPermit, AdmissionError> {
        match self.try_acquire() {
            Err(AdmissionError::Busy { .. }) if !wait.is_zero() => {}
            other => return other,
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AdmissionError::Cancelled),
            res = tokio::time::timeout(wait, self.semaphore.clone().acquire_owned()) => match res {
                Ok(Ok(permit)) => Ok(AdmissionPermit { _permit: permit }),
                Ok(Err(_closed)) => Err(AdmissionError::Closed),
                Err(_elapsed) => Err(AdmissionError::Busy { max: self.max }),
            },
        }
    }

    /// Refuse all further acquisitions. Held permits stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_max_slots() {
        let ac = AdmissionController::new(2);
        let a = ac.try_acquire().unwrap();
        let _b = ac.try_acquire().unwrap();
        assert_eq!(ac.in_flight(), 2);
        assert_eq!(ac.try_acquire().unwrap_err(), AdmissionError::Busy { max: 2 });

        drop(a);
        assert_eq!(ac.in_flight(), 1);
        assert!(ac.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn bounded_wait_gets_released_slot() {
        let ac = Arc::new(AdmissionController::new(1));
        let held = ac.try_acquire().unwrap();
        let cancel = CancellationToken::new();

        let waiter = {
            let ac = ac.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { ac.acquire(Duration::from_secs(5), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        let permit = waiter.await.unwrap();
        assert!(permit.is_ok());
    }

    #[tokio::test]
    async fn wait_times_out_as_busy_and_cancel_is_distinct() {
        let ac = AdmissionController::new(1);
        let _held = ac.try_acquire().unwrap();

        let cancel = CancellationToken::new();
        let res = ac.acquire(Duration::from_millis(20), &cancel).await;
        assert_eq!(res.unwrap_err(), AdmissionError::Busy { max: 1 });

        cancel.cancel();
        let res = ac.acquire(Duration::from_secs(5), &cancel).await;
        assert_eq!(res.unwrap_err(), AdmissionError::Cancelled);
    }

    #[tokio::test]
    async fn closed_controller_refuses() {
        let ac = AdmissionController::new(3);
        ac.close();
        assert_eq!(ac.try_acquire().unwrap_err(), AdmissionError::Closed);
        let cancel = CancellationToken::new();
        assert_eq!(
            ac.acquire(Duration::ZERO, &cancel).await.unwrap_err(),
            AdmissionError::Closed
        );
    }
}
