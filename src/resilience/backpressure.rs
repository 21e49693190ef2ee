//! Bounds total concurrent in-flight calls across all targets with a
//! counting semaphore; callers that can't get a permit within the
//! configured wait either queue or fail fast, per caller preference.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::{CoreError, ErrorKind};

/// Caps the number of concurrently in-flight calls.
pub struct Backpressure {
    semaphore: Arc<Semaphore>,
    queue_wait: Duration,
}

impl Backpressure {
    /// Allows up to `max_inflight` concurrent calls; callers that would
    /// exceed it wait up to `queue_wait` for a slot before failing.
    #[must_use]
    pub fn new(max_inflight: usize, queue_wait: Duration) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(max_inflight)), queue_wait }
    }

    /// Acquires a permit, waiting up to the configured queue timeout.
    /// Returns `Overloaded` if none becomes available in time.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, CoreError> {
        match tokio::time::timeout(self.queue_wait, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(CoreError::classified(
                ErrorKind::ServerError,
                crate::error::ErrorContext {
                    message: "backpressure semaphore closed".to_string(),
                    ..Default::default()
                },
            )),
            Err(_elapsed) => Err(CoreError::classified(
                ErrorKind::Overloaded,
                crate::error::ErrorContext {
                    message: "no in-flight slot became available before the queue wait elapsed".to_string(),
                    ..Default::default()
                },
            )),
        }
    }

    /// Number of slots currently free, for diagnostics.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
