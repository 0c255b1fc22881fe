//! Concurrent session cap
//!
//! Each accepted connection must hold a [`SessionPermit`] for as long as its
//! session runs. When none is available the listener turns the connection
//! away immediately instead of queueing it, so the accept loop never waits
//! on a slow session.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    max_concurrent: usize,
    permits: Arc<Semaphore>,
}

/// Held by a running session; released on drop
#[derive(Debug)]
pub struct SessionPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            permits: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Claim a slot without waiting. `None` means the server is full.
    pub fn try_acquire(&self) -> Option<SessionPermit> {
        self.permits
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| SessionPermit { _permit: permit })
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }
}
