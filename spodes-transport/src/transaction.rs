//! Exclusive request/response transactions on a shared line

use spodes_core::{MediaError, MediaResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

/// One-at-a-time lock over a shared line's wire
#[derive(Debug, Clone)]
pub struct TransactionLock {
    permits: Arc<Semaphore>,
}

/// Proof of holding a [`TransactionLock`]; dropping it ends the transaction
#[derive(Debug)]
pub struct TransactionGuard {
    _permit: OwnedSemaphorePermit,
}

impl TransactionLock {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait up to `limit` for the line to become free
    ///
    /// # Errors
    ///
    /// `MediaError::Concurrency` when another caller keeps the line for longer
    /// than `limit`. The caller must not touch the wire in that case.
    pub async fn acquire(&self, limit: Duration) -> MediaResult<TransactionGuard> {
        match timeout(limit, Arc::clone(&self.permits).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(TransactionGuard { _permit: permit }),
            Ok(Err(_)) => Err(MediaError::Concurrency("transaction lock closed".to_string())),
            Err(_) => Err(MediaError::Concurrency(format!(
                "transaction lock not acquired within {:?}",
                limit
            ))),
        }
    }

    /// Whether some caller is inside a transaction right now
    pub fn is_held(&self) -> bool {
        self.permits.available_permits() == 0
    }
}

impl Default for TransactionLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-handle transaction state
///
/// Holds the guard between `send` and the end of the exchange. Ending is
/// idempotent: the guard is dropped at most once.
#[derive(Debug, Default)]
pub struct Transaction {
    guard: Option<TransactionGuard>,
}

impl Transaction {
    pub fn is_active(&self) -> bool {
        self.guard.is_some()
    }

    /// Enter a transaction unless one is already held by this handle
    pub async fn begin(&mut self, lock: &TransactionLock, limit: Duration) -> MediaResult<()> {
        if self.guard.is_none() {
            self.guard = Some(lock.acquire(limit).await?);
        }
        Ok(())
    }

    /// Release the lock if held
    ///
    /// # Returns
    ///
    /// `true` if a transaction was actually ended
    pub fn end(&mut self) -> bool {
        self.guard.take().is_some()
    }
}
