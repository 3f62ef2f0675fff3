use dashmap::DashMap;
use std::{fmt, sync::Arc, time::Duration};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::error::{ConvoyError, Result};
use crate::types::ConvoyId;

/// Per-convoy mutual exclusion for every mutation of convoy state
pub struct ConvoyLocks {
    locks: DashMap<ConvoyId, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl fmt::Debug for ConvoyLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvoyLocks")
            .field("lock_count", &self.locks.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ConvoyLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Wait for the convoy's lock. A timed-out wait is retried once before
    /// giving up with `ServiceUnavailable`.
    pub async fn acquire(&self, convoy_id: &ConvoyId) -> Result<OwnedMutexGuard<()>> {
        for attempt in 1..=2 {
            let lock = self
                .locks
                .entry(convoy_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();

            match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
                Ok(guard) => return Ok(guard),
                Err(_) => {
                    warn!(convoy = %convoy_id, attempt, "timed out waiting for convoy lock");
                }
            }
        }

        Err(ConvoyError::ServiceUnavailable(format!(
            "convoy {convoy_id} is busy, try again"
        )))
    }

    /// Drop lock entries that nobody holds or waits on
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
