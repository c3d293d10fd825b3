//! Per-circle writer locks.
//!
//! Mutations on one circle are serialized; different circles proceed in
//! parallel. Guards are owned so they can travel into blocking storage
//! tasks. A table entry lives only while someone holds or waits on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::warn;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::error::{CircleError, Result};
use super::types::CircleId;

type LockTable = Arc<Mutex<HashMap<CircleId, Arc<AsyncMutex<()>>>>>;

/// Lock table keyed by circle id.
#[derive(Debug, Default)]
pub struct CircleLocks {
    table: LockTable,
}

/// Exclusive access to one circle. Dropping it releases the lock and
/// forgets the table entry once nobody else needs it.
#[derive(Debug)]
pub struct CircleGuard {
    circle: CircleId,
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl Drop for CircleGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        release(&self.table, self.circle);
    }
}

impl CircleLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `circle`, created on first use.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::Storage`] if the table mutex is poisoned.
    pub fn lock_for(&self, circle: CircleId) -> Result<Arc<AsyncMutex<()>>> {
        let mut table = self
            .table
            .lock()
            .map_err(|e| CircleError::Storage(format!("Failed to acquire lock table: {e}")))?;
        Ok(Arc::clone(table.entry(circle).or_default()))
    }

    /// Waits up to `timeout` for exclusive access to `circle`.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::StorageTimeout`] if the lock is not acquired
    /// in time.
    pub async fn acquire(&self, circle: CircleId, timeout: Duration) -> Result<CircleGuard> {
        let lock = self.lock_for(circle)?;
        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(CircleGuard {
                circle,
                guard: Some(guard),
                table: Arc::clone(&self.table),
            }),
            Err(_) => {
                release(&self.table, circle);
                warn!("circle {circle}: writer lock not acquired within {timeout:?}");
                Err(CircleError::StorageTimeout)
            }
        }
    }

    /// Number of circles with a live lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().map_or(0, |table| table.len())
    }

    /// Whether no circle has a live lock entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drops the entry for `circle` if the table holds the only reference.
fn release(table: &LockTable, circle: CircleId) {
    let Ok(mut table) = table.lock() else {
        return;
    };
    if table
        .get(&circle)
        .is_some_and(|lock| Arc::strong_count(lock) == 1)
    {
        table.remove(&circle);
    }
}
