//! Synchronization primitives for llmrelay.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// Per-key async mutex table.
///
/// Callers locking the same key are serialized while different keys proceed
/// concurrently. An entry lives only as long as someone holds or waits for its
/// lock, so the table does not grow with the number of keys ever seen.
///
/// # Example
///
/// ```ignore
/// let locks = KeyedLocks::new();
///
/// let _guard = locks.lock("user-1").await;
/// // locks.lock("user-1") would wait here, locks.lock("user-2") would not.
/// ```
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<LockTable>,
}

impl KeyedLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting if another task holds it.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;

        KeyedGuard {
            key: key.to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of keys that are currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Return true if no key is locked or awaited.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Guard returned by [`KeyedLocks::lock`].
///
/// Dropping it releases the key and removes the table entry when nobody else
/// is waiting on it.
pub struct KeyedGuard {
    key: String,
    locks: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        // Release first so the table holds the only reference when idle.
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
