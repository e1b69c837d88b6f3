//! Keyed Lock Manager - One mutual-exclusion lock per identity key.
//!
//! Locks are handed out as reference-counted handles and tracked weakly, so
//! the map only keeps locks that some caller still holds. Dead entries are
//! dropped by [`KeyedLockManager::prune`], which the conversation store runs
//! on every eviction sweep.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex as Guard;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Handle to the lock of one identity key.
///
/// Cloning the handle shares the same lock. The lock lives as long as any
/// handle (or a guard obtained from one) is alive.
#[derive(Clone, Debug)]
pub struct KeyLock {
    inner: Arc<Mutex<()>>,
}

impl KeyLock {
    /// Wait for exclusive access. The guard keeps the lock alive.
    pub async fn lock(&self) -> OwnedMutexGuard<()> {
        self.inner.clone().lock_owned().await
    }

    /// Whether two handles refer to the same lock instance.
    pub fn same_lock(&self, other: &KeyLock) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Issues per-key locks with double-checked creation.
#[derive(Debug, Default)]
pub struct KeyedLockManager {
    locks: DashMap<String, Weak<Mutex<()>>>,
    create_guard: Guard<()>,
}

impl KeyedLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the lock for `key`, creating it if no live one exists.
    ///
    /// Concurrent callers for the same key always receive the same instance.
    pub fn acquire(&self, key: &str) -> KeyLock {
        if let Some(inner) = self.lookup(key) {
            return KeyLock { inner };
        }

        let _guard = self.create_guard.lock();
        // Another caller may have created it while we waited for the guard.
        if let Some(inner) = self.lookup(key) {
            return KeyLock { inner };
        }

        let inner = Arc::new(Mutex::new(()));
        self.locks.insert(key.to_string(), Arc::downgrade(&inner));
        KeyLock { inner }
    }

    /// Shorthand for `acquire(key).lock()`.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.acquire(key).lock().await
    }

    /// Drop map entries whose lock is no longer referenced.
    ///
    /// Returns how many entries were removed.
    pub fn prune(&self) -> usize {
        let _guard = self.create_guard.lock();
        let before = self.locks.len();
        self.locks.retain(|_, weak| weak.strong_count() > 0);
        before - self.locks.len()
    }

    /// Number of keys whose lock is currently referenced.
    pub fn len(&self) -> usize {
        self.locks
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &str) -> Option<Arc<Mutex<()>>> {
        self.locks.get(key).and_then(|weak| weak.upgrade())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_same_key_returns_same_lock() {
        let manager = KeyedLockManager::new();
        let a = manager.acquire("alice");
        let b = manager.acquire("alice");
        assert!(a.same_lock(&b));
    }

    #[test]
    fn test_distinct_keys_get_distinct_locks() {
        let manager = KeyedLockManager::new();
        let a = manager.acquire("alice");
        let b = manager.acquire("bob");
        assert!(!a.same_lock(&b));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_concurrent_acquire_single_creation() {
        let manager = Arc::new(KeyedLockManager::new());
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let manager = manager.clone();
                std::thread::spawn(move || manager.acquire("shared"))
            })
            .collect();

        let locks: Vec<KeyLock> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(locks.iter().all(|lock| lock.same_lock(&locks[0])));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_unreferenced_locks_are_reclaimed() {
        let manager = KeyedLockManager::new();
        let first = manager.acquire("alice");
        drop(first);

        assert_eq!(manager.len(), 0);
        assert_eq!(manager.prune(), 1);
        assert!(manager.is_empty());

        // A fresh lock is created on the next request.
        let again = manager.acquire("alice");
        assert_eq!(manager.len(), 1);
        drop(again);
    }

    #[test]
    fn test_prune_keeps_live_locks() {
        let manager = KeyedLockManager::new();
        let held = manager.acquire("alice");
        drop(manager.acquire("bob"));

        assert_eq!(manager.prune(), 1);
        assert!(held.same_lock(&manager.acquire("alice")));
    }

    #[tokio::test]
    async fn test_guard_keeps_lock_alive() {
        let manager = KeyedLockManager::new();
        let guard = manager.lock("alice").await;
        assert_eq!(manager.len(), 1);

        let contender = manager.acquire("alice");
        let blocked = tokio::time::timeout(Duration::from_millis(50), contender.lock()).await;
        assert!(blocked.is_err());

        drop(guard);
        let acquired = tokio::time::timeout(Duration::from_millis(50), contender.lock()).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_other_keys_not_blocked() {
        let manager = Arc::new(KeyedLockManager::new());
        let _held = manager.lock("slow").await;

        let other = tokio::time::timeout(Duration::from_millis(100), manager.lock("fast")).await;
        assert!(other.is_ok());
    }
}
