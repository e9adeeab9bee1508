//! Keyed lock table.
//!
//! Hands out one async mutex per key and drops the entry again once the
//! last holder is done, so keys taken from client input never accumulate.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

/// Per-key mutexes, created on demand.
pub(crate) struct LockTable<K> {
    entries: Mutex<BTreeMap<K, Arc<Mutex<()>>>>,
}

impl<K: Ord + Clone> LockTable<K> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Lock handle for `key`. Pair every call with [`LockTable::release`].
    pub(crate) async fn handle(&self, key: &K) -> Arc<Mutex<()>> {
        self.entries.lock().await.entry(key.clone()).or_default().clone()
    }

    /// Give back a handle; the entry goes away if nobody else holds it.
    pub(crate) async fn release(&self, key: &K, handle: Arc<Mutex<()>>) {
        let mut entries = self.entries.lock().await;
        // Map entry + ours; any waiter would hold a third clone.
        if Arc::strong_count(&handle) == 2 {
            entries.remove(key);
        }
    }

    /// Number of keys currently tracked.
    pub(crate) async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_released_entry_is_dropped() {
        let table = LockTable::new();
        let handle = table.handle(&7u64).await;
        assert_eq!(table.len().await, 1);
        table.release(&7, handle).await;
        assert_eq!(table.len().await, 0);
    }

    #[tokio::test]
    async fn test_entry_kept_while_shared() {
        let table = LockTable::new();
        let first = table.handle(&1u64).await;
        let second = table.handle(&1u64).await;
        assert!(Arc::ptr_eq(&first, &second));

        table.release(&1, first).await;
        assert_eq!(table.len().await, 1);
        table.release(&1, second).await;
        assert_eq!(table.len().await, 0);
    }

    #[tokio::test]
    async fn test_waiter_shares_the_same_mutex() {
        let table = Arc::new(LockTable::new());
        let held = table.handle(&1u64).await;
        let guard = held.lock().await;

        let waiter_table = table.clone();
        let waiter = tokio::spawn(async move {
            let handle = waiter_table.handle(&1u64).await;
            let _guard = handle.lock().await;
            drop(_guard);
            waiter_table.release(&1, handle).await;
        });
        tokio::task::yield_now().await;

        drop(guard);
        table.release(&1, held).await;
        waiter.await.unwrap();
        assert_eq!(table.len().await, 0);
    }
}
