//! Sharded per-product locks
//!
//! Concurrent stock changes for the same product must not interleave into
//! negative drift, so sync work is serialized on (tenant_id, product_id).
//! A sharded table keeps the hot path cheap: the shard mutex is held only to
//! look up the product's async mutex, never across an await.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

const SHARDS: usize = 16;

type LockKey = (Uuid, Uuid);

pub struct ProductLocks {
    shards: Vec<StdMutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>>,
}

impl ProductLocks {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| StdMutex::new(HashMap::new())).collect(),
        }
    }

    fn shard_for(&self, key: &LockKey) -> &StdMutex<HashMap<LockKey, Arc<AsyncMutex<()>>>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    /// Acquire the lock for one product. Holds are expected to be short:
    /// the canonical write plus target enumeration, not the provider fan-out.
    pub async fn acquire(&self, tenant_id: Uuid, product_id: Uuid) -> OwnedMutexGuard<()> {
        let key = (tenant_id, product_id);
        let lock = {
            let mut shard = self.shard_for(&key).lock().expect("lock shard poisoned");
            Arc::clone(shard.entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
        };

        lock.lock_owned().await
    }

    /// Drop lock entries nobody currently holds. Called opportunistically so
    /// a long-lived worker does not accumulate one mutex per product ever
    /// touched.
    pub fn purge_idle(&self) -> usize {
        let mut purged = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().expect("lock shard poisoned");
            let before = shard.len();
            shard.retain(|_, lock| Arc::strong_count(lock) > 1);
            purged += before - shard.len();
        }
        purged
    }
}

impl Default for ProductLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_same_product_serializes() {
        let locks = Arc::new(ProductLocks::new());
        let tenant = Uuid::new_v4();
        let product = Uuid::new_v4();

        let in_critical = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let in_critical = Arc::clone(&in_critical);
            let max_seen = Arc::clone(&max_seen);

            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(tenant, product).await;
                let now = in_critical.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                in_critical.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1, "critical sections overlapped");
    }

    #[tokio::test]
    async fn test_different_products_do_not_block() {
        let locks = ProductLocks::new();
        let tenant = Uuid::new_v4();

        let guard_a = locks.acquire(tenant, Uuid::new_v4()).await;
        // Acquiring a different product while holding A must not deadlock.
        let guard_b = locks.acquire(tenant, Uuid::new_v4()).await;

        drop(guard_a);
        drop(guard_b);
    }

    #[tokio::test]
    async fn test_purge_keeps_held_locks() {
        let locks = ProductLocks::new();
        let tenant = Uuid::new_v4();
        let held = Uuid::new_v4();
        let released = Uuid::new_v4();

        let guard = locks.acquire(tenant, held).await;
        drop(locks.acquire(tenant, released).await);

        let purged = locks.purge_idle();
        assert_eq!(purged, 1);

        // The held lock still serializes.
        drop(guard);
        let _again = locks.acquire(tenant, held).await;
    }
}
