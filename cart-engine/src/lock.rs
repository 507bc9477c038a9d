//! Per-cart serialization (§4.1, §5): "a cart must be updated by at most
//! one operation at a time." Realized as a `DashMap`-keyed registry of
//! `tokio::sync::Mutex` handles, the same keyed-cache shape the teacher's
//! `rule_cache: Arc<RwLock<HashMap<...>>>` uses, applied to mutual
//! exclusion instead of caching (SPEC_FULL.md §4).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct CartLockManager {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CartLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the mutex for `cart_id`, creating it on first use. Holding
    /// the returned guard for the duration of one cart operation is what
    /// gives §8.1 invariant 5 ("at most one operation at a time").
    pub async fn acquire(&self, cart_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(cart_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop locks for carts that have reached a terminal state, so the
    /// registry doesn't grow unboundedly across the life of the process.
    pub fn release(&self, cart_id: &str) {
        self.locks.remove(cart_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_concurrent_operations_on_same_cart() {
        let manager = Arc::new(CartLockManager::new());
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();

        for _ in 0..10 {
            let manager = Arc::clone(&manager);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = manager.acquire("cart-1").await;
                let before = counter.load(Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                counter.store(before + 1, Ordering::SeqCst);
            }));
        }

        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
