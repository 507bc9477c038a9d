//! The state-store client (C2): key/value with TTL, realized in-process
//! over `dashmap` + `parking_lot` (the teacher pairs both for its
//! `rule_cache`/client registries) since no external Redis is assumed
//! here. A trait separates the contract from this implementation so a
//! Redis-backed one could replace it without touching callers.
//!
//! Two key namespaces share one store: `cart:{cartId}` for the write-through
//! cart cache (C6) and `dedup:{eventId}` for the duplicate-suppression
//! ledger consumed by C10/C11.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);
    async fn delete(&self, key: &str);
    /// Sets the key only if absent, returning whether it was newly set —
    /// the primitive the dedup ledger (§4.6 step 2) is built on.
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> bool;
}

struct Entry {
    value: Vec<u8>,
    expires_at_millis: u64,
}

/// In-memory TTL keystore. A background sweep (default every 60s) evicts
/// expired keys so the map doesn't grow unbounded between accesses — the
/// same periodic-task shape the teacher's background workers use, applied
/// here to cache maintenance instead of I/O retries.
pub struct InMemoryStateStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self { entries: Arc::new(DashMap::new()) }
    }

    pub fn spawn_sweeper(&self, shutdown: CancellationToken, interval: Duration) {
        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = now_millis();
                        entries.retain(|_, entry| entry.expires_at_millis > now);
                    }
                }
            }
        });
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = now_millis();
        self.entries.get(key).and_then(|entry| {
            if entry.expires_at_millis > now {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let expires_at_millis = now_millis() + ttl.as_millis() as u64;
        self.entries.insert(key.to_string(), Entry { value, expires_at_millis });
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> bool {
        let now = now_millis();
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) if occupied.get().expires_at_millis > now => false,
            entry => {
                let expires_at_millis = now + ttl.as_millis() as u64;
                entry.insert(Entry { value, expires_at_millis });
                true
            }
        }
    }
}

pub fn cart_cache_key(cart_id: &str) -> String {
    format!("cart:{cart_id}")
}

pub fn dedup_key(event_id: &str) -> String {
    format!("dedup:{event_id}")
}

/// Dedup marker TTL: must exceed the republish lookback (24h) plus one
/// republish interval (§9) — 26 hours by default.
pub fn dedup_ttl() -> Duration {
    Duration::from_secs(26 * 3_600)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_suppresses_duplicates() {
        let store = InMemoryStateStore::new();
        let first = store.set_if_absent("dedup:evt-1", vec![1], Duration::from_secs(60)).await;
        let second = store.set_if_absent("dedup:evt-1", vec![2], Duration::from_secs(60)).await;
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let store = InMemoryStateStore::new();
        store.set("k", vec![1], Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get("k").await.is_none());
    }
}
