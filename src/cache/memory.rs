use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{CacheKey, ResponseCache};
use crate::{error::AppResult, models::ChatResponse};

struct CacheEntry {
    value: ChatResponse,
    created_at: Instant,
}

#[derive(Default)]
struct Store {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Keys by insertion time, oldest first
    order: VecDeque<CacheKey>,
}

impl Store {
    fn remove(&mut self, key: &CacheKey) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }
}

/// Process-lifetime response cache with TTL expiry and FIFO eviction
///
/// Expired entries are purged lazily: on `get` for the requested key and on
/// `set` for the expired prefix of the insertion queue. When the store is full
/// the single oldest entry is evicted before inserting.
pub struct TtlCache {
    store: Mutex<Store>,
    ttl: Duration,
    max_entries: usize,
}

impl TtlCache {
    /// `max_entries` is clamped to a minimum of 1.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.created_at) > self.ttl
    }
}

#[async_trait::async_trait]
impl ResponseCache for TtlCache {
    async fn get(&self, key: &CacheKey) -> AppResult<Option<ChatResponse>> {
        let now = Instant::now();
        let mut store = self.store.lock().await;

        let expired = match store.entries.get(key) {
            None => return Ok(None),
            Some(entry) => self.is_expired(entry, now),
        };

        if expired {
            tracing::debug!(key = %key, "Cache entry expired, removing");
            store.remove(key);
            return Ok(None);
        }

        Ok(store.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: CacheKey, value: ChatResponse) -> AppResult<()> {
        let now = Instant::now();
        let mut store = self.store.lock().await;

        // An overwrite counts as a fresh insertion.
        store.remove(&key);

        // Insertion order is also creation order, so expired entries form a prefix.
        while let Some(oldest) = store.order.front() {
            let expired = store
                .entries
                .get(oldest)
                .map_or(true, |entry| self.is_expired(entry, now));
            if !expired {
                break;
            }
            if let Some(oldest) = store.order.pop_front() {
                store.entries.remove(&oldest);
            }
        }

        while store.entries.len() >= self.max_entries {
            match store.order.pop_front() {
                Some(oldest) => {
                    tracing::debug!(key = %oldest, "Cache full, evicting oldest entry");
                    store.entries.remove(&oldest);
                }
                None => break,
            }
        }

        store.order.push_back(key.clone());
        store.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
            },
        );

        Ok(())
    }

    async fn entry_count(&self) -> usize {
        let now = Instant::now();
        let store = self.store.lock().await;
        store
            .entries
            .values()
            .filter(|entry| !self.is_expired(entry, now))
            .count()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
