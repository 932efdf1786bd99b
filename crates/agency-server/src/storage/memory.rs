//! In-memory TTL cache using DashMap

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Simple in-memory cache with TTL support
pub struct MemoryCache<V> {
    data: Arc<DashMap<String, CacheEntry<V>>>,
}

struct CacheEntry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V: Clone + Send + Sync + 'static> MemoryCache<V> {
    pub fn new() -> Self {
        let cache = Self {
            data: Arc::new(DashMap::new()),
        };

        // Start cleanup task
        cache.start_cleanup_task(Duration::from_secs(60));

        cache
    }

    /// Get a value from cache
    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.data.get(key)?;
        if let Some(expires) = entry.expires_at {
            if Instant::now() > expires {
                drop(entry);
                self.data.remove(key);
                return None;
            }
        }
        Some(entry.value.clone())
    }

    /// Set a value in cache (no TTL)
    pub fn set(&self, key: String, value: V) {
        self.data.insert(
            key,
            CacheEntry {
                value,
                expires_at: None,
            },
        );
    }

    /// Set a value with TTL
    pub fn set_with_ttl(&self, key: String, value: V, ttl: Duration) {
        self.data.insert(
            key,
            CacheEntry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    /// Delete a key from cache
    pub fn delete(&self, key: &str) {
        self.data.remove(key);
    }

    /// Delete every key starting with `prefix`, returning how many were removed
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let before = self.data.len();
        self.data.retain(|key, _| !key.starts_with(prefix));
        before.saturating_sub(self.data.len())
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Check if key exists
    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop expired entries now
    pub fn purge_expired(&self) {
        purge(&self.data);
    }

    fn start_cleanup_task(&self, every: Duration) {
        // Caches built outside a runtime (sync tests) simply skip the sweeper
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let data = Arc::downgrade(&self.data);
        handle.spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let Some(data) = data.upgrade() else {
                    break;
                };
                purge(&data);
            }
        });
    }
}

fn purge<V>(data: &DashMap<String, CacheEntry<V>>) {
    let now = Instant::now();
    data.retain(|_, entry| entry.expires_at.map(|expires| now <= expires).unwrap_or(true));
}

impl<V: Clone + Send + Sync + 'static> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
