//! Request deduplication
//!
//! Identical reads arriving while one is already running share its result,
//! and successful results are served from a short TTL cache. Errors are
//! never cached.

use crate::storage::MemoryCache;
use agency_core::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type SharedResult = Shared<BoxFuture<'static, Result<Value>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    /// Served from cache
    pub hits: u64,
    /// Attached to a request already in flight
    pub joined: u64,
    /// Ran the producer
    pub misses: u64,
    pub cached_entries: u64,
}

pub struct RequestDeduplicator {
    cache: Arc<MemoryCache<Value>>,
    in_flight: Arc<DashMap<String, (u64, SharedResult)>>,
    ttl: Duration,
    /// Bumped by every invalidation; results started before a bump are not cached
    generation: Arc<AtomicU64>,
    next_flight: AtomicU64,
    hits: AtomicU64,
    joined: AtomicU64,
    misses: AtomicU64,
}

impl RequestDeduplicator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(MemoryCache::new()),
            in_flight: Arc::new(DashMap::new()),
            ttl,
            generation: Arc::new(AtomicU64::new(0)),
            next_flight: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            joined: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn run<T, F, Fut>(&self, key: &str, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(value) = self.cache.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("dedup cache hit: {}", key);
            return Ok(serde_json::from_value(value)?);
        }

        let shared = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                self.joined.fetch_add(1, Ordering::Relaxed);
                debug!("dedup joined in-flight request: {}", key);
                entry.get().1.clone()
            }
            Entry::Vacant(entry) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let flight = self.next_flight.fetch_add(1, Ordering::Relaxed);
                let started_at = self.generation.load(Ordering::Acquire);

                let cache = self.cache.clone();
                let in_flight = self.in_flight.clone();
                let generation = self.generation.clone();
                let ttl = self.ttl;
                let owned_key = key.to_string();
                let work = producer();

                // Bookkeeping lives inside the shared future so it completes
                // even if the request that started it is cancelled
                let task = async move {
                    let result = match work.await {
                        Ok(value) => serde_json::to_value(value).map_err(Into::into),
                        Err(e) => Err(e),
                    };
                    if let Ok(value) = &result {
                        if generation.load(Ordering::Acquire) == started_at {
                            cache.set_with_ttl(owned_key.clone(), value.clone(), ttl);
                        }
                    }
                    in_flight.remove_if(&owned_key, |_, (id, _)| *id == flight);
                    result
                }
                .boxed()
                .shared();

                entry.insert((flight, task.clone()));
                task
            }
        };

        let value = shared.await?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn invalidate(&self, key: &str) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.delete(key);
        self.in_flight.remove(key);
    }

    /// Drop every cached or in-flight entry under `prefix`
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let removed = self.cache.delete_prefix(prefix);
        self.in_flight.retain(|key, _| !key.starts_with(prefix));
        debug!("dedup invalidated {} entries under {}", removed, prefix);
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.clear();
        self.in_flight.clear();
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            hits: self.hits.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            cached_entries: self.cache.len() as u64,
        }
    }
}

/// Cache key prefix for everything read on behalf of one agency
pub fn agency_prefix(agency_id: &str) -> String {
    format!("agency:{}:", agency_id)
}
