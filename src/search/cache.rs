//! Keyed query cache: bounded LRU with per-entry TTL, plus singleflight
//! deduplication of concurrent identical requests.
//!
//! The LRU map and the inflight map live under one lock so the
//! insert-or-inflight decision is a single critical section. The fetch
//! itself runs on a detached task outside the lock: every caller, the
//! electing one included, awaits the shared result on a `watch` channel,
//! so an abandoned caller never cancels the elected fetch. A failed fetch
//! rejects all waiters and caches nothing.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{CoreError, CoreResult};
use crate::models::{SearchFilters, SectionHit, SharedHits};

const DEFAULT_CAPACITY: usize = 1_000;
const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Identity of a cached query: corpus fingerprint + normalized query +
/// filters + result cap.
#[derive(Debug, Clone)]
pub struct QueryKey {
    pub fingerprint: String,
    pub query: String,
    pub filters: SearchFilters,
    pub max_results: Option<usize>,
}

impl QueryKey {
    /// Stable serialized form; absent fields are omitted entirely.
    pub fn serialize(&self) -> String {
        let mut parts = vec![self.fingerprint.clone(), self.query.to_lowercase()];
        if let Some(release) = &self.filters.release {
            parts.push(format!("r:{release}"));
        }
        if let Some(service) = &self.filters.service {
            parts.push(format!("s:{service}"));
        }
        if let Some(doc_types) = &self.filters.doc_types {
            let mut sorted = doc_types.clone();
            sorted.sort();
            parts.push(format!("dt:{}", sorted.join(",")));
        }
        if let Some(max) = self.max_results {
            parts.push(format!("max:{max}"));
        }
        parts.join("|")
    }
}

type InflightResult = Option<Result<SharedHits, String>>;

struct Entry {
    hits: SharedHits,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    map: HashMap<String, Entry>,
    /// LRU order; front is the eviction candidate. Keys are unique.
    order: VecDeque<String>,
    inflight: HashMap<String, watch::Receiver<InflightResult>>,
    hits: u64,
    misses: u64,
    inflight_hits: u64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct QueryCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub inflight_hits: u64,
    pub hit_rate: f64,
}

pub struct QueryCache {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
    ttl: Duration,
}

enum Lookup {
    Hit(SharedHits),
    Wait(watch::Receiver<InflightResult>),
    Lead(watch::Sender<InflightResult>, watch::Receiver<InflightResult>),
}

impl QueryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    /// Return the cached hits for `key`, or run `fetch` — exactly once per
    /// key across concurrent callers.
    pub async fn get_or_fetch<F, Fut>(&self, key: &QueryKey, fetch: F) -> CoreResult<SharedHits>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<Vec<SectionHit>>> + Send + 'static,
    {
        let serialized = key.serialize();

        let lookup = {
            let mut inner = self.inner.lock();

            let now = Instant::now();
            let expired = matches!(inner.map.get(&serialized), Some(e) if now >= e.expires_at);
            if expired {
                inner.map.remove(&serialized);
                inner.order.retain(|k| k != &serialized);
            }
            let fresh = inner.map.get(&serialized).map(|e| e.hits.clone());

            if let Some(hits) = fresh {
                inner.hits += 1;
                // Refresh LRU position.
                inner.order.retain(|k| k != &serialized);
                inner.order.push_back(serialized.clone());
                Lookup::Hit(hits)
            } else if let Some(rx) = inner.inflight.get(&serialized).cloned() {
                inner.inflight_hits += 1;
                Lookup::Wait(rx)
            } else {
                inner.misses += 1;
                let (tx, rx) = watch::channel(None);
                inner.inflight.insert(serialized.clone(), rx.clone());
                Lookup::Lead(tx, rx)
            }
        };

        match lookup {
            Lookup::Hit(hits) => Ok(hits),
            Lookup::Wait(rx) => Self::await_result(rx).await,
            Lookup::Lead(tx, rx) => {
                let future = fetch();
                let inner = self.inner.clone();
                let capacity = self.capacity;
                let ttl = self.ttl;
                tokio::spawn(async move {
                    let result = future.await;
                    let mut inner = inner.lock();
                    inner.inflight.remove(&serialized);
                    match result {
                        Ok(hits) => {
                            let shared: SharedHits = Arc::new(hits);
                            inner.map.insert(
                                serialized.clone(),
                                Entry {
                                    hits: shared.clone(),
                                    expires_at: Instant::now() + ttl,
                                },
                            );
                            inner.order.push_back(serialized);
                            while inner.map.len() > capacity {
                                match inner.order.pop_front() {
                                    Some(oldest) => {
                                        inner.map.remove(&oldest);
                                    }
                                    None => break,
                                }
                            }
                            drop(inner);
                            let _ = tx.send(Some(Ok(shared)));
                        }
                        Err(e) => {
                            drop(inner);
                            let _ = tx.send(Some(Err(e.to_string())));
                        }
                    }
                });
                Self::await_result(rx).await
            }
        }
    }

    async fn await_result(mut rx: watch::Receiver<InflightResult>) -> CoreResult<SharedHits> {
        loop {
            let settled = rx.borrow().clone();
            if let Some(result) = settled {
                return result.map_err(CoreError::Provider);
            }
            if rx.changed().await.is_err() {
                // Sender dropped without settling: treat as a failed fetch.
                let settled = rx.borrow().clone();
                return match settled {
                    Some(result) => result.map_err(CoreError::Provider),
                    None => Err(CoreError::Provider("query fetch abandoned".into())),
                };
            }
        }
    }

    /// Drop every entry whose key belongs to `fingerprint`.
    pub fn invalidate_fingerprint(&self, fingerprint: &str) {
        let prefix = format!("{fingerprint}|");
        let mut inner = self.inner.lock();
        inner.map.retain(|k, _| !k.starts_with(&prefix));
        let map = std::mem::take(&mut inner.map);
        inner.order.retain(|k| map.contains_key(k));
        inner.map = map;
    }

    /// Empty the cache and the inflight map.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
        inner.inflight.clear();
    }

    pub fn stats(&self) -> QueryCacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses + inner.inflight_hits;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            (inner.hits + inner.inflight_hits) as f64 / lookups as f64
        };
        QueryCacheStats {
            entries: inner.map.len(),
            hits: inner.hits,
            misses: inner.misses,
            inflight_hits: inner.inflight_hits,
            hit_rate,
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}
