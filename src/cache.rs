//! Process-local fetch cache: at-most-one-in-flight per fingerprint,
//! per-source TTL, LRU-bounded size, negative caching for errors.
//!
//! Grounded on the teacher's `scrapers/polymarket_book_store.rs`
//! (`parking_lot`-guarded map + recency tracking), generalized from an
//! orderbook store to a generic fingerprint -> `SourceFetch` cache.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;

use crate::series::{FetchStatus, Fingerprint, SourceFetch};

struct CacheEntry {
    fetch: SourceFetch,
    expires_at: Instant,
    generation: u64,
}

/// Per-fingerprint single-flight gate. Held for the duration of a loader
/// call so concurrent callers with the same fingerprint block on the same
/// in-flight fetch instead of issuing redundant upstream requests.
type Gate = Arc<AsyncMutex<()>>;

pub struct FetchCache {
    table: RwLock<HashMap<Fingerprint, CacheEntry>>,
    recency: RwLock<VecDeque<(u64, Fingerprint)>>,
    gates: RwLock<HashMap<Fingerprint, Gate>>,
    next_generation: RwLock<u64>,
    max_size: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl FetchCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            recency: RwLock::new(VecDeque::new()),
            gates: RwLock::new(HashMap::new()),
            next_generation: RwLock::new(0),
            max_size: max_size.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    fn fresh_entry(&self, fingerprint: &Fingerprint) -> Option<SourceFetch> {
        let table = self.table.read();
        let entry = table.get(fingerprint)?;
        if entry.expires_at > Instant::now() {
            Some(entry.fetch.clone())
        } else {
            None
        }
    }

    fn next_gen(&self) -> u64 {
        let mut next = self.next_generation.write();
        let gen = *next;
        *next += 1;
        gen
    }

    fn touch_recency(&self, fingerprint: &Fingerprint) {
        let generation = self.generation_of(fingerprint).unwrap_or_else(|| self.next_gen());
        self.recency.write().push_back((generation, fingerprint.clone()));
    }

    fn generation_of(&self, fingerprint: &Fingerprint) -> Option<u64> {
        self.table.read().get(fingerprint).map(|e| e.generation)
    }

    fn insert(&self, fingerprint: Fingerprint, fetch: SourceFetch, ttl: Duration) {
        let generation = self.next_gen();
        {
            let mut table = self.table.write();
            table.insert(
                fingerprint.clone(),
                CacheEntry {
                    fetch,
                    expires_at: Instant::now() + ttl,
                    generation,
                },
            );
        }
        self.recency.write().push_back((generation, fingerprint));
        self.evict_if_needed();
    }

    /// LRU eviction: `recency` may contain stale records for a fingerprint
    /// that was re-inserted (and so bumped to a newer generation) since
    /// the record was pushed. A stale record's generation won't match the
    /// table's current entry, so it's dropped without evicting the live
    /// entry.
    fn evict_if_needed(&self) {
        loop {
            if self.table.read().len() <= self.max_size {
                break;
            }
            let candidate = self.recency.write().pop_front();
            match candidate {
                Some((generation, fingerprint)) => {
                    let mut table = self.table.write();
                    if let Some(entry) = table.get(&fingerprint) {
                        if entry.generation == generation {
                            table.remove(&fingerprint);
                        }
                    }
                }
                None => break,
            }
        }
    }

    async fn gate_for(&self, fingerprint: &Fingerprint) -> Gate {
        let mut gates = self.gates.write();
        gates
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn release_gate(&self, fingerprint: &Fingerprint) {
        self.gates.write().remove(fingerprint);
    }

    /// Fetch-or-serve-from-cache with the at-most-one-in-flight guarantee.
    /// `ttl` applies to `Ok`/`Empty` results, `negative_ttl` to `Error`
    /// results (short, to avoid stampeding a failing upstream).
    pub async fn get_or_fetch<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        ttl: Duration,
        negative_ttl: Duration,
        loader: F,
    ) -> SourceFetch
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SourceFetch>,
    {
        if let Some(fetch) = self.fresh_entry(&fingerprint) {
            self.touch_recency(&fingerprint);
            return fetch;
        }

        let gate = self.gate_for(&fingerprint).await;
        let _guard = gate.lock().await;

        // Re-check: whoever held the gate first may have already
        // populated the entry while we waited.
        if let Some(fetch) = self.fresh_entry(&fingerprint) {
            self.touch_recency(&fingerprint);
            self.release_gate(&fingerprint);
            return fetch;
        }

        let fetch = loader().await;
        let effective_ttl = match fetch.status {
            FetchStatus::Error => negative_ttl,
            _ => ttl,
        };
        self.insert(fingerprint.clone(), fetch.clone(), effective_ttl);
        self.release_gate(&fingerprint);
        fetch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::DailySeries;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ok_fetch(source: &str) -> SourceFetch {
        SourceFetch::ok(
            source,
            "us_il",
            30,
            Fingerprint::compute(source, &[], 30, &[]),
            DailySeries::empty(),
            1,
            5,
        )
    }

    #[tokio::test]
    async fn concurrent_identical_requests_trigger_one_fetch() {
        let cache = Arc::new(FetchCache::new(100));
        let calls = Arc::new(AtomicUsize::new(0));
        let fingerprint = Fingerprint::compute("weather", &[], 30, &[]);

        let mut handles = Vec::new();
        for _ in 0..100 {
            let cache = cache.clone();
            let calls = calls.clone();
            let fingerprint = fingerprint.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(
                        fingerprint,
                        Duration::from_secs(60),
                        Duration::from_secs(5),
                        || {
                            let calls = calls.clone();
                            async move {
                                calls.fetch_add(1, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(10)).await;
                                ok_fetch("weather")
                            }
                        },
                    )
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = results[0].fingerprint.clone();
        assert!(results.iter().all(|r| r.fingerprint == first));
    }

    #[tokio::test]
    async fn expired_entries_are_refreshed() {
        let cache = FetchCache::new(100);
        let fingerprint = Fingerprint::compute("weather", &[], 30, &[]);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            cache
                .get_or_fetch(
                    fingerprint.clone(),
                    Duration::from_millis(1),
                    Duration::from_secs(5),
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        ok_fetch("weather")
                    },
                )
                .await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bounded_size_evicts_oldest() {
        let cache = FetchCache::new(2);
        for i in 0..5 {
            let source = format!("source_{i}");
            let fingerprint = Fingerprint::compute(&source, &[], 30, &[]);
            cache
                .get_or_fetch(fingerprint, Duration::from_secs(60), Duration::from_secs(5), {
                    let source = source.clone();
                    move || async move { ok_fetch(&source) }
                })
                .await;
        }
        assert!(cache.len() <= 2);
    }
}
