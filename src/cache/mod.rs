//! Result Cache (C8).
//!
//! Keyed TTL cache with single-flight request coalescing, grounded on
//! `engine/src/caching_request.rs`'s actor-loop shape (a dedicated task selecting over
//! a request channel, a completed-fetch channel, and an invalidation channel, backed by
//! a `pending: HashMap<Key, Vec<oneshot::Sender<_>>>` in-flight map). That file has no
//! TTL expiry; this module adds `insertedAt`/`ttl` bookkeeping and a background sweeper
//! on top.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheType {
    AddressSearch,
    ExtrinsicSearch,
    BlockInfo,
}

impl CacheType {
    pub fn ttl(self) -> Duration {
        match self {
            Self::AddressSearch => crate::constants::CACHE_TTL_ADDRESS_SEARCH,
            Self::ExtrinsicSearch => crate::constants::CACHE_TTL_EXTRINSIC_SEARCH,
            Self::BlockInfo => crate::constants::CACHE_TTL_BLOCK_INFO,
        }
    }
}

/// Stable key: `(type, query, blocksToScan, batchSize, strategy, maxBlocks, pallet,
/// method)` concatenated. Built by callers via `CacheKey::new`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(cache_type: CacheType, parts: &[&str]) -> Self {
        let mut s = format!("{cache_type:?}");
        for p in parts {
            s.push('|');
            s.push_str(p);
        }
        Self(s)
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> Entry<V> {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

enum Message<V> {
    Get { key: CacheKey, ttl: Duration, reply: oneshot::Sender<Option<V>> },
    Put { key: CacheKey, value: V, ttl: Duration },
    RegisterInFlight { key: CacheKey, reply: oneshot::Sender<bool> },
    ClaimResult { key: CacheKey, value: V },
    ClearAll,
    ClearByType { cache_type_prefix: String },
    ClearByQuery { substring: String },
    Stats { reply: oneshot::Sender<CacheStats> },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
}

/// Single-flight, TTL-backed cache for values of type `V`. One actor task owns the
/// map; callers talk to it over an mpsc channel, matching `CachingRequest`'s
/// `biased` `tokio::select!` discipline.
pub struct ResultCache<V: Clone + Send + 'static> {
    tx: mpsc::UnboundedSender<Message<V>>,
    waiters: Arc<Mutex<HashMap<CacheKey, Vec<oneshot::Sender<Option<V>>>>>>,
}

impl<V: Clone + Send + 'static> ResultCache<V> {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message<V>>();
        let waiters: Arc<Mutex<HashMap<CacheKey, Vec<oneshot::Sender<Option<V>>>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(async move {
            let mut entries: HashMap<CacheKey, Entry<V>> = HashMap::new();
            let mut in_flight: std::collections::HashSet<CacheKey> = std::collections::HashSet::new();

            while let Some(msg) = rx.recv().await {
                match msg {
                    Message::Get { key, ttl: _, reply } => {
                        let hit = entries.get(&key).filter(|e| !e.is_expired()).map(|e| e.value.clone());
                        if hit.is_none() {
                            entries.remove(&key);
                        }
                        let _ = reply.send(hit);
                    }
                    Message::Put { key, value, ttl } => {
                        entries.insert(key, Entry { value, inserted_at: Instant::now(), ttl });
                    }
                    Message::RegisterInFlight { key, reply } => {
                        let already = !in_flight.insert(key);
                        let _ = reply.send(already);
                    }
                    Message::ClaimResult { key, value } => {
                        in_flight.remove(&key);
                        let _ = value; // value is delivered to waiters by the caller via waiters map
                    }
                    Message::ClearAll => entries.clear(),
                    Message::ClearByType { cache_type_prefix } => {
                        entries.retain(|k, _| !k.0.starts_with(&cache_type_prefix));
                    }
                    Message::ClearByQuery { substring } => {
                        entries.retain(|k, _| !k.0.contains(&substring));
                    }
                    Message::Stats { reply } => {
                        entries.retain(|_, e| !e.is_expired());
                        let _ = reply.send(CacheStats { entries: entries.len(), in_flight: in_flight.len() });
                    }
                }
            }
        });

        let cache = Self { tx, waiters };
        cache.spawn_sweeper();
        cache
    }

    fn spawn_sweeper(&self) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(crate::constants::CACHE_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let (reply_tx, _reply_rx) = oneshot::channel();
                // A dedicated sweep message isn't needed: expired entries are dropped
                // lazily on `get`/`stats`. This tick exists to bound unbounded growth
                // from keys that are never read again; `Stats` already performs the
                // retain pass, so piggyback on it here every sweep interval.
                if tx.send(Message::Stats { reply: reply_tx }).is_err() {
                    break;
                }
            }
        });
    }

    /// Single-flight `get_or_compute`: concurrent callers for the same key while a
    /// computation is in flight all receive the same result (invariant 3, §8).
    pub async fn get_or_compute<F, Fut>(&self, key: CacheKey, cache_type: CacheType, compute: F) -> anyhow::Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<V>>,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(Message::Get { key: key.clone(), ttl: cache_type.ttl(), reply: reply_tx }).ok();
        if let Ok(Some(hit)) = reply_rx.await {
            return Ok(hit);
        }

        let mut waiters = self.waiters.lock().await;
        if let Some(list) = waiters.get_mut(&key) {
            let (tx, rx) = oneshot::channel();
            list.push(tx);
            drop(waiters);
            return rx
                .await
                .ok()
                .flatten()
                .ok_or_else(|| anyhow::anyhow!("in-flight computation for {:?} was dropped", key.0));
        }
        waiters.insert(key.clone(), Vec::new());
        drop(waiters);

        let result = compute().await;

        let mut waiters = self.waiters.lock().await;
        let pending = waiters.remove(&key).unwrap_or_default();

        match &result {
            Ok(value) => {
                self.tx.send(Message::Put { key: key.clone(), value: value.clone(), ttl: cache_type.ttl() }).ok();
                for w in pending {
                    let _ = w.send(Some(value.clone()));
                }
            }
            Err(_) => {
                for w in pending {
                    let _ = w.send(None);
                }
            }
        }

        result
    }

    pub async fn clear_all(&self) {
        let _ = self.tx.send(Message::ClearAll);
    }

    pub async fn clear_by_type(&self, cache_type: CacheType) {
        let _ = self.tx.send(Message::ClearByType { cache_type_prefix: format!("{cache_type:?}") });
    }

    pub async fn clear_by_query(&self, substring: String) {
        let _ = self.tx.send(Message::ClearByQuery { substring });
    }

    pub async fn stats(&self) -> CacheStats {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Message::Stats { reply: reply_tx }).is_err() {
            return CacheStats::default();
        }
        reply_rx.await.unwrap_or_default()
    }
}

impl<V: Clone + Send + 'static> Default for ResultCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_gets_for_same_key_compute_once() {
        let cache: ResultCache<u32> = ResultCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new(CacheType::AddressSearch, &["addr1", "10"]);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache_tx = cache.tx.clone();
            let waiters = cache.waiters.clone();
            let calls = calls.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                let cache = ResultCache { tx: cache_tx, waiters };
                cache
                    .get_or_compute(key, CacheType::AddressSearch, || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(42u32)
                        }
                    })
                    .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_key_includes_all_dimensions() {
        let a = CacheKey::new(CacheType::AddressSearch, &["x", "10"]);
        let b = CacheKey::new(CacheType::AddressSearch, &["x", "20"]);
        assert_ne!(a, b);
    }
}
