use crate::error::CacheError;
use async_trait::async_trait;
use mockable::{Clock, DefaultClock};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Key/value byte store backing the cache and the activity log
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError>;
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// Process-local `KvStore`
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Stored envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Write time, epoch millis
    pub ts: i64,
    /// Validity window in millis
    #[serde(rename = "ttlMs")]
    pub ttl_ms: i64,
}

impl<T> CacheEntry<T> {
    /// Valid iff `now - ts <= ttl_ms`
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.ts) <= self.ttl_ms
    }
}

/// Result of a cache read
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup<T> {
    pub hit: bool,
    pub data: Option<T>,
}

impl<T> CacheLookup<T> {
    fn miss() -> Self {
        Self {
            hit: false,
            data: None,
        }
    }

    fn hit(data: T) -> Self {
        Self {
            hit: true,
            data: Some(data),
        }
    }
}

/// TTL cache over any `KvStore`.
///
/// Expiry is detected lazily on read: a stale or malformed entry is removed
/// by the read that finds it. Concurrent readers of the same expired entry
/// may both delete it.
pub struct TtlCache<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: KvStore> TtlCache<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(DefaultClock))
    }

    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Store `data` under `key`, replacing any previous entry.
    ///
    /// Backing-store failures are logged; a failed write only costs a
    /// future recomputation.
    pub async fn set<T: Serialize + Sync>(&self, key: &str, data: &T, ttl_ms: i64) {
        let entry = CacheEntry {
            data,
            ts: self.clock.utc().timestamp_millis(),
            ttl_ms,
        };

        let result = match serde_json::to_vec(&entry) {
            Ok(bytes) => self.store.set(key, bytes).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            warn!(key = %key, error = %e, "Failed to write cache entry");
        }
    }

    /// Read `key`, evicting it if it is expired or malformed
    pub async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> CacheLookup<T> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                metrics::counter!("loads.cache.misses").increment(1);
                return CacheLookup::miss();
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read cache entry");
                metrics::counter!("loads.cache.misses").increment(1);
                return CacheLookup::miss();
            }
        };

        let entry = match decode_entry::<T>(&raw) {
            Some(entry) => entry,
            None => {
                debug!(key = %key, "Evicting malformed cache entry");
                self.evict(key).await;
                return CacheLookup::miss();
            }
        };

        if !entry.is_fresh(self.clock.utc().timestamp_millis()) {
            debug!(key = %key, ts = entry.ts, ttl_ms = entry.ttl_ms, "Evicting expired cache entry");
            self.evict(key).await;
            return CacheLookup::miss();
        }

        metrics::counter!("loads.cache.hits").increment(1);
        CacheLookup::hit(entry.data)
    }

    /// Drop `key` unconditionally
    pub async fn clear(&self, key: &str) {
        if let Err(e) = self.store.remove(key).await {
            warn!(key = %key, error = %e, "Failed to clear cache entry");
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn evict(&self, key: &str) {
        metrics::counter!("loads.cache.misses").increment(1);
        metrics::counter!("loads.cache.evictions").increment(1);
        self.clear(key).await;
    }
}

/// Decode an envelope, rejecting missing or non-numeric `ts`/`ttlMs`
fn decode_entry<T: DeserializeOwned>(raw: &[u8]) -> Option<CacheEntry<T>> {
    let value: serde_json::Value = serde_json::from_slice(raw).ok()?;
    let object = value.as_object()?;

    let ts = object.get("ts")?.as_f64()?;
    let ttl_ms = object.get("ttlMs")?.as_f64()?;
    if !ts.is_finite() || !ttl_ms.is_finite() {
        return None;
    }

    let data = serde_json::from_value(object.get("data")?.clone()).ok()?;

    Some(CacheEntry {
        data,
        ts: ts as i64,
        ttl_ms: ttl_ms as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MutableClock;
    use chrono::{Duration, TimeZone, Utc};

    fn cache_with_clock() -> (TtlCache<MemoryKvStore>, Arc<MutableClock>) {
        let clock = Arc::new(MutableClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
        ));
        (TtlCache::with_clock(MemoryKvStore::new(), clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", &"value".to_string(), 1000).await;

        clock.advance(Duration::milliseconds(1000));
        let lookup: CacheLookup<String> = cache.get("k").await;

        assert!(lookup.hit);
        assert_eq!(lookup.data.as_deref(), Some("value"));
    }

    #[tokio::test]
    async fn test_expired_entry_is_evicted() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", &42u32, 1000).await;

        clock.advance(Duration::milliseconds(1001));
        let first: CacheLookup<u32> = cache.get("k").await;
        assert_eq!(first, CacheLookup { hit: false, data: None });
        assert!(cache.store().is_empty());

        // Still a miss with no intervening set
        let second: CacheLookup<u32> = cache.get("k").await;
        assert!(!second.hit);
    }

    #[tokio::test]
    async fn test_missing_key_is_miss() {
        let (cache, _) = cache_with_clock();
        let lookup: CacheLookup<u32> = cache.get("absent").await;
        assert!(!lookup.hit);
        assert!(lookup.data.is_none());
    }

    #[tokio::test]
    async fn test_malformed_entries_are_evicted() {
        let (cache, _) = cache_with_clock();
        let store = cache.store();

        store.set("no-ts", br#"{"data":1,"ttlMs":1000}"#.to_vec()).await.unwrap();
        store.set("string-ttl", br#"{"data":1,"ts":0,"ttlMs":"soon"}"#.to_vec()).await.unwrap();
        store.set("garbage", b"not json".to_vec()).await.unwrap();

        for key in ["no-ts", "string-ttl", "garbage"] {
            let lookup: CacheLookup<u32> = cache.get(key).await;
            assert!(!lookup.hit, "{key} should miss");
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_data_of_wrong_shape_is_evicted() {
        let (cache, _) = cache_with_clock();
        cache.set("k", &"text".to_string(), 60_000).await;

        let lookup: CacheLookup<u32> = cache.get("k").await;
        assert!(!lookup.hit);
        assert!(cache.store().is_empty());
    }

    #[tokio::test]
    async fn test_set_overwrites_and_restarts_ttl() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", &1u32, 1000).await;
        clock.advance(Duration::milliseconds(900));
        cache.set("k", &2u32, 1000).await;
        clock.advance(Duration::milliseconds(900));

        let lookup: CacheLookup<u32> = cache.get("k").await;
        assert_eq!(lookup.data, Some(2));
    }

    #[tokio::test]
    async fn test_clear_removes_entry() {
        let (cache, _) = cache_with_clock();
        cache.set("k", &1u32, 1000).await;
        cache.clear("k").await;

        let lookup: CacheLookup<u32> = cache.get("k").await;
        assert!(!lookup.hit);
    }

    struct UnreachableStore;

    #[async_trait]
    impl KvStore for UnreachableStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: Vec<u8>) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }

        async fn remove(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_backend_failures_degrade_to_miss() {
        let cache = TtlCache::new(UnreachableStore);
        cache.set("k", &1u32, 1000).await;
        cache.clear("k").await;

        let lookup: CacheLookup<u32> = cache.get("k").await;
        assert!(!lookup.hit);
    }

    #[tokio::test]
    async fn test_envelope_format() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", &vec![1, 2], 500).await;

        let raw = cache.store().get("k").await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["data"], serde_json::json!([1, 2]));
        assert_eq!(json["ts"], clock.now_ms());
        assert_eq!(json["ttlMs"], 500);
    }
}
