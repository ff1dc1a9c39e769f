//! Bounded TTL caches shared between pipeline runs.
//!
//! `TtlCache` is the single building block: a mutex-guarded map with a fixed
//! time-to-live and a capacity, evicting the oldest entry first. The election
//! cache, the forwarding-table poll cache and the snapshot cache are all
//! instances of it, injected at construction time.

use crate::device::Device;
use crate::topology::Topology;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Length of the hex digest used for cache keys and snapshot hashes.
pub const HASH_LEN: usize = 16;

/// SHA-256 over newline-joined canonical parts, hex encoded and truncated.
pub fn hash_parts<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
        hasher.update(b"\n");
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(HASH_LEN);
    digest
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub ttl_ms: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

#[derive(Debug)]
struct State<K, V> {
    entries: HashMap<K, Entry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K: Eq + Hash + Clone, V> State<K, V> {
    fn purge_expired(&mut self, ttl: Duration) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        self.evictions += (before - self.entries.len()) as u64;
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.inserted_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.evictions += 1;
        }
    }

    fn put(&mut self, key: K, value: V, ttl: Duration, capacity: usize) {
        if !self.entries.contains_key(&key) && self.entries.len() >= capacity {
            self.purge_expired(ttl);
            while self.entries.len() >= capacity && !self.entries.is_empty() {
                self.evict_oldest();
            }
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }
}

/// Mutex-guarded map with TTL expiry and oldest-first eviction.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    state: Mutex<State<K, V>>,
    ttl: Duration,
    capacity: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            ttl,
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<K, V>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_if(key, |_| true)
    }

    /// Return the live entry for `key` only if `valid` accepts it. A rejected
    /// or expired entry is dropped and counted as a miss.
    pub fn get_if(&self, key: &K, valid: impl FnOnce(&V) -> bool) -> Option<V> {
        let mut state = self.lock();
        let ttl = self.ttl;

        let fresh = match state.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < ttl => Some(valid(&entry.value)),
            Some(_) => Some(false),
            None => None,
        };

        match fresh {
            Some(true) => {
                state.hits += 1;
                state.entries.get(key).map(|entry| entry.value.clone())
            }
            Some(false) => {
                state.entries.remove(key);
                state.evictions += 1;
                state.misses += 1;
                None
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Live entry for `key`, leaving the stats and the map untouched.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.lock()
            .entries
            .get(key)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let mut state = self.lock();
        state.put(key, value, self.ttl, self.capacity);
    }

    /// Check-then-compute under one lock acquisition, so concurrent callers for
    /// the same key never compute twice. Returns the value and whether it was a hit.
    pub fn get_or_insert_with(&self, key: K, compute: impl FnOnce() -> V) -> (V, bool) {
        let mut state = self.lock();
        let live = state
            .entries
            .get(&key)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone());

        if let Some(value) = live {
            state.hits += 1;
            return (value, true);
        }

        state.misses += 1;
        let value = compute();
        state.put(key, value.clone(), self.ttl, self.capacity);
        (value, false)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().entries.remove(key).map(|entry| entry.value)
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.hits = 0;
        state.misses = 0;
        state.evictions = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            capacity: self.capacity,
            ttl_ms: self.ttl.as_millis() as u64,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

/// A published topology remembered against the device snapshot that produced it.
#[derive(Debug, Clone)]
pub struct CachedTopology {
    pub key: String,
    pub topology: Arc<Topology>,
    /// Newest `lastSeen` in the snapshot at generation time.
    pub device_updated_at: DateTime<Utc>,
    pub generation_ms: u64,
    pub cached_at: DateTime<Utc>,
}

/// Canonical key over the sorted `(id, ip, lastSeenEpoch)` device set.
pub fn snapshot_key(devices: &[Device]) -> String {
    let mut parts: Vec<String> = devices
        .iter()
        .map(|d| format!("{}|{}|{}", d.id, d.ip, d.stats.last_seen.timestamp()))
        .collect();
    parts.sort();
    hash_parts(parts)
}

/// Cache key for a snapshot generated under a given set of result-shaping
/// options (gateway, router preference, fallback layer).
pub fn snapshot_entry_key(devices: &[Device], variant: &str) -> String {
    hash_parts([snapshot_key(devices).as_str(), variant])
}

pub fn newest_last_seen(devices: &[Device]) -> DateTime<Utc> {
    devices
        .iter()
        .map(|d| d.stats.last_seen)
        .max()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Whole-pipeline short circuit for unchanged device snapshots.
#[derive(Debug)]
pub struct SnapshotCache {
    cache: TtlCache<String, Arc<CachedTopology>>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            cache: TtlCache::new(ttl, capacity),
        }
    }

    pub fn lookup(&self, devices: &[Device], variant: &str) -> Option<Arc<CachedTopology>> {
        let key = snapshot_entry_key(devices, variant);
        let newest = newest_last_seen(devices);
        let hit = self
            .cache
            .get_if(&key, |cached| cached.device_updated_at >= newest);
        match &hit {
            Some(cached) => tracing::debug!(
                "Snapshot cache hit {} (topology {})",
                key,
                cached.topology.id
            ),
            None => tracing::debug!("Snapshot cache miss {}", key),
        }
        hit
    }

    pub fn store(
        &self,
        devices: &[Device],
        variant: &str,
        topology: Arc<Topology>,
        generation_ms: u64,
    ) -> Arc<CachedTopology> {
        let key = snapshot_entry_key(devices, variant);
        let entry = Arc::new(CachedTopology {
            key: key.clone(),
            topology,
            device_updated_at: newest_last_seen(devices),
            generation_ms,
            cached_at: Utc::now(),
        });
        self.cache.insert(key, entry.clone());
        entry
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hash_parts_is_stable_and_short() {
        let a = hash_parts(["x", "y"]);
        assert_eq!(a, hash_parts(vec!["x".to_string(), "y".to_string()]));
        assert_eq!(a.len(), HASH_LEN);
        assert_ne!(a, hash_parts(["y", "x"]));
    }

    #[test]
    fn test_ttl_expiry() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_millis(20), 4);
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&"a"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert(1, 10);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(2, 20);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(3, 30);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(20));
        assert_eq!(cache.get(&3), Some(30));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_or_insert_computes_once() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(60), 4);
        let mut calls = 0;

        let (first, hit) = cache.get_or_insert_with("k", || {
            calls += 1;
            7
        });
        assert_eq!((first, hit), (7, false));

        let (second, hit) = cache.get_or_insert_with("k", || {
            calls += 1;
            8
        });
        assert_eq!((second, hit), (7, true));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_get_or_insert_is_atomic_across_threads() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let cache: Arc<TtlCache<u32, u32>> = Arc::new(TtlCache::new(Duration::from_secs(60), 4));
        let computed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let computed = computed.clone();
                std::thread::spawn(move || {
                    cache.get_or_insert_with(1, || {
                        computed.fetch_add(1, Ordering::SeqCst);
                        42
                    })
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().0, 42);
        }
        assert_eq!(computed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snapshot_key_ignores_order_but_not_last_seen() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let a = Device::new("a", "10.0.0.1").with_last_seen(t);
        let b = Device::new("b", "10.0.0.2").with_last_seen(t);

        assert_eq!(
            snapshot_key(&[a.clone(), b.clone()]),
            snapshot_key(&[b.clone(), a.clone()])
        );

        let moved = a.clone().with_last_seen(t + chrono::Duration::seconds(30));
        assert_ne!(snapshot_key(&[a, b.clone()]), snapshot_key(&[moved, b]));
    }

    #[test]
    fn test_snapshot_cache_clear_resets_stats() {
        let cache = SnapshotCache::new(Duration::from_secs(60), 4);
        assert!(cache.lookup(&[Device::new("a", "10.0.0.1")], "").is_none());
        assert_eq!(cache.stats().misses, 1);
        cache.clear();
        assert_eq!(cache.stats(), CacheStats {
            entries: 0,
            capacity: 4,
            ttl_ms: 60_000,
            hits: 0,
            misses: 0,
            evictions: 0,
        });
    }

    #[test]
    fn test_snapshot_entries_are_per_variant() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let devices = vec![Device::new("a", "10.0.0.1").with_last_seen(t)];
        let topology = Arc::new(Topology {
            id: "t1".to_string(),
            version: 1,
            nodes: Vec::new(),
            links: Vec::new(),
            stats: Default::default(),
            central_node_id: None,
            created_at: t,
            source: "test".to_string(),
        });

        let cache = SnapshotCache::new(Duration::from_secs(60), 4);
        cache.store(&devices, "gateway=-", topology, 5);

        assert!(cache.lookup(&devices, "gateway=-").is_some());
        assert!(cache.lookup(&devices, "gateway=10.0.0.254").is_none());
    }
}
