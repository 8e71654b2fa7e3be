//! Content-addressed artifact cache with dependency-driven invalidation.
//!
//! Each stored value remembers the config hashes it depends on, and a
//! reverse index maps every hash to the keys that depend on it, so
//! [`XdsCache::clear`] touches only affected entries.
//!
//! Writes carry the start time of the push request that generated them as a
//! token. A write whose token predates the latest clear was computed from
//! inputs that have since changed and is discarded.
//!
//! # Concurrency model
//!
//! All state sits behind one `Mutex` that is held only for map updates.
//! Keys and dependency sets are computed before the lock is taken, and the
//! artifact itself is generated by the caller before [`XdsCache::add`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use meshroute_core::{ConfigHash, ConfigKey, PushRequest};
use tracing::{debug, info};

/// Something whose generated artifact can be cached.
pub trait CacheEntry {
    /// Structural key: equal inputs produce equal keys.
    fn key(&self) -> String;

    /// Hashes of the configs whose change must invalidate the entry.
    fn dependent_configs(&self) -> Vec<ConfigHash>;
}

/// Accumulated cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CacheValue<V> {
    value: V,
    token: u64,
    dependent_configs: Vec<ConfigHash>,
    last_used: u64,
}

struct CacheState<V> {
    store: HashMap<String, CacheValue<V>>,
    /// Config hash → keys of entries depending on it.
    config_index: HashMap<ConfigHash, HashSet<String>>,
    /// Token of the most recent clear.
    cleared_at: u64,
    /// Logical clock for LRU ordering.
    tick: u64,
    stats: CacheStats,
}

impl<V> CacheState<V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn index(&mut self, key: &str, configs: &[ConfigHash]) {
        for hash in configs {
            self.config_index
                .entry(*hash)
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Remove an entry and every index reference to it.
    fn remove(&mut self, key: &str) -> Option<CacheValue<V>> {
        let value = self.store.remove(key)?;
        for hash in &value.dependent_configs {
            if let Some(keys) = self.config_index.get_mut(hash) {
                keys.remove(key);
                if keys.is_empty() {
                    self.config_index.remove(hash);
                }
            }
        }
        Some(value)
    }

    fn evict_lru(&mut self) {
        let lru_key = self
            .store
            .iter()
            .min_by_key(|(_, v)| v.last_used)
            .map(|(k, _)| k.clone());

        if let Some(key) = lru_key {
            self.remove(&key);
            self.stats.evictions += 1;
            debug!(
                evicted_key = %key,
                cache_evictions = self.stats.evictions,
                "xds cache LRU eviction"
            );
        }
    }
}

/// Bounded, dependency-indexed cache of generated artifacts.
pub struct XdsCache<V> {
    state: Mutex<CacheState<V>>,
    max_entries: usize,
}

impl<V: Clone> XdsCache<V> {
    /// Create a cache holding at most `max_entries` artifacts.
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                store: HashMap::new(),
                config_index: HashMap::new(),
                cleared_at: 0,
                tick: 0,
                stats: CacheStats::default(),
            }),
            max_entries: max_entries.max(1),
        }
    }

    /// Store the artifact generated for `entry` while serving `request`.
    ///
    /// Ignored when the request started before the latest clear, or when a
    /// value from the same or a newer request is already stored.
    pub fn add<K: CacheEntry>(&self, entry: &K, request: &PushRequest, value: V) {
        let key = entry.key();
        let dependent_configs = entry.dependent_configs();
        let token = request.token();

        let mut state = self.state.lock().expect("xds cache lock");
        if token < state.cleared_at {
            debug!(%key, token, cleared_at = state.cleared_at, "dropping stale cache write");
            return;
        }

        match state.store.get(&key) {
            Some(current) if token <= current.token => return,
            Some(_) => {
                state.remove(&key);
            }
            None => {
                if state.store.len() >= self.max_entries {
                    state.evict_lru();
                }
            }
        }

        let last_used = state.next_tick();
        state.index(&key, &dependent_configs);
        state.store.insert(
            key,
            CacheValue {
                value,
                token,
                dependent_configs,
                last_used,
            },
        );
    }

    /// Fetch the artifact stored for `entry`, if any.
    pub fn get<K: CacheEntry>(&self, entry: &K) -> Option<V> {
        let key = entry.key();
        let mut state = self.state.lock().expect("xds cache lock");
        let tick = state.next_tick();

        let value = match state.store.get_mut(&key) {
            Some(cached) => {
                cached.last_used = tick;
                Some(cached.value.clone())
            }
            None => None,
        };

        if value.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        debug!(
            %key,
            hit = value.is_some(),
            cache_hits = state.stats.hits,
            cache_misses = state.stats.misses,
            "xds cache lookup"
        );
        value
    }

    /// Drop every entry that depends on any of `configs`.
    pub fn clear(&self, configs: &BTreeSet<ConfigKey>) {
        let mut state = self.state.lock().expect("xds cache lock");
        state.cleared_at = now_token();

        let mut removed = 0usize;
        for config in configs {
            let Some(keys) = state.config_index.remove(&config.hash_code()) else {
                continue;
            };
            for key in keys {
                if state.remove(&key).is_some() {
                    removed += 1;
                }
            }
        }
        debug!(configs = configs.len(), removed, "xds cache cleared");
    }

    /// Drop every entry.
    pub fn clear_all(&self) {
        let mut state = self.state.lock().expect("xds cache lock");
        state.cleared_at = now_token();
        let removed = state.store.len();
        state.store.clear();
        state.config_index.clear();
        info!(removed, "xds cache cleared entirely");
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("xds cache lock").store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of all stored entries, sorted.
    pub fn keys(&self) -> Vec<String> {
        let state = self.state.lock().expect("xds cache lock");
        let mut keys: Vec<String> = state.store.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().expect("xds cache lock").stats
    }
}

fn now_token() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use meshroute_core::{Kind, TriggerReason};

    struct Entry {
        key: &'static str,
        deps: Vec<ConfigKey>,
    }

    impl CacheEntry for Entry {
        fn key(&self) -> String {
            self.key.to_string()
        }

        fn dependent_configs(&self) -> Vec<ConfigHash> {
            self.deps.iter().map(ConfigKey::hash_code).collect()
        }
    }

    fn vs(name: &str) -> ConfigKey {
        ConfigKey::new(Kind::VirtualService, name, "default")
    }

    fn entry(key: &'static str, deps: &[&str]) -> Entry {
        Entry {
            key,
            deps: deps.iter().map(|d| vs(d)).collect(),
        }
    }

    fn request() -> PushRequest {
        PushRequest::full(BTreeSet::new(), TriggerReason::ConfigUpdate)
    }

    fn request_at(token: u64) -> PushRequest {
        let mut req = request();
        req.start = UNIX_EPOCH + Duration::from_nanos(token);
        req
    }

    #[test]
    fn clear_removes_only_dependents() {
        let cache = XdsCache::new(16);
        let a = entry("a", &["root-a", "shared"]);
        let b = entry("b", &["root-b"]);
        cache.add(&a, &request(), "artifact-a".to_string());
        cache.add(&b, &request(), "artifact-b".to_string());

        cache.clear(&BTreeSet::from([vs("shared")]));

        assert_eq!(cache.get(&a), None);
        assert_eq!(cache.get(&b).as_deref(), Some("artifact-b"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clear_cleans_other_index_references() {
        let cache = XdsCache::new(16);
        let a = entry("a", &["x", "y"]);
        cache.add(&a, &request(), 1u32);
        cache.clear(&BTreeSet::from([vs("x")]));

        let state = cache.state.lock().unwrap();
        assert!(state.config_index.is_empty());
    }

    #[test]
    fn stale_writes_are_dropped() {
        let cache = XdsCache::new(16);
        let a = entry("a", &["x"]);
        let before_clear = request_at(1);
        cache.clear(&BTreeSet::from([vs("unrelated")]));

        cache.add(&a, &before_clear, 1u32);
        assert_eq!(cache.get(&a), None);

        cache.add(&a, &request(), 2u32);
        assert_eq!(cache.get(&a), Some(2));
    }

    #[test]
    fn older_token_does_not_overwrite() {
        let cache = XdsCache::new(16);
        let a = entry("a", &["x"]);
        cache.add(&a, &request_at(20), 20u32);
        cache.add(&a, &request_at(10), 10u32);
        assert_eq!(cache.get(&a), Some(20));
        cache.add(&a, &request_at(30), 30u32);
        assert_eq!(cache.get(&a), Some(30));
    }

    #[test]
    fn lru_eviction_respects_capacity() {
        let cache = XdsCache::new(2);
        let a = entry("a", &["a"]);
        let b = entry("b", &["b"]);
        let c = entry("c", &["c"]);
        cache.add(&a, &request(), 1u32);
        cache.add(&b, &request(), 2u32);
        // Touch `a` so `b` is least recently used.
        assert_eq!(cache.get(&a), Some(1));
        cache.add(&c, &request(), 3u32);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&b), None);
        assert_eq!(cache.get(&a), Some(1));
        assert_eq!(cache.get(&c), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn clear_all_empties_cache() {
        let cache = XdsCache::new(16);
        cache.add(&entry("a", &["a"]), &request(), 1u32);
        cache.add(&entry("b", &["b"]), &request(), 2u32);
        cache.clear_all();
        assert!(cache.is_empty());
        assert!(cache.keys().is_empty());
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let cache = XdsCache::new(16);
        let a = entry("a", &["a"]);
        assert_eq!(cache.get(&a), None);
        cache.add(&a, &request(), 1u32);
        assert_eq!(cache.get(&a), Some(1));
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                evictions: 0
            }
        );
    }

    #[test]
    fn concurrent_access_is_safe() {
        let cache = Arc::new(XdsCache::new(1024));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let key: &'static str = Box::leak(format!("entry-{i}").into_boxed_str());
                    let e = Entry {
                        key,
                        deps: vec![vs(key)],
                    };
                    for n in 0..100u32 {
                        cache.add(&e, &request(), n);
                        let _ = cache.get(&e);
                    }
                    if i % 2 == 0 {
                        cache.clear(&BTreeSet::from([vs(key)]));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 8);
    }
}
