// Named TTL caches with hit/miss accounting, substring invalidation and domain cascades.

pub mod middleware;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::config::{CacheConfig, DEFAULT_CACHE, default_caches};
use crate::models::{CacheManagerStats, CacheStats};

pub const PRODUCTS_CACHE: &str = "products";
pub const SETTINGS_CACHE: &str = "settings";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("value for '{key}' is not representable as JSON: {source}")]
    Serialization {
        key: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    sets: u64,
    deletes: u64,
}

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

struct NamedCache {
    entries: HashMap<String, CacheEntry>,
    default_ttl: Duration,
    sweep_interval: Duration,
    next_sweep: Instant,
    counters: Counters,
}

impl NamedCache {
    fn new(config: &CacheConfig) -> Self {
        let sweep_interval = Duration::from_secs(config.sweep_interval_secs);
        Self {
            entries: HashMap::new(),
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            sweep_interval,
            next_sweep: Instant::now() + sweep_interval,
            counters: Counters::default(),
        }
    }

    fn live_keys(&self, now: Instant) -> usize {
        self.entries.values().filter(|e| !e.is_expired(now)).count()
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before - self.entries.len()
    }
}

struct Inner {
    caches: BTreeMap<String, NamedCache>,
    global: Counters,
}

impl Inner {
    /// Unknown names resolve to the default instance.
    fn resolve(&self, name: &str) -> String {
        if self.caches.contains_key(name) {
            name.to_string()
        } else {
            DEFAULT_CACHE.to_string()
        }
    }

    fn cache_mut(&mut self, name: &str) -> (&mut NamedCache, &mut Counters) {
        let resolved = self.resolve(name);
        let Inner { caches, global } = self;
        let cache = caches
            .entry(resolved)
            .or_insert_with(|| NamedCache::new(&default_cache_config()));
        (cache, global)
    }

    fn remove_matching(&mut self, name: &str, pred: impl Fn(&str) -> bool) -> usize {
        let (cache, global) = self.cache_mut(name);
        let before = cache.entries.len();
        cache.entries.retain(|k, _| !pred(k));
        let removed = before - cache.entries.len();
        cache.counters.deletes += removed as u64;
        global.deletes += removed as u64;
        removed
    }
}

fn default_cache_config() -> CacheConfig {
    CacheConfig {
        default_ttl_secs: 300,
        sweep_interval_secs: 60,
    }
}

pub struct CacheManager {
    inner: Mutex<Inner>,
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheManager {
    /// Manager with the built-in `default`, `products` and `settings` instances.
    pub fn new() -> Self {
        let caches = default_caches()
            .iter()
            .map(|(name, config)| (name.clone(), NamedCache::new(config)))
            .collect();
        Self {
            inner: Mutex::new(Inner {
                caches,
                global: Counters::default(),
            }),
        }
    }

    /// Built-in instances overridden and extended by `configs`.
    pub fn from_config(configs: &BTreeMap<String, CacheConfig>) -> Self {
        let manager = Self::new();
        for (name, config) in configs {
            manager.register_cache(name, config);
        }
        manager
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a named instance, or replaces an existing one's settings and drops its entries.
    pub fn register_cache(&self, name: &str, config: &CacheConfig) {
        self.lock()
            .caches
            .insert(name.to_string(), NamedCache::new(config));
        tracing::debug!(
            cache = %name,
            default_ttl_secs = config.default_ttl_secs,
            sweep_interval_secs = config.sweep_interval_secs,
            "cache registered"
        );
    }

    pub fn cache_names(&self) -> Vec<String> {
        self.lock().caches.keys().cloned().collect()
    }

    /// Stored value, or None on a miss. Expired entries count as misses even before a sweep.
    pub fn get(&self, key: &str, cache_name: &str) -> Option<Value> {
        let now = Instant::now();
        let mut inner = self.lock();
        let (cache, global) = inner.cache_mut(cache_name);
        let expired = cache.entries.get(key).map(|e| e.is_expired(now));
        let live = match expired {
            Some(false) => cache.entries.get(key).map(|e| e.value.clone()),
            Some(true) => {
                cache.entries.remove(key);
                None
            }
            None => None,
        };
        if live.is_some() {
            cache.counters.hits += 1;
            global.hits += 1;
            tracing::trace!(cache = %cache_name, key, "cache hit");
        } else {
            cache.counters.misses += 1;
            global.misses += 1;
            tracing::trace!(cache = %cache_name, key, "cache miss");
        }
        live
    }

    /// Typed read; a stored value of another shape is reported as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str, cache_name: &str) -> Option<T> {
        let value = self.get(key, cache_name)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(cache = %cache_name, key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    /// Stores `value` with the instance's default TTL unless `ttl` overrides it.
    /// Values that cannot be represented as JSON are rejected and leave the store untouched.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        cache_name: &str,
    ) -> Result<(), CacheError> {
        let value = serde_json::to_value(value).map_err(|source| {
            tracing::warn!(cache = %cache_name, key, error = %source, "cache set rejected");
            CacheError::Serialization {
                key: key.to_string(),
                source,
            }
        })?;
        let now = Instant::now();
        let mut inner = self.lock();
        let (cache, global) = inner.cache_mut(cache_name);
        let expires_at = now + ttl.unwrap_or(cache.default_ttl);
        cache
            .entries
            .insert(key.to_string(), CacheEntry { value, expires_at });
        cache.counters.sets += 1;
        global.sets += 1;
        tracing::debug!(cache = %cache_name, key, "cache set");
        Ok(())
    }

    /// Removes `key` if present. Returns whether anything was removed.
    pub fn del(&self, key: &str, cache_name: &str) -> bool {
        let mut inner = self.lock();
        let (cache, global) = inner.cache_mut(cache_name);
        let removed = cache.entries.remove(key).is_some();
        if removed {
            cache.counters.deletes += 1;
            global.deletes += 1;
            tracing::debug!(cache = %cache_name, key, "cache delete");
        }
        removed
    }

    /// Deletes every key in the default instance containing `pattern`. Returns the count removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let removed = self
            .lock()
            .remove_matching(DEFAULT_CACHE, |k| k.contains(pattern));
        tracing::debug!(pattern, removed, "cache pattern invalidated");
        removed
    }

    /// Flushes the products instance plus product- and category-derived default keys.
    pub fn invalidate_products(&self) -> usize {
        let removed = self.flush(PRODUCTS_CACHE)
            + self.invalidate_pattern("products")
            + self.invalidate_pattern("categories");
        tracing::info!(removed, "product caches invalidated");
        removed
    }

    /// Flushes the settings instance plus settings-derived default keys.
    pub fn invalidate_settings(&self) -> usize {
        let removed = self.flush(SETTINGS_CACHE) + self.invalidate_pattern("settings");
        tracing::info!(removed, "settings caches invalidated");
        removed
    }

    /// Empties one instance. Unknown names are a no-op rather than falling back to default.
    pub fn flush(&self, cache_name: &str) -> usize {
        let mut inner = self.lock();
        if !inner.caches.contains_key(cache_name) {
            return 0;
        }
        inner.remove_matching(cache_name, |_| true)
    }

    pub fn flush_all(&self) -> usize {
        let names = self.cache_names();
        let removed = names.iter().map(|n| self.flush(n)).sum();
        tracing::info!(removed, "all caches flushed");
        removed
    }

    /// Live keys of one instance, sorted.
    pub fn keys(&self, cache_name: &str) -> Vec<String> {
        let now = Instant::now();
        let mut inner = self.lock();
        let (cache, _) = inner.cache_mut(cache_name);
        let mut keys: Vec<String> = cache
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Physically removes expired entries from one instance. Not counted as deletes.
    pub fn sweep(&self, cache_name: &str) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let Some(cache) = inner.caches.get_mut(cache_name) else {
            return 0;
        };
        cache.purge_expired(now)
    }

    /// Sweeps every instance whose sweep interval has elapsed, including ones registered
    /// after startup, and schedules its next sweep. Returns `(name, removed)` per swept instance.
    pub fn sweep_due(&self) -> Vec<(String, usize)> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner
            .caches
            .iter_mut()
            .filter(|(_, c)| now >= c.next_sweep)
            .map(|(name, c)| {
                c.next_sweep = now + c.sweep_interval.max(Duration::from_secs(1));
                (name.clone(), c.purge_expired(now))
            })
            .collect()
    }

    pub fn stats(&self) -> CacheManagerStats {
        let now = Instant::now();
        let inner = self.lock();
        let caches: BTreeMap<String, CacheStats> = inner
            .caches
            .iter()
            .map(|(name, c)| {
                (
                    name.clone(),
                    CacheStats {
                        hits: c.counters.hits,
                        misses: c.counters.misses,
                        sets: c.counters.sets,
                        deletes: c.counters.deletes,
                        key_count: c.live_keys(now),
                    },
                )
            })
            .collect();
        let g = inner.global;
        let accesses = g.hits + g.misses;
        let hit_rate_percent = if accesses == 0 {
            0.0
        } else {
            g.hits as f64 / accesses as f64 * 100.0
        };
        CacheManagerStats {
            hits: g.hits,
            misses: g.misses,
            sets: g.sets,
            deletes: g.deletes,
            key_count: caches.values().map(|c| c.key_count).sum(),
            hit_rate_percent,
            caches,
        }
    }
}
