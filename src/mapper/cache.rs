//! Lookup cache for mapping results
//!
//! Both positive and negative results are cached, keyed by metric name and
//! requested metric type.

use super::MappingMatch;
use crate::schema::MetricType;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;

/// Eviction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheType {
    /// Evict the least recently used entry
    #[default]
    Lru,
    /// Frequency-based admission and eviction (TinyLFU)
    Random,
}

impl std::str::FromStr for CacheType {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown cache type '{}'; expected lru or random", other)),
        }
    }
}

type CacheKey = (String, MetricType);

/// Bounded cache of mapping lookups
pub struct MappingCache {
    cache_type: CacheType,
    // None when caching is disabled
    inner: Option<Cache<CacheKey, Option<MappingMatch>>>,
}

impl MappingCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize, cache_type: CacheType) -> Self {
        let inner = (capacity > 0).then(|| {
            let builder = Cache::builder().max_capacity(capacity as u64);
            match cache_type {
                CacheType::Lru => builder.eviction_policy(EvictionPolicy::lru()).build(),
                CacheType::Random => builder.build(),
            }
        });
        Self { cache_type, inner }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn cache_type(&self) -> CacheType {
        self.cache_type
    }

    /// Returns `Some(result)` on a hit, where `result` may itself be `None`
    /// for a cached miss.
    pub fn get(&self, name: &str, metric_type: MetricType) -> Option<Option<MappingMatch>> {
        self.inner
            .as_ref()?
            .get(&(name.to_string(), metric_type))
    }

    pub fn insert(&self, name: &str, metric_type: MetricType, value: Option<MappingMatch>) {
        if let Some(cache) = &self.inner {
            cache.insert((name.to_string(), metric_type), value);
        }
    }

    /// Drop every entry, e.g. after the rule set was replaced.
    pub fn clear(&self) {
        if let Some(cache) = &self.inner {
            cache.invalidate_all();
        }
    }

    /// Apply pending evictions so that `len` is exact.
    pub fn sync(&self) {
        if let Some(cache) = &self.inner {
            cache.run_pending_tasks();
        }
    }

    /// Approximate entry count; call [`MappingCache::sync`] first for an
    /// exact figure.
    pub fn len(&self) -> usize {
        self.inner
            .as_ref()
            .map_or(0, |cache| cache.entry_count() as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for MappingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingCache")
            .field("cache_type", &self.cache_type)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
