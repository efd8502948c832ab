use lru::LruCache;
use serde::Serialize;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_ENTRIES: usize = 300;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_valid(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub expired: u64,
    pub evicted: u64,
}

/// In-memory TTL cache of query results, bounded by entry count.
///
/// The `LruCache` runs unbounded and eviction is done by hand after each
/// insert: expired entries go first, then least-recently-touched ones until
/// the cache is back under `max_entries`.
pub struct ResponseCache<V> {
    entries: LruCache<String, CacheEntry<V>>,
    max_entries: usize,
    stats: CacheStats,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            max_entries: max_entries.max(1),
            stats: CacheStats::default(),
        }
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn put(&mut self, key: impl Into<String>, value: V, ttl: Duration) {
        self.put_at(key, value, ttl, Instant::now())
    }

    /// Lookup against an explicit clock reading. A hit refreshes recency.
    pub fn get_at(&mut self, key: &str, now: Instant) -> Option<V> {
        let valid = match self.entries.get(key) {
            Some(entry) => entry.is_valid(now),
            None => {
                self.stats.misses += 1;
                return None;
            }
        };

        if !valid {
            self.entries.pop(key);
            self.stats.expired += 1;
            self.stats.misses += 1;
            return None;
        }

        self.stats.hits += 1;
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn put_at(&mut self, key: impl Into<String>, value: V, ttl: Duration, now: Instant) {
        let entry = CacheEntry {
            value,
            expires_at: now + ttl,
        };
        self.entries.put(key.into(), entry);
        self.evict(now);
    }

    /// Drop expired entries, then trim least-recently-used ones over the limit.
    fn evict(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_valid(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            self.entries.pop(&key);
            self.stats.expired += 1;
        }

        while self.entries.len() > self.max_entries {
            if self.entries.pop_lru().is_none() {
                break;
            }
            self.stats.evicted += 1;
        }
    }

    /// Whether `key` holds a live entry, without touching recency or stats
    pub fn contains_at(&self, key: &str, now: Instant) -> bool {
        self.entries.peek(key).is_some_and(|entry| entry.is_valid(now))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOREVER: Duration = Duration::from_secs(60 * 60 * 24 * 365);

    #[test]
    fn test_ttl_boundary() {
        let mut cache = ResponseCache::new(10);
        let start = Instant::now();
        let ttl = Duration::from_millis(1000);

        cache.put_at("k", 7, ttl, start);

        assert_eq!(cache.get_at("k", start + ttl - Duration::from_millis(1)), Some(7));
        assert_eq!(cache.get_at("k", start + ttl + Duration::from_millis(1)), None);
        assert!(cache.is_empty(), "expired entry should be purged on access");
    }

    #[test]
    fn test_expires_exactly_at_deadline() {
        let mut cache = ResponseCache::new(10);
        let start = Instant::now();
        cache.put_at("k", 1, Duration::from_secs(5), start);
        assert_eq!(cache.get_at("k", start + Duration::from_secs(5)), None);
    }

    #[test]
    fn test_bounded_size_evicts_oldest_inserts() {
        let max = 5;
        let extra = 3;
        let mut cache = ResponseCache::new(max);
        let now = Instant::now();

        for i in 0..(max + extra) {
            cache.put_at(format!("k{}", i), i, FOREVER, now);
        }

        assert_eq!(cache.len(), max);
        for i in 0..extra {
            assert!(!cache.contains_at(&format!("k{}", i), now));
        }
        for i in extra..(max + extra) {
            assert!(cache.contains_at(&format!("k{}", i), now));
        }
        assert_eq!(cache.stats().evicted, extra as u64);
    }

    #[test]
    fn test_hit_refreshes_recency() {
        let mut cache = ResponseCache::new(3);
        let now = Instant::now();

        cache.put_at("a", 1, FOREVER, now);
        cache.put_at("b", 2, FOREVER, now);
        cache.put_at("c", 3, FOREVER, now);
        assert_eq!(cache.get_at("a", now), Some(1));
        cache.put_at("d", 4, FOREVER, now);

        assert!(cache.contains_at("a", now));
        assert!(!cache.contains_at("b", now));
    }

    #[test]
    fn test_expired_entries_evicted_before_live_ones() {
        let mut cache = ResponseCache::new(3);
        let start = Instant::now();

        cache.put_at("old", 0, FOREVER, start);
        cache.put_at("short", 1, Duration::from_secs(1), start);
        cache.put_at("mid", 2, FOREVER, start);

        let later = start + Duration::from_secs(2);
        cache.put_at("new", 3, FOREVER, later);

        assert_eq!(cache.len(), 3);
        assert!(cache.contains_at("old", later));
        assert!(!cache.contains_at("short", later));
        assert_eq!(cache.stats().expired, 1);
        assert_eq!(cache.stats().evicted, 0);
    }

    #[test]
    fn test_overwrite_resets_expiry() {
        let mut cache = ResponseCache::new(3);
        let start = Instant::now();

        cache.put_at("k", 1, Duration::from_secs(1), start);
        cache.put_at("k", 2, Duration::from_secs(10), start + Duration::from_millis(500));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at("k", start + Duration::from_secs(5)), Some(2));
    }

    #[test]
    fn test_stats_count_hits_and_misses() {
        let mut cache = ResponseCache::new(3);
        let now = Instant::now();

        cache.get_at("missing", now);
        cache.put_at("k", "v".to_string(), FOREVER, now);
        cache.get_at("k", now);
        cache.get_at("k", now);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_clear() {
        let mut cache = ResponseCache::new(3);
        cache.put("k", 1, FOREVER);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get("k"), None);
    }
}
