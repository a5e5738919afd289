//! Keyed cache with idle-time and entry-count bounds
//!
//! Used by worker units to memoize compiled sandboxes by exact source text.
//! Garbage collection runs opportunistically on access once the configured
//! interval has passed; a library type should not need a background task.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Max number of entries to keep
    pub max_entries: usize,
    /// Max time an entry may sit without being retrieved
    pub max_idle_time: Duration,
    /// How often the garbage collector runs
    pub gc_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_idle_time: Duration::from_secs(10 * 60),
            gc_interval: Duration::from_secs(10),
        }
    }
}

struct CacheEntry<T> {
    data: T,
    created_at: Instant,
    used_at: Instant,
}

/// Cache with garbage collector
pub struct Cache<T: Clone> {
    map: HashMap<String, CacheEntry<T>>,
    config: CacheConfig,
    last_gc: Instant,
}

impl<T: Clone> Cache<T> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            map: HashMap::new(),
            config,
            last_gc: Instant::now(),
        }
    }

    /// Retrieve an entry, marking it used
    pub fn get(&mut self, key: &str) -> Option<T> {
        self.maybe_gc();
        let entry = self.map.get_mut(key)?;
        entry.used_at = Instant::now();
        Some(entry.data.clone())
    }

    /// Store an entry
    pub fn set(&mut self, key: impl Into<String>, data: T) {
        self.maybe_gc();
        let now = Instant::now();
        self.map.insert(
            key.into(),
            CacheEntry {
                data,
                created_at: now,
                used_at: now,
            },
        );
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.map.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn maybe_gc(&mut self) {
        if self.last_gc.elapsed() < self.config.gc_interval {
            return;
        }
        self.last_gc = Instant::now();
        self.run_gc();
    }

    fn run_gc(&mut self) {
        let now = Instant::now();
        let max_idle = self.config.max_idle_time;
        self.map.retain(|_, entry| now.duration_since(entry.used_at) < max_idle);

        // oldest entries beyond the count bound go next
        while self.map.len() > self.config.max_entries {
            let oldest = self
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => self.map.remove(&key),
                None => break,
            };
        }
    }
}

impl<T: Clone> Default for Cache<T> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(config: CacheConfig) -> Cache<u32> {
        Cache::new(config)
    }

    #[test]
    fn stores_and_retrieves() {
        let mut c: Cache<u32> = Cache::default();
        assert!(c.get("a").is_none());
        c.set("a", 1);
        assert_eq!(c.get("a"), Some(1));
        assert_eq!(c.len(), 1);
        assert!(c.delete("a"));
        assert!(c.is_empty());
    }

    #[test]
    fn evicts_idle_entries() {
        let mut c = cache(CacheConfig {
            max_idle_time: Duration::from_millis(0),
            ..CacheConfig::default()
        });
        c.set("a", 1);
        c.run_gc();
        assert!(c.get("a").is_none());
    }

    #[test]
    fn enforces_the_entry_count_bound() {
        let mut c = cache(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });
        c.set("a", 1);
        c.set("b", 2);
        c.set("c", 3);
        c.run_gc();
        assert_eq!(c.len(), 2);
        // oldest insertion evicted first
        assert!(c.get("a").is_none());
        assert_eq!(c.get("c"), Some(3));
    }

    #[test]
    fn recently_used_entries_survive() {
        let mut c = cache(CacheConfig {
            max_idle_time: Duration::from_millis(50),
            ..CacheConfig::default()
        });
        c.set("a", 1);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(c.get("a"), Some(1));
        std::thread::sleep(Duration::from_millis(30));
        c.run_gc();
        // used 30ms ago, still under the idle bound
        assert_eq!(c.get("a"), Some(1));
    }
}
