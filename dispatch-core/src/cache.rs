use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A bounded cache combining TTL expiry and LRU eviction, keyed by `(K, version)`
/// where an entry built under an old `version` is treated as a miss and replaced.
///
/// Used for the picker cache, checker cache and address resolver cache
/// (SPEC_FULL.md §4.5): ttl 300s, capacities 256/256/4096 respectively.
/// Hand-rolled rather than pulled from an external LRU crate — none of the
/// dispatch core's dependency stack carries one, the same way the teacher
/// hand-rolls its connection pool instead of reaching for one.
pub struct TtlLru<K, V> {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner<K, V>>,
}

struct Entry<V> {
    value: V,
    version: u64,
    inserted_at: Instant,
}

struct Inner<K, V> {
    map: HashMap<K, Entry<V>>,
    /// Most-recently-used keys at the back.
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlLru<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(Inner { map: HashMap::new(), order: VecDeque::new() }),
        }
    }

    /// Look up `key` at `version`. Returns `None` on a miss: absent, expired,
    /// or built under a stale version. A stale-version hit is left in place
    /// until the next `insert` overwrites it or LRU capacity evicts it —
    /// callers holding `Arc<V>` values see cleanup run through `Drop` at that
    /// point, not at lookup time.
    pub fn get(&self, key: &K, version: u64) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        let hit = match inner.map.get(key) {
            Some(entry) if entry.version == version && entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            _ => None,
        };
        if hit.is_some() {
            Self::touch(&mut inner, key);
        }
        hit
    }

    /// Insert/replace the entry for `key` at `version`, evicting the
    /// least-recently-used entry if the cache is at capacity.
    pub fn insert(&self, key: K, version: u64, value: V) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.insert(
            key.clone(),
            Entry { value, version, inserted_at: Instant::now() },
        );
        Self::touch(&mut inner, &key);

        while inner.map.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
            } else {
                break;
            }
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.map.remove(key).map(|e| e.value);
        inner.order.retain(|k| k != key);
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn touch(inner: &mut Inner<K, V>, key: &K) {
        inner.order.retain(|k| k != key);
        inner.order.push_back(key.clone());
    }

    /// Fetch-or-build: looks up `(key, version)`; on miss, calls `factory`,
    /// inserts the result, and returns it.
    pub fn get_or_insert_with(&self, key: K, version: u64, factory: impl FnOnce() -> V) -> V {
        if let Some(v) = self.get(&key, version) {
            return v;
        }
        let value = factory();
        self.insert(key, version, value.clone());
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_after_insert() {
        let cache: TtlLru<String, i32> = TtlLru::new(4, Duration::from_secs(300));
        cache.insert("a".to_string(), 1, 42);
        assert_eq!(cache.get(&"a".to_string(), 1), Some(42));
    }

    #[test]
    fn miss_on_version_mismatch() {
        let cache: TtlLru<String, i32> = TtlLru::new(4, Duration::from_secs(300));
        cache.insert("a".to_string(), 1, 42);
        assert_eq!(cache.get(&"a".to_string(), 2), None);
    }

    #[test]
    fn miss_when_expired() {
        let cache: TtlLru<String, i32> = TtlLru::new(4, Duration::from_millis(1));
        cache.insert("a".to_string(), 1, 42);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&"a".to_string(), 1), None);
    }

    #[test]
    fn evicts_least_recently_used_beyond_capacity() {
        let cache: TtlLru<String, i32> = TtlLru::new(2, Duration::from_secs(300));
        cache.insert("a".to_string(), 1, 1);
        cache.insert("b".to_string(), 1, 2);
        cache.get(&"a".to_string(), 1); // touch a, making b the LRU
        cache.insert("c".to_string(), 1, 3); // evicts b
        assert_eq!(cache.get(&"a".to_string(), 1), Some(1));
        assert_eq!(cache.get(&"b".to_string(), 1), None);
        assert_eq!(cache.get(&"c".to_string(), 1), Some(3));
    }

    #[test]
    fn get_or_insert_with_only_builds_once_per_version() {
        let cache: TtlLru<String, i32> = TtlLru::new(4, Duration::from_secs(300));
        let mut calls = 0;
        let mut build = || {
            calls += 1;
            99
        };
        assert_eq!(cache.get_or_insert_with("k".to_string(), 1, &mut build), 99);
        assert_eq!(cache.get_or_insert_with("k".to_string(), 1, &mut build), 99);
        assert_eq!(calls, 1);
    }
}
