//! Bounded, expiring key/value cache shared by every statistics store.
//!
//! Entries are evicted oldest-write-first once `capacity` is exceeded, and
//! are treated as absent once older than `ttl_ms` on the injected clock.
//! Lookups and writes are O(1) amortized.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::clock::Clock;

struct Entry<V> {
    value: V,
    written_ms: i64,
    generation: u64,
}

struct Inner<K, V> {
    map: HashMap<K, Entry<V>>,
    // Write order; stale generations are skipped lazily.
    order: VecDeque<(K, u64)>,
    next_generation: u64,
}

pub struct BoundedCache<K, V> {
    name: &'static str,
    capacity: usize,
    ttl_ms: i64,
    clock: Arc<dyn Clock>,
    inner: RwLock<Inner<K, V>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, capacity: usize, ttl_ms: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            ttl_ms,
            clock,
            inner: RwLock::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
                next_generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner<K, V>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner<K, V>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn is_live(&self, entry: &Entry<V>, now: i64) -> bool {
        now - entry.written_ms <= self.ttl_ms
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now_ms();
        let inner = self.read();
        inner
            .map
            .get(key)
            .filter(|e| self.is_live(e, now))
            .map(|e| e.value.clone())
    }

    /// Stores `value`, replacing any prior value for `key`.
    pub fn put(&self, key: K, value: V) {
        let now = self.clock.now_ms();
        let mut inner = self.write();
        self.insert_locked(&mut inner, key, value, now);
    }

    /// Atomic read-modify-write of one entry. `f` receives the current live
    /// value (or `None`) and returns the value to store.
    pub fn update<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce(Option<V>) -> V,
    {
        let now = self.clock.now_ms();
        let mut inner = self.write();
        let current = inner
            .map
            .remove(&key)
            .filter(|e| self.is_live(e, now))
            .map(|e| e.value);
        let value = f(current);
        self.insert_locked(&mut inner, key, value.clone(), now);
        value
    }

    fn insert_locked(&self, inner: &mut Inner<K, V>, key: K, value: V, now: i64) {
        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner.order.push_back((key.clone(), generation));
        inner.map.insert(
            key,
            Entry {
                value,
                written_ms: now,
                generation,
            },
        );
        self.evict_locked(inner, now);
    }

    fn evict_locked(&self, inner: &mut Inner<K, V>, now: i64) {
        while let Some((key, generation)) = inner.order.front().cloned() {
            let current = match inner.map.get(&key) {
                Some(e) if e.generation == generation => e,
                _ => {
                    // superseded or already gone
                    inner.order.pop_front();
                    continue;
                }
            };
            let expired = !self.is_live(current, now);
            if !expired && inner.map.len() <= self.capacity {
                break;
            }
            inner.order.pop_front();
            inner.map.remove(&key);
        }

        // Keep the order queue proportional to the live entries.
        if inner.order.len() > 2 * inner.map.len() + 64 {
            let Inner { map, order, .. } = inner;
            order.retain(|(k, g)| map.get(k).is_some_and(|e| e.generation == *g));
        }
    }

    /// Snapshot of the live keys.
    pub fn keys(&self) -> Vec<K> {
        let now = self.clock.now_ms();
        let inner = self.read();
        inner
            .map
            .iter()
            .filter(|(_, e)| self.is_live(e, now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
