//! A single process-wide keyed registry, replacing the named-process /
//! global-dictionary style of addressing actors by id instead of by direct
//! reference. Any id/value pair, backed by `DashMap` for lock-free
//! concurrent access from multiple actors.

use std::hash::Hash;

use dashmap::DashMap;

pub struct Registry<K, V> {
    entries: DashMap<K, V>,
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Registry {
            entries: DashMap::new(),
        }
    }

    pub fn register(&self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    pub fn unregister(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }
}

impl<K, V> Default for Registry<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
