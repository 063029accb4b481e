//! Expiring key/value map shared by the in-memory caches
//!
//! Entries carry their own deadline, so one map can hold values with
//! different lifetimes (positive and negative extraction results).
//! Expiry is checked on read; [`TtlMap::sweep`] drops stale entries in bulk.
//! Deadlines use `tokio::time::Instant` so paused-clock tests can advance time.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Map whose entries disappear after a per-entry deadline
#[derive(Debug)]
pub struct TtlMap<K, V> {
    entries: HashMap<K, Entry<V>>,
    default_ttl: Duration,
}

impl<K: Eq + Hash, V> TtlMap<K, V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl,
        }
    }

    /// Live value for `key`
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| &e.value)
    }

    /// Seconds until `key` expires, if it is live
    pub fn remaining<Q>(&self, key: &Q) -> Option<Duration>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.expires_at - now)
    }

    pub fn insert(&mut self, key: K, value: V) {
        let ttl = self.default_ttl;
        self.insert_for(key, value, ttl);
    }

    pub fn insert_for(&mut self, key: K, value: V, ttl: Duration) {
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).map(|e| e.value)
    }

    /// Drop expired entries, returning them for follow-up cleanup
    pub fn sweep(&mut self) -> Vec<(K, V)>
    where
        K: Clone,
    {
        let now = Instant::now();
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|e| (k, e.value)))
            .collect()
    }

    /// Number of stored entries, expired ones included until swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
