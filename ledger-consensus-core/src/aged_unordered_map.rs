use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::NetClock;

struct AgedEntry<V> {
    value: V,
    when: SystemTime,
}

/// A hash map whose entries remember when they were inserted or last touched,
/// so stale entries can be swept with [`AgedUnorderedMap::expire`].
///
/// Reading an entry does not refresh its age; callers that want an entry to
/// stay alive because it is in use call [`AgedUnorderedMap::touch`].
pub struct AgedUnorderedMap<K, V, C>
    where
        K: Eq + Hash,
        C: NetClock {
    inner: HashMap<K, AgedEntry<V>>,
    clock: Arc<RwLock<C>>,
}

impl<K: Eq + Hash, V, C: NetClock> AgedUnorderedMap<K, V, C> {
    pub fn new(clock: Arc<RwLock<C>>) -> Self {
        AgedUnorderedMap {
            inner: Default::default(),
            clock,
        }
    }

    pub fn now(&self) -> SystemTime {
        self.clock.read().now()
    }

    /// Get the value for `k`, inserting a default value stamped with the current
    /// time if there is none. An existing entry keeps its age.
    pub fn get_or_insert_mut(&mut self, k: K) -> &mut V where V: Default {
        let now = self.now();
        &mut self.inner.entry(k)
            .or_insert_with(|| AgedEntry { value: V::default(), when: now })
            .value
    }

    pub fn get(&self, k: &K) -> Option<&V> {
        self.inner.get(k).map(|entry| &entry.value)
    }

    /// The time `k` was inserted or last touched.
    #[cfg(test)]
    pub fn when(&self, k: &K) -> Option<SystemTime> {
        self.inner.get(k).map(|entry| entry.when)
    }

    /// Refresh the age of `k` to the current time. Returns false if `k` is absent.
    pub fn touch(&mut self, k: &K) -> bool {
        let now = self.now();
        match self.inner.get_mut(k) {
            Some(entry) => {
                entry.when = now;
                true
            }
            None => false
        }
    }

    /// Remove every entry that has not been touched within `age` of now.
    ///
    /// # Returns
    /// The number of entries removed.
    pub fn expire(&mut self, age: std::time::Duration) -> usize {
        let now = self.now();
        let expired = match now.checked_sub(age) {
            Some(expired) => expired,
            None => return 0,
        };
        let before = self.inner.len();
        self.inner.retain(|_, entry| entry.when > expired);
        before - self.inner.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter().map(|(k, entry)| (k, &entry.value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.inner.iter_mut().map(|(k, entry)| (k, &mut entry.value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
