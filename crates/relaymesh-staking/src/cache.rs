//! Branch-aware LRU cache of decoded entities
//!
//! The committed layer is a bounded LRU (`IndexMap` in recency order). Each
//! open branch keeps its own overlay of cached values and invalidations:
//! committing a branch folds its overlay into the parent, discarding drops
//! it, so a rolled-back write can never be served from the cache.

use indexmap::IndexMap;
use relaymesh_core::types::Address;
use std::cell::RefCell;
use std::collections::BTreeMap;

/// Result of a cache probe
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup<V> {
    /// Cached decoded value
    Hit(V),
    /// Known absent or written since it was cached; read the store
    Miss,
}

#[derive(Debug)]
struct Inner<V> {
    capacity: usize,
    lru: IndexMap<Address, V>,
    layers: Vec<BTreeMap<Address, Option<V>>>,
}

/// Entity cache scoped to one block context
#[derive(Debug)]
pub struct EntityCache<V: Clone> {
    inner: RefCell<Inner<V>>,
}

impl<V: Clone> EntityCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RefCell::new(Inner {
                capacity,
                lru: IndexMap::new(),
                layers: Vec::new(),
            }),
        }
    }

    pub fn get(&self, addr: &Address) -> Lookup<V> {
        let mut inner = self.inner.borrow_mut();
        for layer in inner.layers.iter().rev() {
            match layer.get(addr) {
                Some(Some(value)) => return Lookup::Hit(value.clone()),
                Some(None) => return Lookup::Miss,
                None => {}
            }
        }
        // refresh recency
        match inner.lru.shift_remove(addr) {
            Some(value) => {
                inner.lru.insert(*addr, value.clone());
                Lookup::Hit(value)
            }
            None => Lookup::Miss,
        }
    }

    /// Remember a value just read from the store
    pub fn fill(&self, addr: Address, value: V) {
        let mut inner = self.inner.borrow_mut();
        if inner.capacity == 0 {
            return;
        }
        match inner.layers.last_mut() {
            Some(layer) => {
                layer.insert(addr, Some(value));
            }
            None => inner.insert_lru(addr, value),
        }
    }

    /// Forget a value that is being written or deleted
    pub fn invalidate(&self, addr: &Address) {
        let mut inner = self.inner.borrow_mut();
        match inner.layers.last_mut() {
            Some(layer) => {
                layer.insert(*addr, None);
            }
            None => {
                inner.lru.shift_remove(addr);
            }
        }
    }

    pub fn push_layer(&self) {
        self.inner.borrow_mut().layers.push(BTreeMap::new());
    }

    pub fn commit_layer(&self) {
        let mut inner = self.inner.borrow_mut();
        let Some(top) = inner.layers.pop() else {
            return;
        };
        if let Some(parent) = inner.layers.last_mut() {
            parent.extend(top);
            return;
        }
        for (addr, entry) in top {
            match entry {
                Some(value) => inner.insert_lru(addr, value),
                None => {
                    inner.lru.shift_remove(&addr);
                }
            }
        }
    }

    pub fn discard_layer(&self) {
        self.inner.borrow_mut().layers.pop();
    }

    /// Entries held by the committed layer
    pub fn len(&self) -> usize {
        self.inner.borrow().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Inner<V> {
    fn insert_lru(&mut self, addr: Address, value: V) {
        self.lru.shift_remove(&addr);
        self.lru.insert(addr, value);
        while self.lru.len() > self.capacity {
            self.lru.shift_remove_index(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::new([n; 20])
    }

    #[test]
    fn test_lru_eviction() {
        let cache = EntityCache::new(2);
        cache.fill(addr(1), 1u32);
        cache.fill(addr(2), 2);
        assert_eq!(cache.get(&addr(1)), Lookup::Hit(1));
        cache.fill(addr(3), 3);
        // addr(2) was least recently used
        assert_eq!(cache.get(&addr(2)), Lookup::Miss);
        assert_eq!(cache.get(&addr(1)), Lookup::Hit(1));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_discarded_branch_drops_invalidation() {
        let cache = EntityCache::new(4);
        cache.fill(addr(1), 10u32);
        cache.push_layer();
        cache.invalidate(&addr(1));
        assert_eq!(cache.get(&addr(1)), Lookup::Miss);
        cache.discard_layer();
        assert_eq!(cache.get(&addr(1)), Lookup::Hit(10));
    }

    #[test]
    fn test_committed_branch_invalidates_parent() {
        let cache = EntityCache::new(4);
        cache.fill(addr(1), 10u32);
        cache.push_layer();
        cache.push_layer();
        cache.invalidate(&addr(1));
        cache.commit_layer();
        cache.commit_layer();
        assert_eq!(cache.get(&addr(1)), Lookup::Miss);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_never_caches() {
        let cache = EntityCache::new(0);
        cache.fill(addr(1), 1u32);
        assert_eq!(cache.get(&addr(1)), Lookup::Miss);
    }
}
