//! Layered write overlay over a committed snapshot
//!
//! The block executor owns one `LayeredStore` per block. Layer 0 buffers the
//! block's writes; every transaction (and every nested operation that must be
//! atomic) pushes a branch layer that is either committed into the layer
//! below or discarded. Reads see the newest layer first, then the snapshot.

use crate::error::{Result, StoreError};
use crate::gas::{GasConfig, GasMeter};
use crate::memdb::{ChangeSet, Snapshot};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::rc::Rc;

/// Smallest key strictly greater than every key starting with `prefix`
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Materialized, deterministic store iterator
///
/// Must be released with [`StoreIter::close`]; dropping it without closing
/// leaves it counted as open and the executor reports a leak.
#[derive(Debug)]
pub struct StoreIter {
    items: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
    open: Rc<Cell<usize>>,
}

impl StoreIter {
    /// Release the iterator
    pub fn close(self) {
        self.open.set(self.open.get().saturating_sub(1));
    }

    /// Drain the remaining items and close
    pub fn collect_and_close(mut self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let items: Vec<_> = self.items.by_ref().collect();
        self.close();
        items
    }
}

impl Iterator for StoreIter {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }
}

/// Snapshot plus a stack of write layers
#[derive(Debug)]
pub struct LayeredStore {
    base: Snapshot,
    layers: Vec<ChangeSet>,
    open_iterators: Rc<Cell<usize>>,
    gas: GasMeter,
}

impl LayeredStore {
    pub fn new(base: Snapshot) -> Self {
        Self::with_gas(base, GasConfig::default())
    }

    pub fn with_gas(base: Snapshot, gas: GasConfig) -> Self {
        Self {
            base,
            layers: vec![ChangeSet::new()],
            open_iterators: Rc::new(Cell::new(0)),
            gas: GasMeter::new(gas),
        }
    }

    /// Height of the snapshot the layers sit on
    pub fn base_height(&self) -> i64 {
        self.base.height()
    }

    pub fn gas(&self) -> &GasMeter {
        &self.gas
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let value = self.lookup(key);
        self.gas.charge_read(key, value.as_deref());
        value
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    fn lookup(&self, key: &[u8]) -> Option<Vec<u8>> {
        for layer in self.layers.iter().rev() {
            if let Some(entry) = layer.get(key) {
                return entry.clone();
            }
        }
        self.base.get(key).cloned()
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.gas.charge_write(&key, &value);
        self.top().insert(key, Some(value));
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.gas.charge_delete();
        self.top().insert(key.to_vec(), None);
    }

    fn top(&mut self) -> &mut ChangeSet {
        if self.layers.is_empty() {
            self.layers.push(ChangeSet::new());
        }
        let last = self.layers.len() - 1;
        &mut self.layers[last]
    }

    /// Iterate `[start, end)` in key order (or reverse key order)
    pub fn iter_range(&self, start: &[u8], end: Option<&[u8]>, reverse: bool) -> StoreIter {
        self.open_iterators.set(self.open_iterators.get() + 1);
        if matches!(end, Some(e) if e <= start) {
            return StoreIter {
                items: Vec::new().into_iter(),
                open: Rc::clone(&self.open_iterators),
            };
        }

        let lower = Bound::Included(start.to_vec());
        let upper = match end {
            Some(e) => Bound::Excluded(e.to_vec()),
            None => Bound::Unbounded,
        };

        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = self
            .base
            .data()
            .range((lower.clone(), upper.clone()))
            .map(|(k, v)| (k.clone(), Some(v.clone())))
            .collect();
        for layer in &self.layers {
            for (k, v) in layer.range((lower.clone(), upper.clone())) {
                merged.insert(k.clone(), v.clone());
            }
        }

        let mut items: Vec<(Vec<u8>, Vec<u8>)> = merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect();
        if reverse {
            items.reverse();
        }
        for (k, v) in &items {
            self.gas.charge_iter_next(k, v);
        }

        StoreIter {
            items: items.into_iter(),
            open: Rc::clone(&self.open_iterators),
        }
    }

    /// Iterate every key starting with `prefix` in key order
    pub fn iter_prefix(&self, prefix: &[u8]) -> StoreIter {
        let end = prefix_end(prefix);
        self.iter_range(prefix, end.as_deref(), false)
    }

    /// Iterate every key starting with `prefix` in reverse key order
    pub fn iter_prefix_rev(&self, prefix: &[u8]) -> StoreIter {
        let end = prefix_end(prefix);
        self.iter_range(prefix, end.as_deref(), true)
    }

    /// Number of iterators not yet closed
    pub fn open_iterators(&self) -> usize {
        self.open_iterators.get()
    }

    /// Fail if any iterator is still open, resetting the counter
    pub fn check_iterators(&self) -> Result<()> {
        match self.open_iterators.replace(0) {
            0 => Ok(()),
            n => Err(StoreError::IteratorLeak(n)),
        }
    }

    /// Open a branch; returns the new depth
    pub fn push_layer(&mut self) -> usize {
        self.layers.push(ChangeSet::new());
        self.layers.len()
    }

    /// Merge the top branch into the layer below
    pub fn commit_layer(&mut self) -> Result<()> {
        if self.layers.len() < 2 {
            return Err(StoreError::NoOpenLayer);
        }
        let top = self.layers.pop().ok_or(StoreError::NoOpenLayer)?;
        self.top().extend(top);
        Ok(())
    }

    /// Drop the top branch
    pub fn discard_layer(&mut self) -> Result<()> {
        if self.layers.len() < 2 {
            return Err(StoreError::NoOpenLayer);
        }
        self.layers.pop();
        Ok(())
    }

    /// Number of layers including the block layer
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Hand the block's writes to the committer; fails if branches are open
    pub fn take_changes(&mut self) -> Result<ChangeSet> {
        if self.layers.len() > 1 {
            return Err(StoreError::UncommittedLayers(self.layers.len() - 1));
        }
        Ok(std::mem::take(self.top()))
    }

    /// Continue on top of a newly committed snapshot
    pub fn rebase(&mut self, base: Snapshot) {
        self.base = base;
        self.layers = vec![ChangeSet::new()];
        self.open_iterators.set(0);
    }
}
