//! Block execution context
//!
//! Wraps the layered store with the block header, the parameter snapshot
//! loaded at `BeginBlock`, the consensus parameters, buffered events and the
//! entity caches. Branches span all of them: a discarded branch drops its
//! writes, its events and its cache entries together.

use crate::cache::EntityCache;
use crate::entity::{Requestor, Servicer};
use relaymesh_core::codec::{decode_value, encode_value};
use relaymesh_core::error::Result;
use relaymesh_core::events::Event;
use relaymesh_core::params::{Params, UpgradeState};
use relaymesh_core::time::BlockTime;
use relaymesh_core::types::{BlockHeader, ConsensusParams};
use relaymesh_storage::{LayeredStore, StoreIter};
use serde::{de::DeserializeOwned, Serialize};

/// Default capacity of each entity cache
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Execution context of one block (or one query)
pub struct Context {
    store: LayeredStore,
    header: BlockHeader,
    params: Params,
    upgrade: UpgradeState,
    consensus: ConsensusParams,
    events: Vec<Vec<Event>>,
    servicers: EntityCache<Servicer>,
    requestors: EntityCache<Requestor>,
}

impl Context {
    pub fn new(store: LayeredStore, header: BlockHeader, consensus: ConsensusParams, cache_capacity: usize) -> Self {
        Self {
            store,
            header,
            params: Params::default(),
            upgrade: UpgradeState::default(),
            consensus,
            events: vec![Vec::new()],
            servicers: EntityCache::new(cache_capacity),
            requestors: EntityCache::new(cache_capacity),
        }
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn height(&self) -> i64 {
        self.header.height
    }

    pub fn block_time(&self) -> BlockTime {
        self.header.time
    }

    /// Parameter snapshot in force for this block
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    pub fn upgrade(&self) -> &UpgradeState {
        &self.upgrade
    }

    pub fn set_upgrade(&mut self, upgrade: UpgradeState) {
        self.upgrade = upgrade;
    }

    pub fn consensus(&self) -> &ConsensusParams {
        &self.consensus
    }

    pub fn is_feature_active(&self, feature: &str) -> bool {
        self.upgrade.is_active(feature, self.height())
    }

    pub fn store(&self) -> &LayeredStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut LayeredStore {
        &mut self.store
    }

    pub fn into_store(self) -> LayeredStore {
        self.store
    }

    pub(crate) fn servicer_cache(&self) -> &EntityCache<Servicer> {
        &self.servicers
    }

    pub(crate) fn requestor_cache(&self) -> &EntityCache<Requestor> {
        &self.requestors
    }

    // --- typed store access ---

    pub fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.store.get(key) {
            Some(bytes) => Ok(Some(decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> Result<()> {
        let bytes = encode_value(value)?;
        self.store.set(key, bytes);
        Ok(())
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.store.has(key)
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.store.delete(key);
    }

    pub fn iter_prefix(&self, prefix: &[u8]) -> StoreIter {
        self.store.iter_prefix(prefix)
    }

    pub fn iter_prefix_rev(&self, prefix: &[u8]) -> StoreIter {
        self.store.iter_prefix_rev(prefix)
    }

    pub fn iter_range(&self, start: &[u8], end: Option<&[u8]>) -> StoreIter {
        self.store.iter_range(start, end, false)
    }

    // --- events ---

    pub fn emit(&mut self, event: Event) {
        if let Some(layer) = self.events.last_mut() {
            layer.push(event);
        }
    }

    /// Position in the block-layer event buffer
    pub fn event_mark(&self) -> usize {
        self.events.first().map(Vec::len).unwrap_or(0)
    }

    /// Block-layer events appended after `mark`
    pub fn events_since(&self, mark: usize) -> Vec<Event> {
        self.events
            .first()
            .and_then(|layer| layer.get(mark..))
            .map(<[Event]>::to_vec)
            .unwrap_or_default()
    }

    /// Drain events buffered at the block layer
    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.first_mut().map(std::mem::take).unwrap_or_default()
    }

    // --- branches ---

    pub fn branch(&mut self) {
        self.store.push_layer();
        self.events.push(Vec::new());
        self.servicers.push_layer();
        self.requestors.push_layer();
    }

    pub fn commit_branch(&mut self) -> Result<()> {
        self.store.commit_layer()?;
        if self.events.len() > 1 {
            if let Some(top) = self.events.pop() {
                if let Some(parent) = self.events.last_mut() {
                    parent.extend(top);
                }
            }
        }
        self.servicers.commit_layer();
        self.requestors.commit_layer();
        Ok(())
    }

    pub fn discard_branch(&mut self) -> Result<()> {
        self.store.discard_layer()?;
        if self.events.len() > 1 {
            self.events.pop();
        }
        self.servicers.discard_layer();
        self.requestors.discard_layer();
        Ok(())
    }

    /// Run `f` in a branch committed on `Ok` and discarded on `Err`
    pub fn with_branch<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.branch();
        match f(self) {
            Ok(value) => {
                self.commit_branch()?;
                Ok(value)
            }
            Err(e) => {
                self.discard_branch()?;
                Err(e)
            }
        }
    }
}
