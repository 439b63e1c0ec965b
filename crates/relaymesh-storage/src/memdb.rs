//! Committed multi-version store
//!
//! Each commit produces an immutable [`Snapshot`] shared through an `Arc`.
//! The most recent `keep_recent` snapshots stay addressable by height for
//! historical queries; older ones are pruned.

use crate::error::{Result, StoreError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Raw committed key/value contents
pub type KvMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// Pending writes; `None` marks a delete
pub type ChangeSet = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Immutable view of the store at a committed height
#[derive(Clone, Debug)]
pub struct Snapshot {
    height: i64,
    data: Arc<KvMap>,
    hash: [u8; 32],
}

impl Snapshot {
    fn genesis() -> Self {
        let data = Arc::new(KvMap::new());
        let hash = state_hash(&data);
        Self {
            height: 0,
            data,
            hash,
        }
    }

    pub fn height(&self) -> i64 {
        self.height
    }

    pub fn hash(&self) -> [u8; 32] {
        self.hash
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    pub fn get(&self, key: &[u8]) -> Option<&Vec<u8>> {
        self.data.get(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn data(&self) -> &KvMap {
        &self.data
    }
}

/// BLAKE3 over every key/value pair in key order, each length-prefixed
pub fn state_hash(data: &KvMap) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for (key, value) in data {
        hasher.update(&(key.len() as u32).to_be_bytes());
        hasher.update(key);
        hasher.update(&(value.len() as u32).to_be_bytes());
        hasher.update(value);
    }
    *hasher.finalize().as_bytes()
}

struct MemDbInner {
    latest: Snapshot,
    history: BTreeMap<i64, Snapshot>,
    keep_recent: usize,
}

/// Committed store shared between the block executor and query readers
#[derive(Clone)]
pub struct MemDb {
    inner: Arc<RwLock<MemDbInner>>,
}

impl MemDb {
    /// Create an empty store retaining `keep_recent` historical snapshots (minimum 1)
    pub fn new(keep_recent: usize) -> Self {
        let genesis = Snapshot::genesis();
        let mut history = BTreeMap::new();
        history.insert(0, genesis.clone());
        Self {
            inner: Arc::new(RwLock::new(MemDbInner {
                latest: genesis,
                history,
                keep_recent: keep_recent.max(1),
            })),
        }
    }

    /// Snapshot of the latest committed height
    pub fn latest(&self) -> Snapshot {
        self.inner.read().latest.clone()
    }

    pub fn latest_height(&self) -> i64 {
        self.inner.read().latest.height
    }

    /// Snapshot at `height`; 0 or a negative height means latest
    pub fn snapshot_at(&self, height: i64) -> Result<Snapshot> {
        let inner = self.inner.read();
        if height <= 0 {
            return Ok(inner.latest.clone());
        }
        if let Some(snapshot) = inner.history.get(&height) {
            return Ok(snapshot.clone());
        }
        match inner.history.keys().next() {
            Some(&earliest) if height < earliest => Err(StoreError::HeightPruned { height, earliest }),
            _ => Err(StoreError::HeightNotFound(height)),
        }
    }

    /// Apply `changes` on top of the latest snapshot and record it at `height`
    pub fn commit(&self, height: i64, changes: ChangeSet) -> Result<[u8; 32]> {
        let mut inner = self.inner.write();
        let latest_height = inner.latest.height;
        if height <= latest_height && !(height == 0 && latest_height == 0) {
            return Err(StoreError::NonMonotonicCommit {
                height,
                latest: latest_height,
            });
        }

        let mut data = (*inner.latest.data).clone();
        for (key, value) in changes {
            match value {
                Some(v) => {
                    data.insert(key, v);
                }
                None => {
                    data.remove(&key);
                }
            }
        }
        let hash = state_hash(&data);
        let snapshot = Snapshot {
            height,
            data: Arc::new(data),
            hash,
        };

        inner.history.insert(height, snapshot.clone());
        inner.latest = snapshot;
        while inner.history.len() > inner.keep_recent {
            let Some((&oldest, _)) = inner.history.iter().next() else {
                break;
            };
            inner.history.remove(&oldest);
        }

        tracing::debug!(height, hash = %hex::encode(hash), "committed snapshot");
        Ok(hash)
    }
}
