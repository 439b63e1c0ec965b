//! # Relaymesh Storage
//!
//! The key/value transaction context the staking state machine runs against.
//!
//! ## Layout
//!
//! - `memdb` - committed multi-version store, one `Arc` snapshot per height
//! - `layered` - per-block write overlay with nested branches and closeable iterators
//! - `gas` - informational gas accounting for store access

pub mod error;
pub mod gas;
pub mod layered;
pub mod memdb;

pub use error::{Result, StoreError};
pub use gas::{GasConfig, GasMeter};
pub use layered::{prefix_end, LayeredStore, StoreIter};
pub use memdb::{state_hash, ChangeSet, KvMap, MemDb, Snapshot};
