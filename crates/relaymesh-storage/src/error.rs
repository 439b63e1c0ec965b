//! Storage errors

use relaymesh_core::StakingError;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no snapshot at height {0}")]
    HeightNotFound(i64),

    #[error("height {height} was pruned, earliest retained is {earliest}")]
    HeightPruned { height: i64, earliest: i64 },

    #[error("commit height {height} must follow latest {latest}")]
    NonMonotonicCommit { height: i64, latest: i64 },

    #[error("no branch layer to commit or discard")]
    NoOpenLayer,

    #[error("{0} uncommitted branch layers remain")]
    UncommittedLayers(usize),

    #[error("{0} iterators were left open")]
    IteratorLeak(usize),
}

impl From<StoreError> for StakingError {
    fn from(e: StoreError) -> Self {
        StakingError::Store(e.to_string())
    }
}
