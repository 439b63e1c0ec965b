//! Node errors

use relaymesh_core::{CodecError, StakingError};
use relaymesh_staking::InvariantError;
use relaymesh_storage::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodeError>;

/// Errors raised by the block executor and the host glue around it
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("logging: {0}")]
    Logging(String),

    #[error("encoding: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Staking(#[from] StakingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("state invariant broken: {0}")]
    Invariant(#[from] InvariantError),

    #[error("chain id mismatch: expected {expected}, got {got}")]
    ChainIdMismatch { expected: String, got: String },

    #[error("expected block {expected}, got {got}")]
    UnexpectedHeight { expected: i64, got: i64 },

    #[error("block {0} is still open")]
    BlockInProgress(i64),

    #[error("no block is open")]
    NoOpenBlock,

    #[error("chain already initialized at height {0}")]
    AlreadyInitialized(i64),
}
