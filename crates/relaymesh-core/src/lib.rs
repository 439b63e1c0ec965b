//! # Relaymesh Core
//!
//! Shared building blocks of the relaymesh staking state machine.
//!
//! - `Address`, `PublicKey`, `ChainId`, `GeoZone` - identities and identifiers
//! - `Dec` - 18-digit fixed-point decimal used for scores and fractions
//! - `Params` - immutable governance parameter snapshot
//! - `Tx` / `Msg` - transaction envelope and the two wire encodings
//! - `StakingError` - the error taxonomy with stable codes
//!
//! Nothing in this crate touches storage; the state machine lives in
//! `relaymesh-staking`.

pub mod codec;
pub mod error;
pub mod events;
pub mod math;
pub mod params;
pub mod time;
pub mod tx;
pub mod types;

pub use codec::*;
pub use error::*;
pub use events::*;
pub use math::*;
pub use params::*;
pub use time::*;
pub use tx::*;
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Result, StakingError};
    pub use crate::events::{Event, EventKind};
    pub use crate::math::{Dec, Rounding};
    pub use crate::params::{features, Params, UpgradeState};
    pub use crate::time::BlockTime;
    pub use crate::tx::{Msg, Tx, TxEncoding};
    pub use crate::types::*;
}
