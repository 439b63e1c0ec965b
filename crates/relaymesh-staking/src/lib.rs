//! # Relaymesh Staking - Servicer & Requestor State Machine
//!
//! Deterministic staking core of the relaymesh service network. Servicers
//! escrow tokens to relay traffic for external chains and take part in
//! consensus; requestors escrow tokens to buy relay throughput.
//!
//! ## Block Lifecycle
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────┐   ┌──────────────┐
//! │  BeginBlock  │──▶│  DeliverTx (per tx)  │──▶│   EndBlock   │
//! │ evidence     │   │ fee branch           │   │ fee split    │
//! │ liveness     │   │ message branch       │   │ unstake queue│
//! │ jail counter │   │ events + gas         │   │ valset diff  │
//! └──────────────┘   └──────────────────────┘   └──────────────┘
//! ```
//!
//! ## Servicer Status
//!
//! | From | Event | To |
//! |------|-------|----|
//! | - | stake | Staked |
//! | Staked | begin unstake, next session start | Unstaking |
//! | Unstaking | completion time reached | Unstaked |
//! | Staked | slashed below minimum | Unstaked |
//!
//! Jailing and pausing are flags on a `Staked` servicer, not statuses.

pub mod bank;
pub mod cache;
pub mod context;
pub mod entity;
pub mod genesis;
pub mod governance;
pub mod handlers;
pub mod index;
pub mod invariants;
pub mod keys;
pub mod query;
pub mod queue;
pub mod report_card;
pub mod requestors;
pub mod rewards;
pub mod scheduler;
pub mod signing;
pub mod slashing;
pub mod staking;
pub mod validation;

#[cfg(test)]
mod testutil;

// Re-exports
pub use bank::{Bank, StoreBank};
pub use context::{Context, DEFAULT_CACHE_CAPACITY};
pub use entity::{ReportCard, Requestor, Servicer, StakedEntity};
pub use genesis::{GenesisAccount, GenesisReportCard, GenesisState, GenesisWaiting};
pub use handlers::TxResult;
pub use invariants::InvariantError;
pub use query::{Querier, StakedPools, ValidatorInfo};
pub use report_card::{ReportOutcome, ReportRecord};
pub use rewards::{FeeSplit, RewardSplit};
pub use scheduler::{EndBlockSummary, LastPower};
pub use signing::SigningInfo;
pub use slashing::SlashReason;
pub use staking::{EntityFilter, Page, StakeManager};
