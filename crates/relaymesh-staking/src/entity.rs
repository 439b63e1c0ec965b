//! # Staked Entities
//!
//! Servicers and requestors share a small capability surface
//! ([`StakedEntity`]); everything else is variant specific.
//!
//! | Entity | Pool | Jail | Pause | Waiting queue |
//! |--------|------|------|-------|---------------|
//! | Servicer | `staked_tokens_pool` | yes | yes | yes |
//! | Requestor | `requestor_staked_tokens_pool` | no | no | no |

use relaymesh_core::constants::POWER_REDUCTION;
use relaymesh_core::math::Dec;
use relaymesh_core::params::ScoreWeights;
use relaymesh_core::time::BlockTime;
use relaymesh_core::tx::ReportScores;
use relaymesh_core::types::{amount_string, modules, Address, ChainId, GeoZone, PublicKey, StakeStatus};
use serde::{Deserialize, Serialize};

/// Common accessors over servicers and requestors
pub trait StakedEntity {
    fn address(&self) -> Address;
    fn status(&self) -> StakeStatus;
    fn staked_tokens(&self) -> u128;
    fn chains(&self) -> &[ChainId];
    fn unstaking_time(&self) -> Option<BlockTime>;

    /// Where returned stake and rewards are paid
    fn payout_address(&self) -> Address;

    /// Module account escrowing this entity's stake
    fn pool() -> &'static str;

    fn supports_chain(&self, chain: &ChainId) -> bool {
        self.chains().contains(chain)
    }
}

/// Consensus power derived from staked tokens
pub fn tokens_to_power(tokens: u128) -> u64 {
    u64::try_from(tokens / POWER_REDUCTION).unwrap_or(u64::MAX)
}

/// Infrastructure node relaying traffic for external chains
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Servicer {
    /// Operator address, derived from the public key
    pub address: Address,

    /// Consensus public key
    pub public_key: PublicKey,

    /// Removed from the staking set until unjailed
    pub jailed: bool,

    /// Voluntarily paused; keeps its index entry but has no consensus power
    pub paused: bool,

    /// Block time the pause began
    pub paused_at: Option<BlockTime>,

    pub status: StakeStatus,

    /// Supported external chains
    pub chains: Vec<ChainId>,

    /// Served geographic zones
    pub geo_zones: Vec<GeoZone>,

    pub service_url: String,

    /// Escrowed tokens in the base denomination
    #[serde(with = "amount_string")]
    pub staked_tokens: u128,

    /// Set only while `status == Unstaking`
    pub unstaking_time: Option<BlockTime>,

    /// Reward and refund destination; falls back to the operator
    pub output_address: Option<Address>,
}

impl Servicer {
    /// Ranking power used by the staking set index
    pub fn power(&self) -> u64 {
        tokens_to_power(self.staked_tokens)
    }

    /// Power reported to consensus; paused servicers report zero
    pub fn consensus_power(&self) -> u64 {
        if self.paused || self.jailed || self.status != StakeStatus::Staked {
            0
        } else {
            self.power()
        }
    }

    /// Whether the entity belongs in the staking set index
    pub fn is_bonded(&self) -> bool {
        self.status == StakeStatus::Staked && !self.jailed
    }

    /// Operator or output address may act on the servicer
    pub fn is_authorized(&self, signer: &Address) -> bool {
        *signer == self.address || self.output_address.as_ref() == Some(signer)
    }
}

impl StakedEntity for Servicer {
    fn address(&self) -> Address {
        self.address
    }

    fn status(&self) -> StakeStatus {
        self.status
    }

    fn staked_tokens(&self) -> u128 {
        self.staked_tokens
    }

    fn chains(&self) -> &[ChainId] {
        &self.chains
    }

    fn unstaking_time(&self) -> Option<BlockTime> {
        self.unstaking_time
    }

    fn payout_address(&self) -> Address {
        self.output_address.unwrap_or(self.address)
    }

    fn pool() -> &'static str {
        modules::STAKED_POOL
    }
}

/// Client purchasing relay throughput by staking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requestor {
    pub address: Address,
    pub public_key: PublicKey,
    pub status: StakeStatus,
    pub chains: Vec<ChainId>,
    pub geo_zones: Vec<GeoZone>,
    #[serde(with = "amount_string")]
    pub staked_tokens: u128,
    /// Relay credit per session, recomputed on every stake change
    pub max_relays: u64,
    pub servicers_per_session: u8,
    pub unstaking_time: Option<BlockTime>,
}

impl StakedEntity for Requestor {
    fn address(&self) -> Address {
        self.address
    }

    fn status(&self) -> StakeStatus {
        self.status
    }

    fn staked_tokens(&self) -> u128 {
        self.staked_tokens
    }

    fn chains(&self) -> &[ChainId] {
        &self.chains
    }

    fn unstaking_time(&self) -> Option<BlockTime> {
        self.unstaking_time
    }

    fn payout_address(&self) -> Address {
        self.address
    }

    fn pool() -> &'static str {
        modules::REQUESTOR_STAKED_POOL
    }
}

/// Rolling quality averages of a servicer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCard {
    pub total_sessions: u64,
    pub latency: Dec,
    pub availability: Dec,
    pub reliability: Dec,
}

fn rolling(avg: Dec, n: u64, sample: Dec) -> Dec {
    // min(1, (avg * n + s) / (n + 1))
    avg.checked_mul_int(n as u128)
        .and_then(|sum| sum.checked_add(sample))
        .and_then(|sum| sum.checked_div_int(n as u128 + 1))
        .unwrap_or(Dec::ONE)
        .min_one()
}

impl ReportCard {
    /// Fold one sampled report into the averages
    pub fn update(&mut self, scores: &ReportScores) {
        let n = self.total_sessions;
        self.latency = rolling(self.latency, n, scores.latency);
        self.availability = rolling(self.availability, n, scores.availability);
        self.reliability = rolling(self.reliability, n, scores.reliability);
        self.total_sessions = n.saturating_add(1);
    }

    /// `w_L·L + w_A·A + w_R·R`, clamped to 1
    pub fn weighted_total(&self, weights: &ScoreWeights) -> Dec {
        weighted_score(self.latency, self.availability, self.reliability, weights)
    }
}

/// Weighted score of three [0, 1] components, clamped to 1
pub fn weighted_score(latency: Dec, availability: Dec, reliability: Dec, weights: &ScoreWeights) -> Dec {
    let part = |score: Dec, weight: Dec| score.checked_mul(weight).unwrap_or(Dec::ONE);
    part(latency, weights.latency)
        .saturating_add(part(availability, weights.availability))
        .saturating_add(part(reliability, weights.reliability))
        .min_one()
}
