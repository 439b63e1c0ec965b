//! Governance parameters
//!
//! `Params` is an immutable snapshot. The scheduler loads it once at the start
//! of each block; governance writes the next snapshot, which becomes visible
//! at the following `BeginBlock`.

use crate::error::{Result, StakingError};
use crate::math::Dec;
use crate::types::{amount_string, Address};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Weights of the three report-card averages; must sum to exactly 1
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub latency: Dec,
    pub availability: Dec,
    pub reliability: Dec,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            latency: Dec::from_percent(40),
            availability: Dec::from_percent(30),
            reliability: Dec::from_percent(30),
        }
    }
}

/// Percentage split of each minted relay reward; must sum to at most 100.
/// The servicer receives whatever the four allocations leave over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocations {
    pub dao: u64,
    pub requestor: u64,
    pub proposer: u64,
    pub fishermen: u64,
}

impl Allocations {
    /// Sum of the four allocations; `None` on overflow
    pub fn total(&self) -> Option<u64> {
        self.dao
            .checked_add(self.requestor)?
            .checked_add(self.proposer)?
            .checked_add(self.fishermen)
    }

    /// Share left to the servicer
    pub fn servicer(&self) -> u64 {
        self.total().map_or(0, |total| 100u64.saturating_sub(total))
    }
}

impl Default for Allocations {
    fn default() -> Self {
        Self {
            dao: 10,
            requestor: 5,
            proposer: 5,
            fishermen: 5,
        }
    }
}

/// Full governance parameter snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    // --- servicer staking ---
    pub unstaking_time_ms: u64,
    pub max_validators: u64,
    /// Cap on concurrently staked servicers
    pub max_servicers: u64,
    #[serde(with = "amount_string")]
    pub minimum_stake: u128,
    pub max_chains: u64,
    pub max_geo_zones: u64,
    pub session_block_frequency: u64,
    pub servicer_count_lock: bool,
    /// Width of a quantized stake bin once `STAKE_BINS` is active
    #[serde(with = "amount_string")]
    pub servicer_stake_bin_width: u128,
    pub min_pause_time_ms: u64,

    // --- liveness and slashing ---
    pub signed_blocks_window: u64,
    pub min_signed_per_window: Dec,
    pub downtime_jail_duration_ms: u64,
    pub max_evidence_age_ms: u64,
    pub max_evidence_age_blocks: u64,
    pub max_jailed_blocks: u64,
    pub slash_fraction_double_sign: Dec,
    pub slash_fraction_downtime: Dec,
    pub slash_fraction_no_activity: Dec,
    pub slash_fraction_fisherman: Dec,

    // --- rewards ---
    #[serde(with = "amount_string")]
    pub token_reward_factor: u128,
    pub score_weights: ScoreWeights,
    pub allocations: Allocations,
    pub burn_active: bool,
    pub max_free_tier_relays_per_session: u64,
    pub max_fishermen: u64,

    // --- requestors ---
    #[serde(with = "amount_string")]
    pub requestor_minimum_stake: u128,
    pub max_requestors: u64,
    pub baseline_throughput_stake_rate: u64,
    pub stability_modulation: i64,
    pub participation_rate_on: bool,
    pub max_servicers_per_session: u64,

    // --- transactions and governance ---
    pub stake_denom: String,
    #[serde(with = "amount_string")]
    pub base_tx_fee: u128,
    pub dao_owner: Address,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            unstaking_time_ms: 21 * 24 * 3600 * 1000, // 21 days
            max_validators: 5000,
            max_servicers: 100_000,
            minimum_stake: 15_000_000_000,
            max_chains: 15,
            max_geo_zones: 5,
            session_block_frequency: 4,
            servicer_count_lock: false,
            servicer_stake_bin_width: 0,
            min_pause_time_ms: 10 * 60 * 1000, // 10 minutes

            signed_blocks_window: 10,
            min_signed_per_window: Dec::from_percent(60),
            downtime_jail_duration_ms: 60 * 60 * 1000, // 1 hour
            max_evidence_age_ms: 2 * 60 * 1000,
            max_evidence_age_blocks: 120,
            max_jailed_blocks: 37_960,
            slash_fraction_double_sign: Dec::from_percent(5),
            slash_fraction_downtime: Dec::from_ratio(1, 1_000_000).unwrap_or(Dec::ZERO),
            slash_fraction_no_activity: Dec::from_ratio(1, 1_000_000).unwrap_or(Dec::ZERO),
            slash_fraction_fisherman: Dec::from_ratio(1, 1_000).unwrap_or(Dec::ZERO),

            token_reward_factor: 1000,
            score_weights: ScoreWeights::default(),
            allocations: Allocations::default(),
            burn_active: false,
            max_free_tier_relays_per_session: 10_000,
            max_fishermen: 100,

            requestor_minimum_stake: 1_000_000,
            max_requestors: 10_000,
            baseline_throughput_stake_rate: 100,
            stability_modulation: 0,
            participation_rate_on: false,
            max_servicers_per_session: 24,

            stake_denom: "umesh".to_string(),
            base_tx_fee: 10_000,
            dao_owner: Address::default(),
        }
    }
}

impl Params {
    /// Validate internal consistency of a snapshot
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(StakingError::InvalidParam(msg.to_string()));

        if self.session_block_frequency == 0 {
            return invalid("session_block_frequency must be positive");
        }
        if self.signed_blocks_window == 0 {
            return invalid("signed_blocks_window must be positive");
        }
        if self.min_signed_per_window > Dec::ONE {
            return invalid("min_signed_per_window must be at most 1");
        }
        for (name, f) in [
            ("slash_fraction_double_sign", self.slash_fraction_double_sign),
            ("slash_fraction_downtime", self.slash_fraction_downtime),
            ("slash_fraction_no_activity", self.slash_fraction_no_activity),
            ("slash_fraction_fisherman", self.slash_fraction_fisherman),
        ] {
            if f > Dec::ONE {
                return Err(StakingError::InvalidParam(format!("{name} must be at most 1")));
            }
        }
        let weights = self
            .score_weights
            .latency
            .checked_add(self.score_weights.availability)
            .and_then(|s| s.checked_add(self.score_weights.reliability));
        if weights != Some(Dec::ONE) {
            return invalid("score weights must sum to 1");
        }
        if !matches!(self.allocations.total(), Some(total) if total <= 100) {
            return invalid("allocations must sum to at most 100");
        }
        if self.max_chains == 0 {
            return invalid("max_chains must be positive");
        }
        if self.max_servicers_per_session == 0 || self.max_servicers_per_session > 255 {
            return invalid("max_servicers_per_session must be within 1..=255");
        }
        if self.stake_denom.is_empty() {
            return invalid("stake_denom must not be empty");
        }
        Ok(())
    }

    /// Number of blocks within the window a servicer must have signed
    pub fn min_signed_count(&self) -> u64 {
        self.min_signed_per_window
            .mul_int_round(self.signed_blocks_window as u128)
            .unwrap_or(0) as u64
    }

    /// Max misses tolerated inside the window before downtime triggers
    pub fn max_missed_blocks(&self) -> u64 {
        self.signed_blocks_window.saturating_sub(self.min_signed_count())
    }

    /// Height at which the session containing `height` started
    pub fn session_start(&self, height: i64) -> i64 {
        let freq = self.session_block_frequency as i64;
        height - (height - 1).rem_euclid(freq)
    }

    /// Whether `height` opens a new session
    pub fn is_session_start(&self, height: i64) -> bool {
        height >= 1 && (height - 1) % self.session_block_frequency as i64 == 0
    }

    /// Apply a single JSON edit by top-level field name, returning the new snapshot
    pub fn with_change(&self, key: &str, value: &str) -> Result<Params> {
        let mut view = serde_json::to_value(self)?;
        let parsed: serde_json::Value = serde_json::from_str(value)
            .map_err(|e| StakingError::InvalidParam(format!("{key}: {e}")))?;
        let obj = view
            .as_object_mut()
            .ok_or_else(|| StakingError::InvalidParam("params are not an object".into()))?;
        if !obj.contains_key(key) {
            return Err(StakingError::InvalidParam(format!("unknown parameter {key}")));
        }
        obj.insert(key.to_string(), parsed);
        let next: Params = serde_json::from_value(view)
            .map_err(|e| StakingError::InvalidParam(format!("{key}: {e}")))?;
        next.validate()?;
        Ok(next)
    }
}

/// Names of height-gated protocol features
pub mod features {
    /// Stake edits must climb into a strictly higher quantized stake bin
    pub const STAKE_BINS: &str = "STAKE_BINS";
    /// Unstaked entities are deleted from the registry instead of kept as tombstones
    pub const UNSTAKE_CLEANUP: &str = "UNSTAKE_CLEANUP";

    pub const ALL: [&str; 2] = [STAKE_BINS, UNSTAKE_CLEANUP];

    /// Default stake-bin width initialized when `STAKE_BINS` activates
    pub const DEFAULT_STAKE_BIN_WIDTH: u128 = 15_000_000_000;
}

/// Protocol upgrade state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeState {
    /// Protocol version string of the latest plan
    pub version: String,
    /// Height of the latest plan
    pub height: i64,
    /// Transactions at heights above this use the versioned wire encoding
    pub codec_upgrade_height: i64,
    /// Feature name to activation height
    pub features: BTreeMap<String, i64>,
}

impl UpgradeState {
    /// Whether `feature` is active at `height`
    pub fn is_active(&self, feature: &str, height: i64) -> bool {
        self.features
            .get(feature)
            .map(|&h| h <= height)
            .unwrap_or(false)
    }
}
