//! # Slashing Engine
//!
//! Fractional stake penalties, jailing and forced unstakes.
//!
//! ## Offense Types & Penalties
//!
//! | Offense | Fraction parameter | Jail | Description |
//! |---------|--------------------|------|-------------|
//! | Double Sign | `slash_fraction_double_sign` | permanent (tombstone) | Conflicting votes at one height |
//! | Downtime | `slash_fraction_downtime` | `downtime_jail_duration_ms` | Too many missed blocks in the window |
//! | No Activity | `slash_fraction_no_activity` | none | Report shows zero relays and zero availability |
//! | False Report | `slash_fraction_fisherman` | none | Fisherman report contradicts on-chain state |
//!
//! Slashes compose multiplicatively: each one reduces the *current* stake to
//! `floor(tokens · (1 − f))` and burns the difference from the staked pool.
//! Falling below the minimum stake forces an unstake that burns the rest.

use crate::bank::Bank;
use crate::context::Context;
use crate::entity::Servicer;
use crate::staking::StakeManager;
use relaymesh_core::error::{Result, StakingError};
use relaymesh_core::events::{Event, EventKind};
use relaymesh_core::features;
use relaymesh_core::math::Dec;
use relaymesh_core::params::Params;
use relaymesh_core::time::far_future;
use relaymesh_core::types::{modules, Address, Evidence, StakeStatus};
use serde::{Deserialize, Serialize};

/// Why a servicer is slashed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlashReason {
    /// Signing two different blocks at the same height
    DoubleSign,
    /// Missing too many blocks in the signed-blocks window
    Downtime,
    /// Accepted report showing no service at all
    NoActivity,
    /// Fisherman submitted a verifiably false report
    FalseReport,
}

impl SlashReason {
    /// Governance-configured fraction for this offense
    pub fn fraction(&self, params: &Params) -> Dec {
        match self {
            Self::DoubleSign => params.slash_fraction_double_sign,
            Self::Downtime => params.slash_fraction_downtime,
            Self::NoActivity => params.slash_fraction_no_activity,
            Self::FalseReport => params.slash_fraction_fisherman,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::DoubleSign => "double_sign",
            Self::Downtime => "downtime",
            Self::NoActivity => "no_activity",
            Self::FalseReport => "false_report",
        }
    }
}

/// `(kept, burned)` after slashing `tokens` by `fraction`
pub fn slash_amounts(tokens: u128, fraction: Dec) -> (u128, u128) {
    let keep = Dec::ONE.saturating_sub(fraction);
    let kept = keep.mul_int_floor(tokens).unwrap_or(0).min(tokens);
    (kept, tokens - kept)
}

impl<B: Bank> StakeManager<B> {
    /// Slash a servicer by `fraction`, returning the burned amount
    pub fn slash(&self, ctx: &mut Context, addr: &Address, fraction: Dec, reason: SlashReason) -> Result<u128> {
        let Some(mut servicer) = self.get_servicer(ctx, addr)? else {
            tracing::warn!(servicer = %addr, reason = reason.name(), "slash target not found");
            return Ok(0);
        };
        if !servicer.status.holds_stake() {
            tracing::warn!(servicer = %addr, reason = reason.name(), "slash target holds no stake");
            return Ok(0);
        }

        let (kept, burned) = slash_amounts(servicer.staked_tokens, fraction);
        self.bank().burn_coins(ctx, modules::STAKED_POOL, burned)?;
        servicer.staked_tokens = kept;
        self.set_servicer(ctx, &servicer)?;

        ctx.emit(
            Event::new(EventKind::Slash, "servicers", addr)
                .attr("address", addr)
                .attr("reason", reason.name())
                .attr("fraction", fraction)
                .attr("burned", burned),
        );
        tracing::info!(servicer = %addr, reason = reason.name(), %fraction, burned, remaining = kept, "servicer slashed");

        if kept < ctx.params().minimum_stake {
            self.force_unstake(ctx, servicer)?;
        }
        Ok(burned)
    }

    /// Mark a servicer jailed; it leaves the staking set but stays Staked
    pub fn jail(&self, ctx: &mut Context, servicer: &mut Servicer, reason: SlashReason) -> Result<()> {
        if servicer.jailed {
            return Err(StakingError::AlreadyJailed);
        }
        servicer.jailed = true;
        self.set_servicer(ctx, servicer)?;
        ctx.emit(
            Event::new(EventKind::Jail, "servicers", servicer.address)
                .attr("address", servicer.address)
                .attr("reason", reason.name()),
        );
        Ok(())
    }

    /// Unstake immediately, burning the remaining stake
    ///
    /// Already-unstaked entities are logged and skipped so that scheduler
    /// loops keep going.
    pub fn force_unstake(&self, ctx: &mut Context, mut servicer: Servicer) -> Result<()> {
        let addr = servicer.address;
        if servicer.status == StakeStatus::Unstaked {
            tracing::warn!(servicer = %addr, "forced unstake on already unstaked servicer");
            return Ok(());
        }

        let burned = servicer.staked_tokens;
        self.bank().burn_coins(ctx, modules::STAKED_POOL, burned)?;
        servicer.staked_tokens = 0;
        servicer.status = StakeStatus::Unstaked;
        servicer.unstaking_time = None;
        servicer.jailed = false;
        servicer.paused = false;
        servicer.paused_at = None;
        self.clear_waiting(ctx, &addr);
        self.reset_liveness(ctx, &addr)?;

        if ctx.is_feature_active(features::UNSTAKE_CLEANUP) {
            self.delete_servicer(ctx, &addr)?;
        } else {
            self.set_servicer(ctx, &servicer)?;
        }

        ctx.emit(
            Event::new(EventKind::CompleteUnstaking, "servicers", addr)
                .attr("address", addr)
                .attr("forced", true)
                .attr("burned", burned),
        );
        tracing::info!(servicer = %addr, burned, "servicer force unstaked");
        Ok(())
    }

    /// Apply double-sign evidence: slash, jail and tombstone
    pub fn handle_double_sign(&self, ctx: &mut Context, evidence: &Evidence) -> Result<()> {
        let addr = evidence.address;
        let age_ms = (ctx.block_time() - evidence.time).num_milliseconds();
        if age_ms > i64::try_from(ctx.params().max_evidence_age_ms).unwrap_or(i64::MAX) {
            tracing::debug!(servicer = %addr, age_ms, "ignoring expired evidence");
            return Ok(());
        }
        if self.get_servicer(ctx, &addr)?.is_none() {
            tracing::warn!(servicer = %addr, "evidence for unknown servicer");
            return Ok(());
        }
        let mut info = self.signing_info_or_new(ctx, &addr)?;
        if info.tombstoned {
            tracing::debug!(servicer = %addr, "ignoring evidence against tombstoned servicer");
            return Ok(());
        }

        let fraction = ctx.params().slash_fraction_double_sign;
        self.slash(ctx, &addr, fraction, SlashReason::DoubleSign)?;
        let Some(mut servicer) = self.get_servicer(ctx, &addr)? else {
            // force unstake with cleanup removed the entity and its records
            return Ok(());
        };
        if servicer.status.holds_stake() && !servicer.jailed {
            self.jail(ctx, &mut servicer, SlashReason::DoubleSign)?;
        }

        // slash may have rewritten the record
        if let Some(latest) = self.signing_info(ctx, &addr)? {
            info = latest;
        }
        info.tombstoned = true;
        info.jailed_until = far_future();
        self.set_signing_info(ctx, &info)?;
        tracing::info!(servicer = %addr, height = evidence.height, "servicer tombstoned for double sign");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::StoreBank;
    use crate::testutil::{servicer_fixture, test_context};
    use relaymesh_core::time::sub_ms;

    #[test]
    fn test_slash_amounts() {
        let ppm = Dec::from_ratio(1, 1_000_000).unwrap();
        assert_eq!(slash_amounts(15_000_000_000, ppm), (14_999_985_000, 15_000));
        // the burned side rounds up
        assert_eq!(slash_amounts(1_500_001, ppm), (1_499_999, 2));
        assert_eq!(slash_amounts(100, Dec::ONE), (0, 100));
        assert_eq!(slash_amounts(100, Dec::ZERO), (100, 0));
    }

    #[test]
    fn test_slash_burns_from_pool() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let servicer = servicer_fixture(1, 20_000_000_000);
        manager.stake_fixture(&mut ctx, &servicer);

        let burned = manager
            .slash(&mut ctx, &servicer.address, Dec::from_percent(10), SlashReason::DoubleSign)
            .unwrap();
        assert_eq!(burned, 2_000_000_000);
        let after = manager.servicer(&ctx, &servicer.address).unwrap();
        assert_eq!(after.staked_tokens, 18_000_000_000);
        assert_eq!(
            StoreBank.module_balance(&ctx, modules::STAKED_POOL).unwrap(),
            18_000_000_000
        );
    }

    #[test]
    fn test_slash_below_minimum_forces_unstake() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let servicer = servicer_fixture(1, 15_000_000_000);
        manager.stake_fixture(&mut ctx, &servicer);

        manager
            .slash(&mut ctx, &servicer.address, Dec::from_percent(50), SlashReason::DoubleSign)
            .unwrap();
        let after = manager.servicer(&ctx, &servicer.address).unwrap();
        assert_eq!(after.status, StakeStatus::Unstaked);
        assert_eq!(after.staked_tokens, 0);
        assert_eq!(StoreBank.module_balance(&ctx, modules::STAKED_POOL).unwrap(), 0);
        assert!(manager.staking_set(&ctx).is_empty());
    }

    #[test]
    fn test_force_unstake_twice_is_swallowed() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let servicer = servicer_fixture(1, 15_000_000_000);
        manager.stake_fixture(&mut ctx, &servicer);
        manager.force_unstake(&mut ctx, servicer.clone()).unwrap();
        let unstaked = manager.servicer(&ctx, &servicer.address).unwrap();
        assert!(manager.force_unstake(&mut ctx, unstaked).is_ok());
    }

    #[test]
    fn test_double_sign_tombstones() {
        let mut ctx = test_context(10);
        let manager = StakeManager::new();
        let servicer = servicer_fixture(1, 30_000_000_000);
        manager.stake_fixture(&mut ctx, &servicer);

        let evidence = Evidence {
            address: servicer.address,
            height: 9,
            time: sub_ms(&ctx.block_time(), 1_000),
        };
        manager.handle_double_sign(&mut ctx, &evidence).unwrap();
        let after = manager.servicer(&ctx, &servicer.address).unwrap();
        assert!(after.jailed);
        assert_eq!(after.staked_tokens, 28_500_000_000);
        let info = manager.signing_info(&ctx, &servicer.address).unwrap().unwrap();
        assert!(info.tombstoned);
        assert_eq!(info.jailed_until, far_future());

        // a second piece of evidence is ignored
        manager.handle_double_sign(&mut ctx, &evidence).unwrap();
        assert_eq!(
            manager.servicer(&ctx, &servicer.address).unwrap().staked_tokens,
            28_500_000_000
        );
    }

    #[test]
    fn test_expired_evidence_ignored() {
        let mut ctx = test_context(10);
        let manager = StakeManager::new();
        let servicer = servicer_fixture(1, 30_000_000_000);
        manager.stake_fixture(&mut ctx, &servicer);
        let max_age = ctx.params().max_evidence_age_ms;
        let evidence = Evidence {
            address: servicer.address,
            height: 1,
            time: sub_ms(&ctx.block_time(), max_age + 1),
        };
        manager.handle_double_sign(&mut ctx, &evidence).unwrap();
        assert!(!manager.servicer(&ctx, &servicer.address).unwrap().jailed);
    }
}
