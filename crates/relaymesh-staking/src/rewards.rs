//! # Reward Engine
//!
//! Mints the per-report reward and distributes block fees.
//!
//! ## Per-report split of the gross reward `G`
//!
//! | Cut | Destination | Share of `G` |
//! |-----|-------------|--------------|
//! | servicer | servicer output address | `100 − dao − requestor − proposer − fishermen` |
//! | fee collector | `fee_collector` module | `proposer` |
//! | fisherman | reporting fisherman | `fishermen` |
//! | DAO (no discount key) | `dao` module | `dao + requestor` |
//! | requestor (discount key) | requestor account | `requestor` |
//!
//! `G = round_half_even(token_reward_factor · relays · score_total)` is minted
//! into the `mint` module first. Every cut truncates, and whatever the cuts
//! leave behind stays in `mint`.
//!
//! ## Per-block fee distribution
//!
//! The fee collector balance `F` splits into `F · dao / (dao + proposer)` for
//! the DAO and the remainder for the proposer of the block being closed.

use crate::bank::Bank;
use crate::context::Context;
use crate::entity::StakedEntity;
use crate::keys;
use crate::staking::StakeManager;
use relaymesh_core::error::{Result, StakingError};
use relaymesh_core::events::{Event, EventKind};
use relaymesh_core::math::{mul_div, percent_of, Dec, Rounding};
use relaymesh_core::params::Allocations;
use relaymesh_core::types::{modules, Address};
use serde::{Deserialize, Serialize};

/// Cuts of one gross reward
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSplit {
    pub gross: u128,
    pub servicer: u128,
    pub fee_collector: u128,
    pub dao: u128,
    pub requestor: u128,
    pub fisherman: u128,
}

impl RewardSplit {
    /// Split `gross` by `allocations`; a discount key routes the requestor
    /// allocation back to the requestor instead of the DAO
    pub fn compute(gross: u128, allocations: &Allocations, discount_key: bool) -> Self {
        let (dao, requestor) = if discount_key {
            (0, percent_of(gross, allocations.requestor))
        } else {
            (percent_of(gross, allocations.dao.saturating_add(allocations.requestor)), 0)
        };
        Self {
            gross,
            servicer: percent_of(gross, allocations.servicer()),
            fee_collector: percent_of(gross, allocations.proposer),
            dao,
            requestor,
            fisherman: percent_of(gross, allocations.fishermen),
        }
    }

    /// Sum of all cuts; never exceeds `gross`
    pub fn distributed(&self) -> u128 {
        self.servicer + self.fee_collector + self.dao + self.requestor + self.fisherman
    }

    /// What stays in the mint account
    pub fn residual(&self) -> u128 {
        self.gross.saturating_sub(self.distributed())
    }
}

/// `round_half_even(factor · relays · score)`
pub fn gross_reward(factor: u128, relays: u64, score: Dec) -> Option<u128> {
    let base = factor.checked_mul(u128::from(relays))?;
    score.min_one().mul_int_round(base)
}

/// Fee collector split between the DAO and the block proposer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub dao: u128,
    pub proposer: u128,
}

impl FeeSplit {
    /// `None` when both allocations are zero
    pub fn compute(fees: u128, allocations: &Allocations) -> Option<Self> {
        let denominator = u128::from(allocations.dao) + u128::from(allocations.proposer);
        if denominator == 0 {
            return None;
        }
        let dao = mul_div(fees, u128::from(allocations.dao), denominator, Rounding::Floor)?;
        Some(Self {
            dao,
            proposer: fees - dao,
        })
    }
}

/// Parties paid by one accepted report
pub struct RewardRecipients<'a> {
    pub servicer: &'a Address,
    pub requestor: &'a Address,
    pub fisherman: &'a Address,
}

impl<B: Bank> StakeManager<B> {
    /// Mint and distribute the reward of one accepted report
    pub fn reward_for_report(
        &self,
        ctx: &mut Context,
        recipients: RewardRecipients<'_>,
        relays: u64,
        score: Dec,
    ) -> Result<RewardSplit> {
        let params = ctx.params().clone();
        let gross = gross_reward(params.token_reward_factor, relays, score).ok_or(StakingError::Overflow)?;
        let discount = self.has_discount_key(ctx, recipients.requestor);
        let split = RewardSplit::compute(gross, &params.allocations, discount);
        if gross == 0 {
            return Ok(split);
        }

        let servicer = self.servicer(ctx, recipients.servicer)?;
        let bank = self.bank();
        bank.mint_coins(ctx, modules::MINT, gross)?;
        bank.send_from_module_to_account(ctx, modules::MINT, &servicer.payout_address(), split.servicer)?;
        bank.send_from_module_to_module(ctx, modules::MINT, modules::FEE_COLLECTOR, split.fee_collector)?;
        bank.send_from_module_to_module(ctx, modules::MINT, modules::DAO, split.dao)?;
        bank.send_from_module_to_account(ctx, modules::MINT, recipients.requestor, split.requestor)?;
        bank.send_from_module_to_account(ctx, modules::MINT, recipients.fisherman, split.fisherman)?;

        ctx.emit(
            Event::new(EventKind::Reward, "reports", recipients.fisherman)
                .attr("servicer", recipients.servicer)
                .attr("requestor", recipients.requestor)
                .attr("relays", relays)
                .attr("gross", gross)
                .attr("servicer_cut", split.servicer)
                .attr("dao_cut", split.dao)
                .attr("requestor_cut", split.requestor)
                .attr("discount_key", discount),
        );
        tracing::debug!(
            servicer = %recipients.servicer,
            gross,
            residual = split.residual(),
            discount,
            "report reward minted"
        );

        if params.burn_active && relays > params.max_free_tier_relays_per_session {
            self.burn_requestor_stake(ctx, recipients.requestor, gross)?;
        }
        Ok(split)
    }

    /// Proposer recorded at the start of this block
    pub fn previous_proposer(&self, ctx: &Context) -> Result<Option<Address>> {
        ctx.get(&keys::previous_proposer())
    }

    pub(crate) fn set_previous_proposer(&self, ctx: &mut Context, proposer: &Address) -> Result<()> {
        ctx.set(keys::previous_proposer(), proposer)
    }

    /// Split the fee collector between the DAO and the block proposer
    pub fn distribute_fees(&self, ctx: &mut Context) -> Result<Option<FeeSplit>> {
        let fees = self.bank().module_balance(ctx, modules::FEE_COLLECTOR)?;
        if fees == 0 {
            return Ok(None);
        }
        let Some(proposer) = self.previous_proposer(ctx)? else {
            tracing::warn!(fees, "no proposer recorded, retaining fees");
            return Ok(None);
        };
        let Some(servicer) = self.get_servicer(ctx, &proposer)? else {
            tracing::warn!(proposer = %proposer, fees, "proposer not found, retaining fees");
            return Ok(None);
        };
        let Some(split) = FeeSplit::compute(fees, &ctx.params().allocations) else {
            tracing::warn!(fees, "dao and proposer allocations are zero, retaining fees");
            return Ok(None);
        };

        let bank = self.bank();
        bank.send_from_module_to_module(ctx, modules::FEE_COLLECTOR, modules::DAO, split.dao)?;
        bank.send_from_module_to_account(ctx, modules::FEE_COLLECTOR, &servicer.payout_address(), split.proposer)?;
        ctx.emit(
            Event::new(EventKind::FeeDistribution, "servicers", proposer)
                .attr("fees", fees)
                .attr("dao", split.dao)
                .attr("proposer", split.proposer),
        );
        tracing::debug!(proposer = %proposer, dao = split.dao, proposer_cut = split.proposer, "fees distributed");
        Ok(Some(split))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::StoreBank;
    use crate::testutil::{servicer_fixture, test_context};
    use proptest::prelude::*;

    #[test]
    fn test_split_without_discount_key() {
        let split = RewardSplit::compute(9_000_000, &Allocations::default(), false);
        assert_eq!(split.servicer, 6_750_000);
        assert_eq!(split.dao, 1_350_000);
        assert_eq!(split.fee_collector, 450_000);
        assert_eq!(split.fisherman, 450_000);
        assert_eq!(split.requestor, 0);
        assert_eq!(split.residual(), 0);
    }

    #[test]
    fn test_split_with_discount_key() {
        let split = RewardSplit::compute(9_000_000, &Allocations::default(), true);
        assert_eq!(split.requestor, 450_000);
        assert_eq!(split.dao, 0);
        // the DAO allocation stays in the mint account
        assert_eq!(split.residual(), 900_000);
    }

    #[test]
    fn test_gross_reward_rounding() {
        let score: Dec = "0.9".parse().unwrap();
        assert_eq!(gross_reward(1000, 10_000, score), Some(9_000_000));
        let half: Dec = "0.5".parse().unwrap();
        assert_eq!(gross_reward(1, 5, half), Some(2));
        assert_eq!(gross_reward(1, 7, half), Some(4));
    }

    #[test]
    fn test_fee_split() {
        let split = FeeSplit::compute(1_000, &Allocations::default()).unwrap();
        // dao 10 : proposer 5
        assert_eq!(split.dao, 666);
        assert_eq!(split.proposer, 334);
        let none = Allocations {
            dao: 0,
            proposer: 0,
            ..Allocations::default()
        };
        assert!(FeeSplit::compute(1_000, &none).is_none());
    }

    #[test]
    fn test_distribute_fees_retains_without_proposer() {
        let mut ctx = test_context(2);
        let manager = StakeManager::new();
        StoreBank.mint_coins(&mut ctx, modules::FEE_COLLECTOR, 1_000).unwrap();
        assert!(manager.distribute_fees(&mut ctx).unwrap().is_none());
        assert_eq!(StoreBank.module_balance(&ctx, modules::FEE_COLLECTOR).unwrap(), 1_000);

        let proposer = servicer_fixture(1, 15_000_000_000);
        manager.stake_fixture(&mut ctx, &proposer);
        manager.set_previous_proposer(&mut ctx, &proposer.address).unwrap();
        manager.distribute_fees(&mut ctx).unwrap().unwrap();
        assert_eq!(StoreBank.module_balance(&ctx, modules::FEE_COLLECTOR).unwrap(), 0);
        assert_eq!(StoreBank.balance(&ctx, &proposer.address).unwrap(), 334);
        assert_eq!(StoreBank.module_balance(&ctx, modules::DAO).unwrap(), 666);
    }

    proptest! {
        #[test]
        fn prop_cuts_never_exceed_gross(
            gross in 0u128..1_000_000_000_000_000,
            dao in 0u64..=40,
            requestor in 0u64..=20,
            proposer in 0u64..=20,
            fishermen in 0u64..=20,
            discount in any::<bool>(),
        ) {
            let allocations = Allocations { dao, requestor, proposer, fishermen };
            let split = RewardSplit::compute(gross, &allocations, discount);
            prop_assert!(split.distributed() <= gross);
            prop_assert_eq!(split.residual() + split.distributed(), gross);
            prop_assert!(split.dao == 0 || split.requestor == 0);
        }
    }
}
