//! # Block Scheduler
//!
//! Fixed-order begin/end-block steps. The order is consensus-critical: it
//! determines the state hash of every block.
//!
//! ```text
//! BeginBlock                           EndBlock
//! ----------                           --------
//! 1. record proposer                   1. distribute fees to DAO + proposer
//! 2. load params + upgrade snapshot    2. release waiting servicers (session start)
//! 3. activate due features             3. complete matured servicer unstakes
//! 4. double-sign evidence              4. complete matured requestor unstakes
//! 5. liveness signals                  5. validator-set deltas
//! 6. jailed-blocks counter
//! 7. prune report records (session start)
//! ```
//!
//! Per-item steps (evidence, liveness, fees, unstake completions) run in
//! their own branch. A failing item is logged and skipped so one bad record
//! never halts the chain. A staking pool that cannot cover a matured
//! unstake is a broken supply invariant and panics.

use crate::bank::Bank;
use crate::context::Context;
use crate::entity::{Servicer, StakedEntity};
use crate::keys;
use crate::rewards::FeeSplit;
use crate::staking::StakeManager;
use relaymesh_core::codec::decode_value;
use relaymesh_core::error::{Result, StakingError};
use relaymesh_core::events::{Event, EventKind};
use relaymesh_core::features;
use relaymesh_core::time::add_ms;
use relaymesh_core::types::{modules, Address, Evidence, LivenessSignal, PublicKey, StakeStatus, ValidatorUpdate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Consensus power last reported for a validator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPower {
    pub public_key: PublicKey,
    pub power: u64,
}

/// What `end_block` did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndBlockSummary {
    pub fees: Option<FeeSplit>,
    pub released: usize,
    pub completed_servicers: usize,
    pub completed_requestors: usize,
    pub validator_updates: Vec<ValidatorUpdate>,
}

impl<B: Bank> StakeManager<B> {
    /// Run the begin-block steps; returns the features activated at this height
    pub fn begin_block(
        &self,
        ctx: &mut Context,
        signals: &[LivenessSignal],
        evidence: &[Evidence],
    ) -> Result<Vec<String>> {
        let proposer = ctx.header().proposer;
        self.set_previous_proposer(ctx, &proposer)?;

        let params = self.load_params(ctx)?;
        ctx.set_params(params);
        let upgrade = self.load_upgrade(ctx)?;
        ctx.set_upgrade(upgrade);
        let activated = self.activate_features(ctx)?;
        if !activated.is_empty() {
            let params = self.load_params(ctx)?;
            ctx.set_params(params);
        }

        for ev in evidence {
            if let Err(e) = ctx.with_branch(|ctx| self.handle_double_sign(ctx, ev)) {
                tracing::warn!(servicer = %ev.address, error = %e, "evidence handling failed");
            }
        }
        for signal in signals {
            if let Err(e) = ctx.with_branch(|ctx| self.handle_liveness(ctx, signal)) {
                tracing::warn!(servicer = %signal.address, error = %e, "liveness handling failed");
            }
        }
        self.increment_jailed_blocks(ctx)?;

        let height = ctx.height();
        if ctx.params().is_session_start(height) {
            self.prune_report_records(ctx)?;
        }
        Ok(activated)
    }

    /// Run the end-block steps
    pub fn end_block(&self, ctx: &mut Context) -> Result<EndBlockSummary> {
        let mut summary = EndBlockSummary::default();

        match ctx.with_branch(|ctx| self.distribute_fees(ctx)) {
            Ok(fees) => summary.fees = fees,
            Err(e) => tracing::warn!(error = %e, "fee distribution failed, fees retained"),
        }
        if ctx.params().is_session_start(ctx.height()) {
            summary.released = self.release_waiting(ctx)?;
        }
        summary.completed_servicers = self.complete_servicer_unstaking(ctx)?;
        summary.completed_requestors = self.complete_requestor_unstaking(ctx)?;
        summary.validator_updates = self.validator_updates(ctx)?;
        Ok(summary)
    }

    /// Move waiting servicers requested before this height into the unstaking queue
    pub fn release_waiting(&self, ctx: &mut Context) -> Result<usize> {
        let height = ctx.height();
        let completion = add_ms(&ctx.block_time(), ctx.params().unstaking_time_ms);
        let mut released = 0;

        for (addr, requested_at) in self.waiting_entries(ctx)? {
            if requested_at >= height {
                continue;
            }
            self.clear_waiting(ctx, &addr);
            let Some(mut servicer) = self.get_servicer(ctx, &addr)? else {
                tracing::warn!(servicer = %addr, "waiting servicer missing from registry");
                continue;
            };
            if servicer.status != StakeStatus::Staked {
                tracing::warn!(servicer = %addr, status = ?servicer.status, "waiting servicer not staked");
                continue;
            }
            servicer.status = StakeStatus::Unstaking;
            servicer.unstaking_time = Some(completion);
            self.set_servicer(ctx, &servicer)?;
            ctx.emit(
                Event::new(EventKind::BeginUnstake, "servicers", addr)
                    .attr("address", addr)
                    .attr("completion_time", completion.to_rfc3339()),
            );
            tracing::debug!(servicer = %addr, %completion, "servicer unstaking");
            released += 1;
        }
        Ok(released)
    }

    /// Pay out every servicer whose unstaking completed by block time
    pub fn complete_servicer_unstaking(&self, ctx: &mut Context) -> Result<usize> {
        let now = ctx.block_time();
        let mut completed = 0;
        for (key, addrs) in self.matured_unstaking(ctx, keys::SERVICER_UNSTAKING_QUEUE, &now)? {
            let mut failed = Vec::new();
            for addr in addrs {
                let Some(servicer) = self.get_servicer(ctx, &addr)? else {
                    tracing::warn!(servicer = %addr, "queued servicer missing from registry");
                    continue;
                };
                if servicer.status != StakeStatus::Unstaking {
                    tracing::warn!(servicer = %addr, status = ?servicer.status, "queued servicer not unstaking");
                    continue;
                }
                match ctx.with_branch(|ctx| self.finish_unstake(ctx, servicer)) {
                    Ok(()) => completed += 1,
                    Err(e @ StakingError::NotEnoughCoins { .. }) => {
                        panic!("staked pool cannot cover unstaking servicer {addr}: {e}")
                    }
                    Err(e) => {
                        tracing::warn!(servicer = %addr, error = %e, "servicer unstake completion failed, retrying next block");
                        failed.push(addr);
                    }
                }
            }
            self.retain_unstaking(ctx, key, &failed)?;
        }
        Ok(completed)
    }

    fn finish_unstake(&self, ctx: &mut Context, mut servicer: Servicer) -> Result<()> {
        let addr = servicer.address;
        let amount = servicer.staked_tokens;
        let payout = servicer.payout_address();
        self.bank()
            .send_from_module_to_account(ctx, modules::STAKED_POOL, &payout, amount)?;

        servicer.staked_tokens = 0;
        servicer.status = StakeStatus::Unstaked;
        servicer.unstaking_time = None;
        servicer.jailed = false;
        servicer.paused = false;
        servicer.paused_at = None;
        if ctx.is_feature_active(features::UNSTAKE_CLEANUP) {
            self.delete_servicer(ctx, &addr)?;
        } else {
            self.set_servicer(ctx, &servicer)?;
        }
        ctx.emit(
            Event::new(EventKind::CompleteUnstaking, "servicers", addr)
                .attr("address", addr)
                .attr("recipient", payout)
                .attr("amount", amount),
        );
        tracing::info!(servicer = %addr, amount, "servicer unstake completed");
        Ok(())
    }

    /// Last powers reported to consensus, by address
    pub fn last_validator_powers(&self, ctx: &Context) -> Result<BTreeMap<Address, LastPower>> {
        let mut it = ctx.iter_prefix(&[keys::LAST_VALIDATOR_POWER]);
        let raw: Vec<_> = it.by_ref().collect();
        it.close();
        let mut powers = BTreeMap::new();
        for (key, value) in raw {
            if let Some(addr) = keys::trailing_address(&key) {
                powers.insert(addr, decode_value::<LastPower>(&value)?);
            }
        }
        Ok(powers)
    }

    /// Top `max_validators` of the staking set with non-zero consensus power
    pub fn next_validator_set(&self, ctx: &Context) -> Result<BTreeMap<Address, LastPower>> {
        let max = usize::try_from(ctx.params().max_validators).unwrap_or(usize::MAX);
        let mut set = BTreeMap::new();
        for addr in self.staking_set(ctx) {
            if set.len() >= max {
                break;
            }
            let Some(servicer) = self.get_servicer(ctx, &addr)? else {
                tracing::warn!(servicer = %addr, "staking set entry without servicer");
                continue;
            };
            let power = servicer.consensus_power();
            if power == 0 {
                continue;
            }
            set.insert(
                addr,
                LastPower {
                    public_key: servicer.public_key,
                    power,
                },
            );
        }
        Ok(set)
    }

    /// Diff the next validator set against the last reported one and persist it
    ///
    /// Updates come out in address order; removals carry power 0.
    pub fn validator_updates(&self, ctx: &mut Context) -> Result<Vec<ValidatorUpdate>> {
        let previous = self.last_validator_powers(ctx)?;
        let next = self.next_validator_set(ctx)?;
        let mut updates = Vec::new();

        for (addr, last) in &previous {
            if !next.contains_key(addr) {
                ctx.delete(&keys::last_validator_power(addr));
                updates.push((
                    *addr,
                    ValidatorUpdate {
                        public_key: last.public_key.clone(),
                        power: 0,
                    },
                ));
            }
        }
        for (addr, current) in &next {
            if previous.get(addr).map(|p| p.power) == Some(current.power) {
                continue;
            }
            ctx.set(keys::last_validator_power(addr), current)?;
            updates.push((
                *addr,
                ValidatorUpdate {
                    public_key: current.public_key.clone(),
                    power: i64::try_from(current.power).unwrap_or(i64::MAX),
                },
            ));
        }
        updates.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(updates.into_iter().map(|(_, update)| update).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{advance, block_time, servicer_fixture, test_context};

    #[test]
    fn test_waiting_released_at_session_start() {
        let mut ctx = test_context(4);
        let manager = StakeManager::new();
        let servicer = servicer_fixture(1, 15_000_000_000);
        manager.stake_fixture(&mut ctx, &servicer);
        let addr = servicer.address;
        manager.handle_begin_unstake_servicer(&mut ctx, &addr, &addr).unwrap();

        // height 4 is mid-session
        assert_eq!(manager.end_block(&mut ctx).unwrap().released, 0);
        let mut ctx = advance(ctx, 5);
        let summary = manager.end_block(&mut ctx).unwrap();
        assert_eq!(summary.released, 1);

        let unstaking = manager.servicer(&ctx, &addr).unwrap();
        assert_eq!(unstaking.status, StakeStatus::Unstaking);
        let completion = add_ms(&block_time(5), ctx.params().unstaking_time_ms);
        assert_eq!(unstaking.unstaking_time, Some(completion));
        assert!(!manager.is_waiting(&ctx, &addr));
        assert!(!manager.in_staking_set(&ctx, &unstaking));
    }

    #[test]
    fn test_same_height_request_waits_for_next_session() {
        let mut ctx = test_context(5);
        let manager = StakeManager::new();
        let servicer = servicer_fixture(1, 15_000_000_000);
        manager.stake_fixture(&mut ctx, &servicer);
        manager
            .handle_begin_unstake_servicer(&mut ctx, &servicer.address, &servicer.address)
            .unwrap();
        assert_eq!(manager.release_waiting(&mut ctx).unwrap(), 0);
        assert!(manager.is_waiting(&ctx, &servicer.address));
    }

    #[test]
    fn test_matured_servicer_paid_to_output_address() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let mut params = ctx.params().clone();
        params.unstaking_time_ms = 60_000;
        params.session_block_frequency = 1;
        ctx.set_params(params);

        let owner = Address::new([0xee; 20]);
        let mut servicer = servicer_fixture(1, 15_000_000_000);
        servicer.output_address = Some(owner);
        manager.stake_fixture(&mut ctx, &servicer);
        manager
            .handle_begin_unstake_servicer(&mut ctx, &owner, &servicer.address)
            .unwrap();

        let mut ctx = advance(ctx, 2);
        manager.end_block(&mut ctx).unwrap();
        // completion is block_time(2) + 1 minute = block_time(3)
        let mut ctx = advance(ctx, 3);
        let summary = manager.end_block(&mut ctx).unwrap();
        assert_eq!(summary.completed_servicers, 1);
        assert_eq!(manager.bank().balance(&ctx, &owner).unwrap(), 15_000_000_000);
        assert_eq!(manager.bank().module_balance(&ctx, modules::STAKED_POOL).unwrap(), 0);
        let done = manager.servicer(&ctx, &servicer.address).unwrap();
        assert_eq!(done.status, StakeStatus::Unstaked);
        assert_eq!(done.staked_tokens, 0);
        assert!(manager
            .matured_unstaking(&ctx, keys::SERVICER_UNSTAKING_QUEUE, &block_time(3))
            .unwrap()
            .is_empty());
    }

    /// Stake `servicers`, request their unstake at height 1 and release them at 2;
    /// they mature at height 3
    fn unstaking_at_three(manager: &StakeManager, servicers: &[(Servicer, Address)]) -> Context {
        let mut ctx = test_context(1);
        let mut params = ctx.params().clone();
        params.unstaking_time_ms = 60_000;
        params.session_block_frequency = 1;
        ctx.set_params(params);
        for (servicer, signer) in servicers {
            manager.stake_fixture(&mut ctx, servicer);
            manager
                .handle_begin_unstake_servicer(&mut ctx, signer, &servicer.address)
                .unwrap();
        }
        let mut ctx = advance(ctx, 2);
        assert_eq!(manager.end_block(&mut ctx).unwrap().released, servicers.len());
        advance(ctx, 3)
    }

    #[test]
    fn test_failed_completion_does_not_block_others() {
        let manager = StakeManager::new();
        let full = Address::new([0xee; 20]);
        let mut stuck = servicer_fixture(1, 15_000_000_000);
        stuck.output_address = Some(full);
        let free = servicer_fixture(2, 15_000_000_000);
        let mut ctx = unstaking_at_three(&manager, &[(stuck.clone(), full), (free.clone(), free.address)]);
        // crediting the payout address overflows
        manager.bank().force_balance(&mut ctx, &full, u128::MAX);

        let summary = manager.end_block(&mut ctx).unwrap();
        assert_eq!(summary.completed_servicers, 1);
        assert_eq!(manager.bank().balance(&ctx, &free.address).unwrap(), 15_000_000_000);
        assert_eq!(manager.servicer(&ctx, &free.address).unwrap().status, StakeStatus::Unstaked);

        let pending = manager.servicer(&ctx, &stuck.address).unwrap();
        assert_eq!(pending.status, StakeStatus::Unstaking);
        assert_eq!(pending.staked_tokens, 15_000_000_000);
        assert_eq!(
            manager.bank().module_balance(&ctx, modules::STAKED_POOL).unwrap(),
            15_000_000_000
        );
        assert_eq!(
            manager
                .unstaking_queue_at(&ctx, keys::SERVICER_UNSTAKING_QUEUE, &block_time(3))
                .unwrap(),
            vec![stuck.address]
        );

        // retried once the payout address can take the tokens
        manager.bank().force_balance(&mut ctx, &full, 0);
        let mut ctx = advance(ctx, 4);
        assert_eq!(manager.end_block(&mut ctx).unwrap().completed_servicers, 1);
        assert_eq!(manager.bank().balance(&ctx, &full).unwrap(), 15_000_000_000);
        assert!(manager
            .all_unstaking(&ctx, keys::SERVICER_UNSTAKING_QUEUE)
            .unwrap()
            .is_empty());
    }

    #[test]
    #[should_panic(expected = "staked pool cannot cover")]
    fn test_pool_shortfall_at_completion_panics() {
        let manager = StakeManager::new();
        let servicer = servicer_fixture(1, 15_000_000_000);
        let mut ctx = unstaking_at_three(&manager, &[(servicer.clone(), servicer.address)]);
        manager.bank().burn_coins(&mut ctx, modules::STAKED_POOL, 1).unwrap();
        let _ = manager.end_block(&mut ctx);
    }

    #[test]
    fn test_validator_updates_diff() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let a = servicer_fixture(1, 20_000_000_000);
        let b = servicer_fixture(2, 15_000_000_000);
        manager.stake_fixture(&mut ctx, &a);
        manager.stake_fixture(&mut ctx, &b);

        let first = manager.validator_updates(&mut ctx).unwrap();
        assert_eq!(first.len(), 2);
        assert!(manager.validator_updates(&mut ctx).unwrap().is_empty());

        manager.handle_pause_servicer(&mut ctx, &b.address, &b.address).unwrap();
        let updates = manager.validator_updates(&mut ctx).unwrap();
        assert_eq!(
            updates,
            vec![ValidatorUpdate {
                public_key: b.public_key.clone(),
                power: 0
            }]
        );
        assert_eq!(manager.last_validator_powers(&ctx).unwrap().len(), 1);
    }

    #[test]
    fn test_validator_cap_keeps_highest_power() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let mut params = ctx.params().clone();
        params.max_validators = 1;
        ctx.set_params(params);
        let small = servicer_fixture(1, 15_000_000_000);
        let large = servicer_fixture(2, 30_000_000_000);
        manager.stake_fixture(&mut ctx, &small);
        manager.stake_fixture(&mut ctx, &large);

        let set = manager.next_validator_set(&ctx).unwrap();
        assert_eq!(set.keys().copied().collect::<Vec<_>>(), vec![large.address]);
        assert_eq!(set[&large.address].power, 30_000);
    }

    #[test]
    fn test_begin_block_records_proposer_and_loads_params() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let mut stored = ctx.params().clone();
        stored.max_chains = 3;
        manager.store_params(&mut ctx, &stored).unwrap();

        manager.begin_block(&mut ctx, &[], &[]).unwrap();
        assert_eq!(ctx.params().max_chains, 3);
        assert_eq!(manager.previous_proposer(&ctx).unwrap(), Some(Address::default()));
    }

    #[test]
    fn test_liveness_for_unknown_servicer_does_not_abort() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let params = ctx.params().clone();
        manager.store_params(&mut ctx, &params).unwrap();
        let signal = LivenessSignal {
            address: Address::new([4; 20]),
            signed_last_block: false,
        };
        manager.begin_block(&mut ctx, &[signal], &[]).unwrap();
        assert!(manager.signing_info(&ctx, &signal.address).unwrap().is_none());
    }
}
