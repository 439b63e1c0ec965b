//! # Requestor Registry
//!
//! Requestors mirror the servicer registry without jail, pause or the
//! waiting queue: a begin-unstake goes straight into the requestor
//! unstaking queue. Their relay credit (`max_relays`) is recomputed on
//! every accepted stake change:
//!
//! ```text
//! max_relays = floor(p · stake) · baseline_rate / 10^8 + stability_modulation
//! p          = (servicer pool + requestor pool) / total supply   (participation on)
//!            = 1                                                 (participation off)
//! ```

use crate::bank::Bank;
use crate::cache::Lookup;
use crate::context::Context;
use crate::entity::Requestor;
use crate::keys;
use crate::staking::{EntityFilter, Page, StakeManager};
use relaymesh_core::codec::decode_value;
use relaymesh_core::error::{Result, StakingError};
use relaymesh_core::events::{Event, EventKind};
use relaymesh_core::features;
use relaymesh_core::math::{mul_div, Dec, Rounding};
use relaymesh_core::types::{modules, Address, StakeStatus};

/// Divisor turning `stake · baseline_rate` into relays: 10^6 power units times 100 percent
const RELAY_SCALE: u128 = 100_000_000;

impl<B: Bank> StakeManager<B> {
    pub fn get_requestor(&self, ctx: &Context, addr: &Address) -> Result<Option<Requestor>> {
        if let Lookup::Hit(requestor) = ctx.requestor_cache().get(addr) {
            return Ok(Some(requestor));
        }
        let requestor: Option<Requestor> = ctx.get(&keys::requestor(addr))?;
        if let Some(r) = &requestor {
            ctx.requestor_cache().fill(*addr, r.clone());
        }
        Ok(requestor)
    }

    pub fn requestor(&self, ctx: &Context, addr: &Address) -> Result<Requestor> {
        self.get_requestor(ctx, addr)?
            .ok_or_else(|| StakingError::EntityNotFound(addr.to_hex()))
    }

    /// Persist a requestor and rebuild its queue and index entries
    pub fn set_requestor(&self, ctx: &mut Context, requestor: &Requestor) -> Result<()> {
        if let Some(prev) = self.get_requestor(ctx, &requestor.address)? {
            self.remove_requestor_entries(ctx, &prev)?;
        }
        ctx.requestor_cache().invalidate(&requestor.address);
        ctx.set(keys::requestor(&requestor.address), requestor)?;

        if requestor.status == StakeStatus::Unstaking {
            let time = requestor
                .unstaking_time
                .ok_or_else(|| StakingError::WrongStatus("unstaking requestor without completion time".into()))?;
            self.enqueue_unstaking(ctx, keys::REQUESTOR_UNSTAKING_QUEUE, &time, &requestor.address)?;
        }
        if requestor.status != StakeStatus::Unstaked {
            for chain in &requestor.chains {
                ctx.store_mut()
                    .set(keys::by_chain(keys::REQUESTOR_BY_CHAIN, chain, &requestor.address), Vec::new());
            }
            for zone in &requestor.geo_zones {
                ctx.store_mut()
                    .set(keys::by_geo(keys::REQUESTOR_BY_GEO, zone, &requestor.address), Vec::new());
            }
        }
        Ok(())
    }

    pub fn delete_requestor(&self, ctx: &mut Context, addr: &Address) -> Result<()> {
        let Some(prev) = self.get_requestor(ctx, addr)? else {
            return Ok(());
        };
        self.remove_requestor_entries(ctx, &prev)?;
        ctx.requestor_cache().invalidate(addr);
        ctx.delete(&keys::requestor(addr));
        ctx.delete(&keys::discount_key(addr));
        tracing::debug!(requestor = %addr, "deleted requestor");
        Ok(())
    }

    fn remove_requestor_entries(&self, ctx: &mut Context, prev: &Requestor) -> Result<()> {
        if prev.status == StakeStatus::Unstaking {
            if let Some(time) = prev.unstaking_time {
                self.dequeue_unstaking(ctx, keys::REQUESTOR_UNSTAKING_QUEUE, &time, &prev.address)?;
            }
        }
        for chain in &prev.chains {
            ctx.delete(&keys::by_chain(keys::REQUESTOR_BY_CHAIN, chain, &prev.address));
        }
        for zone in &prev.geo_zones {
            ctx.delete(&keys::by_geo(keys::REQUESTOR_BY_GEO, zone, &prev.address));
        }
        Ok(())
    }

    pub fn all_requestors(&self, ctx: &Context) -> Result<Vec<Requestor>> {
        let mut it = ctx.iter_prefix(&[keys::REQUESTOR]);
        let raw: Vec<_> = it.by_ref().collect();
        it.close();
        raw.into_iter()
            .map(|(_, value)| Ok(decode_value::<Requestor>(&value)?))
            .collect()
    }

    pub fn requestors_filtered(
        &self,
        ctx: &Context,
        filter: &EntityFilter,
        page: u64,
        per_page: u64,
    ) -> Result<Page<Requestor>> {
        let candidates = match &filter.chain {
            Some(chain) => {
                let mut out = Vec::new();
                for addr in self.addresses_by_chain(ctx, keys::REQUESTOR_BY_CHAIN, chain) {
                    if let Some(r) = self.get_requestor(ctx, &addr)? {
                        out.push(r);
                    }
                }
                out
            }
            None => self.all_requestors(ctx)?,
        };
        let matches = candidates
            .into_iter()
            .filter(|r| filter.status.map_or(true, |st| r.status == st))
            .filter(|r| filter.geo_zone.as_ref().map_or(true, |z| r.geo_zones.contains(z)))
            .collect();
        Ok(Page::paginate(matches, page, per_page))
    }

    /// Share of the supply currently escrowed in either staked pool
    pub fn participation_rate(&self, ctx: &Context) -> Result<Dec> {
        if !ctx.params().participation_rate_on {
            return Ok(Dec::ONE);
        }
        let staked = self
            .bank()
            .module_balance(ctx, modules::STAKED_POOL)?
            .saturating_add(self.bank().module_balance(ctx, modules::REQUESTOR_STAKED_POOL)?);
        let supply = self.bank().total_supply(ctx)?;
        if supply == 0 {
            return Ok(Dec::ONE);
        }
        Ok(Dec::from_ratio(staked, supply).unwrap_or(Dec::ONE).min_one())
    }

    /// Relay credit per session for a requestor staking `stake`
    pub fn compute_max_relays(&self, ctx: &Context, stake: u128) -> Result<u64> {
        let rate = self.participation_rate(ctx)?;
        let params = ctx.params();
        let weighted = rate.mul_int_floor(stake).ok_or(StakingError::Overflow)?;
        let base = mul_div(
            weighted,
            u128::from(params.baseline_throughput_stake_rate),
            RELAY_SCALE,
            Rounding::Floor,
        )
        .ok_or(StakingError::Overflow)?;
        let base = i128::try_from(base).unwrap_or(i128::MAX);
        let relays = base.saturating_add(i128::from(params.stability_modulation));
        Ok(relays.clamp(0, i128::from(u64::MAX)) as u64)
    }

    /// Immediately unstake a requestor, burning its remaining stake
    pub fn force_unstake_requestor(&self, ctx: &mut Context, mut requestor: Requestor) -> Result<()> {
        let addr = requestor.address;
        if requestor.status == StakeStatus::Unstaked {
            tracing::warn!(requestor = %addr, "forced unstake on already unstaked requestor");
            return Ok(());
        }
        let burned = requestor.staked_tokens;
        self.bank().burn_coins(ctx, modules::REQUESTOR_STAKED_POOL, burned)?;
        requestor.staked_tokens = 0;
        requestor.max_relays = 0;
        requestor.status = StakeStatus::Unstaked;
        requestor.unstaking_time = None;
        if ctx.is_feature_active(features::UNSTAKE_CLEANUP) {
            self.delete_requestor(ctx, &addr)?;
        } else {
            self.set_requestor(ctx, &requestor)?;
        }
        ctx.emit(
            Event::new(EventKind::CompleteUnstaking, "requestors", addr)
                .attr("address", addr)
                .attr("forced", true)
                .attr("burned", burned),
        );
        tracing::info!(requestor = %addr, burned, "requestor force unstaked");
        Ok(())
    }

    /// Burn `amount` from a requestor's stake, force-unstaking below the minimum
    pub fn burn_requestor_stake(&self, ctx: &mut Context, addr: &Address, amount: u128) -> Result<u128> {
        let mut requestor = self.requestor(ctx, addr)?;
        if !requestor.status.holds_stake() {
            return Ok(0);
        }
        let burned = amount.min(requestor.staked_tokens);
        self.bank().burn_coins(ctx, modules::REQUESTOR_STAKED_POOL, burned)?;
        requestor.staked_tokens -= burned;
        if requestor.staked_tokens < ctx.params().requestor_minimum_stake {
            self.force_unstake_requestor(ctx, requestor)?;
        } else {
            requestor.max_relays = self.compute_max_relays(ctx, requestor.staked_tokens)?;
            self.set_requestor(ctx, &requestor)?;
        }
        tracing::debug!(requestor = %addr, burned, "burned requestor stake for relays");
        Ok(burned)
    }

    /// Finalize every requestor whose unstaking completed by block time
    pub fn complete_requestor_unstaking(&self, ctx: &mut Context) -> Result<usize> {
        let now = ctx.block_time();
        let mut completed = 0;
        for (key, addrs) in self.matured_unstaking(ctx, keys::REQUESTOR_UNSTAKING_QUEUE, &now)? {
            let mut failed = Vec::new();
            for addr in addrs {
                let Some(requestor) = self.get_requestor(ctx, &addr)? else {
                    tracing::warn!(requestor = %addr, "queued requestor missing from registry");
                    continue;
                };
                if requestor.status != StakeStatus::Unstaking {
                    tracing::warn!(requestor = %addr, status = ?requestor.status, "queued requestor not unstaking");
                    continue;
                }
                match ctx.with_branch(|ctx| self.finish_requestor_unstake(ctx, requestor)) {
                    Ok(()) => completed += 1,
                    Err(e @ StakingError::NotEnoughCoins { .. }) => {
                        panic!("requestor pool cannot cover unstaking requestor {addr}: {e}")
                    }
                    Err(e) => {
                        tracing::warn!(requestor = %addr, error = %e, "requestor unstake completion failed, retrying next block");
                        failed.push(addr);
                    }
                }
            }
            self.retain_unstaking(ctx, key, &failed)?;
        }
        Ok(completed)
    }

    fn finish_requestor_unstake(&self, ctx: &mut Context, mut requestor: Requestor) -> Result<()> {
        let addr = requestor.address;
        let amount = requestor.staked_tokens;
        self.bank()
            .send_from_module_to_account(ctx, modules::REQUESTOR_STAKED_POOL, &addr, amount)?;
        requestor.staked_tokens = 0;
        requestor.max_relays = 0;
        requestor.status = StakeStatus::Unstaked;
        requestor.unstaking_time = None;
        if ctx.is_feature_active(features::UNSTAKE_CLEANUP) {
            self.delete_requestor(ctx, &addr)?;
        } else {
            self.set_requestor(ctx, &requestor)?;
        }
        ctx.emit(
            Event::new(EventKind::CompleteUnstaking, "requestors", addr)
                .attr("address", addr)
                .attr("amount", amount),
        );
        tracing::info!(requestor = %addr, amount, "requestor unstake completed");
        Ok(())
    }
}
