//! # Stake Manager and Servicer Registry
//!
//! [`StakeManager`] is the entry point of the state machine. Its methods are
//! split across modules by concern (registry, index, queues, signing,
//! handlers, slashing, rewards, scheduler); this module holds the struct and
//! the servicer registry.
//!
//! ## Registry writes
//!
//! | Status | Staking set | Unstaking queue | Chain / geo index |
//! |--------|-------------|-----------------|-------------------|
//! | Staked, not jailed | yes | no | yes |
//! | Staked, jailed | no | no | yes |
//! | Unstaking | no | yes | yes |
//! | Unstaked | no | no | no |
//!
//! `set_servicer` removes the entries derived from the previous record before
//! inserting the ones derived from the new record, so index and queue always
//! mirror the stored value.

use crate::bank::{Bank, StoreBank};
use crate::cache::Lookup;
use crate::context::Context;
use crate::entity::Servicer;
use crate::keys;
use relaymesh_core::codec::decode_value;
use relaymesh_core::error::{Result, StakingError};
use relaymesh_core::types::{Address, ChainId, GeoZone, StakeStatus};
use serde::{Deserialize, Serialize};

/// Staking state machine over a [`Bank`]
#[derive(Clone, Debug, Default)]
pub struct StakeManager<B: Bank = StoreBank> {
    bank: B,
}

impl StakeManager<StoreBank> {
    /// Create a manager over the store-backed bank
    pub fn new() -> Self {
        Self { bank: StoreBank }
    }
}

/// Filter for paged entity listings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFilter {
    pub status: Option<StakeStatus>,
    pub chain: Option<ChainId>,
    pub geo_zone: Option<GeoZone>,
}

/// One page of results; `page` is 1-based
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub result: Vec<T>,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    /// Slice `items` into the requested page; `per_page == 0` returns everything
    pub fn paginate(items: Vec<T>, page: u64, per_page: u64) -> Self {
        let total = items.len() as u64;
        if per_page == 0 {
            return Self {
                result: items,
                page: 1,
                per_page: total,
                total_pages: 1,
            };
        }
        let page = page.max(1);
        let total_pages = total.div_ceil(per_page).max(1);
        let start = (page - 1).saturating_mul(per_page);
        let result = items
            .into_iter()
            .skip(usize::try_from(start).unwrap_or(usize::MAX))
            .take(usize::try_from(per_page).unwrap_or(usize::MAX))
            .collect();
        Self {
            result,
            page,
            per_page,
            total_pages,
        }
    }
}

impl<B: Bank> StakeManager<B> {
    /// Create a manager over a custom bank
    pub fn with_bank(bank: B) -> Self {
        Self { bank }
    }

    pub fn bank(&self) -> &B {
        &self.bank
    }

    // ============================================================
    // SERVICER REGISTRY
    // ============================================================

    /// Load a servicer, consulting the context cache first
    pub fn get_servicer(&self, ctx: &Context, addr: &Address) -> Result<Option<Servicer>> {
        if let Lookup::Hit(servicer) = ctx.servicer_cache().get(addr) {
            return Ok(Some(servicer));
        }
        let servicer: Option<Servicer> = ctx.get(&keys::servicer(addr))?;
        if let Some(s) = &servicer {
            ctx.servicer_cache().fill(*addr, s.clone());
        }
        Ok(servicer)
    }

    /// Load a servicer that must exist
    pub fn servicer(&self, ctx: &Context, addr: &Address) -> Result<Servicer> {
        self.get_servicer(ctx, addr)?
            .ok_or_else(|| StakingError::EntityNotFound(addr.to_hex()))
    }

    /// Persist a servicer and rebuild every entry derived from it
    pub fn set_servicer(&self, ctx: &mut Context, servicer: &Servicer) -> Result<()> {
        let previous = self.get_servicer(ctx, &servicer.address)?;
        if let Some(prev) = &previous {
            self.remove_servicer_entries(ctx, prev)?;
        }

        ctx.servicer_cache().invalidate(&servicer.address);
        ctx.set(keys::servicer(&servicer.address), servicer)?;
        self.insert_servicer_entries(ctx, servicer)?;

        let was_staked = previous.map(|p| p.status == StakeStatus::Staked).unwrap_or(false);
        let is_staked = servicer.status == StakeStatus::Staked;
        match (was_staked, is_staked) {
            (false, true) => self.adjust_staked_count(ctx, true),
            (true, false) => self.adjust_staked_count(ctx, false),
            _ => Ok(()),
        }
    }

    /// Remove a servicer and everything keyed by its address
    pub fn delete_servicer(&self, ctx: &mut Context, addr: &Address) -> Result<()> {
        let Some(prev) = self.get_servicer(ctx, addr)? else {
            return Ok(());
        };
        self.remove_servicer_entries(ctx, &prev)?;
        ctx.servicer_cache().invalidate(addr);
        ctx.delete(&keys::servicer(addr));
        ctx.delete(&keys::waiting_to_unstake(addr));
        ctx.delete(&keys::signing_info(addr));
        ctx.delete(&keys::missed_blocks(addr));
        ctx.delete(&keys::report_card(addr));
        if prev.status == StakeStatus::Staked {
            self.adjust_staked_count(ctx, false)?;
        }
        tracing::debug!(servicer = %addr, "deleted servicer");
        Ok(())
    }

    fn remove_servicer_entries(&self, ctx: &mut Context, prev: &Servicer) -> Result<()> {
        if prev.is_bonded() {
            self.remove_from_staking_set(ctx, prev);
        }
        if prev.status == StakeStatus::Unstaking {
            if let Some(time) = prev.unstaking_time {
                self.dequeue_unstaking(ctx, keys::SERVICER_UNSTAKING_QUEUE, &time, &prev.address)?;
            }
        }
        for chain in &prev.chains {
            ctx.delete(&keys::by_chain(keys::SERVICER_BY_CHAIN, chain, &prev.address));
        }
        for zone in &prev.geo_zones {
            ctx.delete(&keys::by_geo(keys::SERVICER_BY_GEO, zone, &prev.address));
        }
        Ok(())
    }

    fn insert_servicer_entries(&self, ctx: &mut Context, servicer: &Servicer) -> Result<()> {
        if servicer.is_bonded() {
            self.insert_into_staking_set(ctx, servicer);
        }
        if servicer.status == StakeStatus::Unstaking {
            let time = servicer
                .unstaking_time
                .ok_or_else(|| StakingError::WrongStatus("unstaking servicer without completion time".into()))?;
            self.enqueue_unstaking(ctx, keys::SERVICER_UNSTAKING_QUEUE, &time, &servicer.address)?;
        }
        if servicer.status != StakeStatus::Unstaked {
            for chain in &servicer.chains {
                ctx.store_mut()
                    .set(keys::by_chain(keys::SERVICER_BY_CHAIN, chain, &servicer.address), Vec::new());
            }
            for zone in &servicer.geo_zones {
                ctx.store_mut()
                    .set(keys::by_geo(keys::SERVICER_BY_GEO, zone, &servicer.address), Vec::new());
            }
        }
        Ok(())
    }

    /// Every servicer in address order
    pub fn all_servicers(&self, ctx: &Context) -> Result<Vec<Servicer>> {
        let mut it = ctx.iter_prefix(&[keys::SERVICER]);
        let mut servicers = Vec::new();
        let mut failure = None;
        for (_, value) in it.by_ref() {
            match decode_value::<Servicer>(&value) {
                Ok(s) => servicers.push(s),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        it.close();
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(servicers),
        }
    }

    /// Servicers matching `filter`, paged
    pub fn servicers_filtered(
        &self,
        ctx: &Context,
        filter: &EntityFilter,
        page: u64,
        per_page: u64,
    ) -> Result<Page<Servicer>> {
        let candidates = match &filter.chain {
            Some(chain) => {
                let addrs = self.addresses_by_chain(ctx, keys::SERVICER_BY_CHAIN, chain);
                let mut out = Vec::with_capacity(addrs.len());
                for addr in addrs {
                    if let Some(s) = self.get_servicer(ctx, &addr)? {
                        out.push(s);
                    }
                }
                out
            }
            None => self.all_servicers(ctx)?,
        };
        let matches = candidates
            .into_iter()
            .filter(|s| filter.status.map_or(true, |st| s.status == st))
            .filter(|s| filter.geo_zone.as_ref().map_or(true, |z| s.geo_zones.contains(z)))
            .collect();
        Ok(Page::paginate(matches, page, per_page))
    }

    /// Number of servicers currently in `Staked` status
    pub fn staked_servicer_count(&self, ctx: &Context) -> Result<u64> {
        Ok(ctx.get::<u64>(&keys::staked_servicer_count())?.unwrap_or(0))
    }

    fn adjust_staked_count(&self, ctx: &mut Context, increment: bool) -> Result<()> {
        let count = self.staked_servicer_count(ctx)?;
        let next = if increment {
            count.saturating_add(1)
        } else {
            count.saturating_sub(1)
        };
        ctx.set(keys::staked_servicer_count(), &next)
    }
}
