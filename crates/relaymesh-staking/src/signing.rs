//! Signing-info tracker
//!
//! Each servicer keeps a ring of `signed_blocks_window` bits, one per recent
//! block, set when the block was missed. The missed counter only changes when
//! a slot flips, so it always equals the number of set bits in the ring.

use crate::bank::Bank;
use crate::context::Context;
use crate::keys;
use crate::slashing::SlashReason;
use crate::staking::StakeManager;
use bitvec::prelude::*;
use relaymesh_core::error::Result;
use relaymesh_core::time::{add_ms, BlockTime};
use relaymesh_core::types::{Address, LivenessSignal, StakeStatus};
use serde::{Deserialize, Serialize};

/// Missed-block ring of one servicer
pub type MissedRing = BitVec<u8, Lsb0>;

/// Liveness record of one servicer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningInfo {
    pub address: Address,
    /// Height at which tracking began
    pub start_height: i64,
    /// Monotonic slot counter; the ring slot is `index_offset % window`
    pub index_offset: u64,
    /// Earliest time an unjail is accepted
    pub jailed_until: BlockTime,
    /// Double-signers are tombstoned and can never unjail
    pub tombstoned: bool,
    pub missed_blocks_counter: u64,
    /// Blocks spent jailed since the last unjail
    pub jailed_blocks_counter: u64,
}

impl SigningInfo {
    pub fn new(address: Address, start_height: i64) -> Self {
        Self {
            address,
            start_height,
            index_offset: 0,
            jailed_until: BlockTime::default(),
            tombstoned: false,
            missed_blocks_counter: 0,
            jailed_blocks_counter: 0,
        }
    }
}

impl<B: Bank> StakeManager<B> {
    pub fn signing_info(&self, ctx: &Context, addr: &Address) -> Result<Option<SigningInfo>> {
        ctx.get(&keys::signing_info(addr))
    }

    pub(crate) fn signing_info_or_new(&self, ctx: &Context, addr: &Address) -> Result<SigningInfo> {
        Ok(self
            .signing_info(ctx, addr)?
            .unwrap_or_else(|| SigningInfo::new(*addr, ctx.height())))
    }

    pub fn set_signing_info(&self, ctx: &mut Context, info: &SigningInfo) -> Result<()> {
        ctx.set(keys::signing_info(&info.address), info)
    }

    /// Ring sized to the current window; a window change starts a fresh ring
    pub fn missed_ring(&self, ctx: &Context, addr: &Address) -> Result<MissedRing> {
        let window = ctx.params().signed_blocks_window as usize;
        match ctx.get::<MissedRing>(&keys::missed_blocks(addr))? {
            Some(ring) if ring.len() == window => Ok(ring),
            _ => Ok(bitvec![u8, Lsb0; 0; window]),
        }
    }

    fn set_missed_ring(&self, ctx: &mut Context, addr: &Address, ring: &MissedRing) -> Result<()> {
        ctx.set(keys::missed_blocks(addr), ring)
    }

    /// Clear the ring and counters after an unjail or a forced unstake
    pub(crate) fn reset_liveness(&self, ctx: &mut Context, addr: &Address) -> Result<()> {
        ctx.delete(&keys::missed_blocks(addr));
        if let Some(mut info) = self.signing_info(ctx, addr)? {
            info.missed_blocks_counter = 0;
            info.jailed_blocks_counter = 0;
            info.index_offset = 0;
            self.set_signing_info(ctx, &info)?;
        }
        Ok(())
    }

    /// Apply one liveness bit; jails and slashes on downtime
    pub fn handle_liveness(&self, ctx: &mut Context, signal: &LivenessSignal) -> Result<()> {
        let addr = signal.address;
        let Some(servicer) = self.get_servicer(ctx, &addr)? else {
            tracing::warn!(servicer = %addr, "liveness signal for unknown servicer");
            return Ok(());
        };
        if servicer.status != StakeStatus::Staked || servicer.jailed {
            return Ok(());
        }

        let window = ctx.params().signed_blocks_window;
        let max_missed = ctx.params().max_missed_blocks();
        let mut info = self.signing_info_or_new(ctx, &addr)?;
        let mut ring = self.missed_ring(ctx, &addr)?;
        if ring.count_ones() as u64 != info.missed_blocks_counter {
            info.missed_blocks_counter = ring.count_ones() as u64;
        }

        let slot = (info.index_offset % window) as usize;
        info.index_offset = info.index_offset.wrapping_add(1);
        let previously_missed = ring[slot];
        let missed = !signal.signed_last_block;
        match (previously_missed, missed) {
            (false, true) => info.missed_blocks_counter += 1,
            (true, false) => info.missed_blocks_counter = info.missed_blocks_counter.saturating_sub(1),
            _ => {}
        }
        ring.set(slot, missed);

        if missed {
            tracing::debug!(
                servicer = %addr,
                missed = info.missed_blocks_counter,
                threshold = max_missed,
                "missed block"
            );
        }

        let downtime = info.missed_blocks_counter > max_missed;
        self.set_signing_info(ctx, &info)?;
        self.set_missed_ring(ctx, &addr, &ring)?;

        if downtime {
            let fraction = ctx.params().slash_fraction_downtime;
            self.slash(ctx, &addr, fraction, SlashReason::Downtime)?;
            if let Some(mut after) = self.get_servicer(ctx, &addr)? {
                if after.status == StakeStatus::Staked && !after.jailed {
                    let until = add_ms(&ctx.block_time(), ctx.params().downtime_jail_duration_ms);
                    self.jail(ctx, &mut after, SlashReason::Downtime)?;
                    let mut info = self.signing_info_or_new(ctx, &addr)?;
                    info.jailed_until = until;
                    self.set_signing_info(ctx, &info)?;
                    tracing::info!(servicer = %addr, jailed_until = %until, "servicer jailed for downtime");
                }
            }
        }
        Ok(())
    }

    /// Count another jailed block for every jailed servicer; force-unstake
    /// those jailed longer than `max_jailed_blocks`
    pub fn increment_jailed_blocks(&self, ctx: &mut Context) -> Result<()> {
        let max_jailed = ctx.params().max_jailed_blocks;
        let jailed: Vec<_> = self
            .all_servicers(ctx)?
            .into_iter()
            .filter(|s| s.jailed && s.status == StakeStatus::Staked)
            .collect();

        for servicer in jailed {
            let mut info = self.signing_info_or_new(ctx, &servicer.address)?;
            info.jailed_blocks_counter = info.jailed_blocks_counter.saturating_add(1);
            self.set_signing_info(ctx, &info)?;
            if max_jailed > 0 && info.jailed_blocks_counter > max_jailed {
                tracing::info!(
                    servicer = %servicer.address,
                    jailed_blocks = info.jailed_blocks_counter,
                    "jailed too long, forcing unstake"
                );
                self.force_unstake(ctx, servicer)?;
            }
        }
        Ok(())
    }
}
