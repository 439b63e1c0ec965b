//! State invariants
//!
//! Checked after genesis, by the node in debug builds after every block,
//! and by the property tests. The first violation found is returned.

use crate::bank::Bank;
use crate::context::Context;
use crate::entity::{ReportCard, StakedEntity};
use crate::keys;
use crate::staking::StakeManager;
use relaymesh_core::codec::decode_value;
use relaymesh_core::error::StakingError;
use relaymesh_core::math::Dec;
use relaymesh_core::types::{Address, StakeStatus};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    #[error("pool {pool} holds {balance} but entities stake {staked}")]
    PoolMismatch {
        pool: &'static str,
        balance: u128,
        staked: u128,
    },

    #[error("bonded servicer {0} missing from the staking set")]
    MissingIndexEntry(Address),

    #[error("staking set entry {0} does not resolve to a bonded servicer of that power")]
    StaleIndexEntry(Address),

    #[error("{0} queue entry disagrees with entity status or completion time")]
    QueueMismatch(Address),

    #[error("report card of {0} has a score above 1")]
    ScoreOutOfBounds(Address),

    #[error("staked servicer counter is {stored}, registry has {actual}")]
    StakedCount { stored: u64, actual: u64 },

    #[error("state read failed: {0}")]
    Read(#[from] StakingError),
}

type Check = std::result::Result<(), InvariantError>;

/// Queue key of every queued address under `prefix`
fn queued<B: Bank>(manager: &StakeManager<B>, ctx: &Context, prefix: u8) -> Result<BTreeMap<Address, Vec<u8>>, InvariantError> {
    let mut out = BTreeMap::new();
    for (key, addrs) in manager.all_unstaking(ctx, prefix)? {
        for addr in addrs {
            if out.insert(addr, key.clone()).is_some() {
                return Err(InvariantError::QueueMismatch(addr));
            }
        }
    }
    Ok(out)
}

/// Every entity is Unstaking iff it sits in the queue at its completion time
fn check_queue<E: StakedEntity>(entities: &[E], mut queue: BTreeMap<Address, Vec<u8>>, prefix: u8) -> Check {
    for entity in entities {
        let queued_at = queue.remove(&entity.address());
        match (entity.status(), entity.unstaking_time(), queued_at) {
            (StakeStatus::Unstaking, Some(time), Some(key)) if key == keys::unstaking_queue(prefix, &time) => {}
            (StakeStatus::Unstaking, _, _) => return Err(InvariantError::QueueMismatch(entity.address())),
            (_, _, Some(_)) => return Err(InvariantError::QueueMismatch(entity.address())),
            _ => {}
        }
    }
    match queue.into_keys().next() {
        Some(orphan) => Err(InvariantError::QueueMismatch(orphan)),
        None => Ok(()),
    }
}

fn check_pool<E: StakedEntity, B: Bank>(manager: &StakeManager<B>, ctx: &Context, entities: &[E]) -> Check {
    let staked = entities
        .iter()
        .filter(|e| e.status().holds_stake())
        .try_fold(0u128, |sum, e| sum.checked_add(e.staked_tokens()))
        .ok_or(StakingError::Overflow)?;
    let balance = manager.bank().module_balance(ctx, E::pool())?;
    if balance != staked {
        return Err(InvariantError::PoolMismatch {
            pool: E::pool(),
            balance,
            staked,
        });
    }
    Ok(())
}

impl<B: Bank> StakeManager<B> {
    pub fn assert_invariants(&self, ctx: &Context) -> Check {
        let servicers = self.all_servicers(ctx)?;
        let requestors = self.all_requestors(ctx)?;

        check_pool(self, ctx, &servicers)?;
        check_pool(self, ctx, &requestors)?;

        for servicer in &servicers {
            if servicer.is_bonded() && !self.in_staking_set(ctx, servicer) {
                return Err(InvariantError::MissingIndexEntry(servicer.address));
            }
        }
        let by_address: BTreeMap<_, _> = servicers.iter().map(|s| (s.address, s)).collect();
        for (addr, power) in self.staking_set_with_power(ctx) {
            match by_address.get(&addr) {
                Some(s) if s.is_bonded() && s.power() == power => {}
                _ => return Err(InvariantError::StaleIndexEntry(addr)),
            }
        }

        check_queue(&servicers, queued(self, ctx, keys::SERVICER_UNSTAKING_QUEUE)?, keys::SERVICER_UNSTAKING_QUEUE)?;
        check_queue(&requestors, queued(self, ctx, keys::REQUESTOR_UNSTAKING_QUEUE)?, keys::REQUESTOR_UNSTAKING_QUEUE)?;

        let mut it = ctx.iter_prefix(&[keys::REPORT_CARD]);
        let cards: Vec<_> = it.by_ref().collect();
        it.close();
        for (key, value) in cards {
            let card = decode_value::<ReportCard>(&value).map_err(StakingError::from)?;
            if card.latency > Dec::ONE || card.availability > Dec::ONE || card.reliability > Dec::ONE {
                let addr = keys::trailing_address(&key).unwrap_or_default();
                return Err(InvariantError::ScoreOutOfBounds(addr));
            }
        }

        let actual = servicers.iter().filter(|s| s.status == StakeStatus::Staked).count() as u64;
        let stored = self.staked_servicer_count(ctx)?;
        if stored != actual {
            return Err(InvariantError::StakedCount { stored, actual });
        }
        Ok(())
    }
}
