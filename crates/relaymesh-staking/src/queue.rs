//! Unstaking and waiting queues
//!
//! The unstaking queue keys a list of addresses by their exact completion
//! time. The waiting queue holds servicer unstake requests until the next
//! session boundary, keyed by address with the request height as value.

use crate::bank::Bank;
use crate::context::Context;
use crate::keys;
use crate::staking::StakeManager;
use relaymesh_core::codec::decode_value;
use relaymesh_core::error::Result;
use relaymesh_core::time::{time_key, BlockTime};
use relaymesh_core::types::Address;
use relaymesh_storage::prefix_end;

/// Matured queue slot: its store key and the addresses listed under it
pub type QueueSlot = (Vec<u8>, Vec<Address>);

impl<B: Bank> StakeManager<B> {
    /// Addresses listed at exactly `time`
    pub fn unstaking_queue_at(&self, ctx: &Context, prefix: u8, time: &BlockTime) -> Result<Vec<Address>> {
        Ok(ctx
            .get::<Vec<Address>>(&keys::unstaking_queue(prefix, time))?
            .unwrap_or_default())
    }

    pub(crate) fn enqueue_unstaking(
        &self,
        ctx: &mut Context,
        prefix: u8,
        time: &BlockTime,
        addr: &Address,
    ) -> Result<()> {
        let mut slot = self.unstaking_queue_at(ctx, prefix, time)?;
        if !slot.contains(addr) {
            slot.push(*addr);
        }
        ctx.set(keys::unstaking_queue(prefix, time), &slot)
    }

    pub(crate) fn dequeue_unstaking(
        &self,
        ctx: &mut Context,
        prefix: u8,
        time: &BlockTime,
        addr: &Address,
    ) -> Result<()> {
        let key = keys::unstaking_queue(prefix, time);
        let mut slot = self.unstaking_queue_at(ctx, prefix, time)?;
        slot.retain(|a| a != addr);
        if slot.is_empty() {
            ctx.delete(&key);
            Ok(())
        } else {
            ctx.set(key, &slot)
        }
    }

    /// Rewrite a processed slot with the addresses still pending, or drop it
    pub(crate) fn retain_unstaking(&self, ctx: &mut Context, key: Vec<u8>, pending: &[Address]) -> Result<()> {
        if pending.is_empty() {
            ctx.delete(&key);
            Ok(())
        } else {
            ctx.set(key, &pending)
        }
    }

    /// Slots with completion time at or before `now`, oldest first
    pub fn matured_unstaking(&self, ctx: &Context, prefix: u8, now: &BlockTime) -> Result<Vec<QueueSlot>> {
        let start = [prefix];
        // inclusive upper bound: everything strictly below the successor of now's key
        let mut upper = vec![prefix];
        upper.extend_from_slice(&time_key(now));
        let end = prefix_end(&upper);

        let mut it = ctx.iter_range(&start, end.as_deref());
        let mut slots = Vec::new();
        let mut failure = None;
        for (key, value) in it.by_ref() {
            match decode_value::<Vec<Address>>(&value) {
                Ok(addrs) => slots.push((key, addrs)),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        it.close();
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(slots),
        }
    }

    /// Every queued address with its slot key, for invariant checks
    pub fn all_unstaking(&self, ctx: &Context, prefix: u8) -> Result<Vec<QueueSlot>> {
        let mut it = ctx.iter_prefix(&[prefix]);
        let raw: Vec<_> = it.by_ref().collect();
        it.close();
        raw.into_iter()
            .map(|(key, value)| Ok((key, decode_value::<Vec<Address>>(&value)?)))
            .collect()
    }

    // ============================================================
    // WAITING-TO-UNSTAKE
    // ============================================================

    pub(crate) fn set_waiting(&self, ctx: &mut Context, addr: &Address, requested_at: i64) -> Result<()> {
        ctx.set(keys::waiting_to_unstake(addr), &requested_at)
    }

    pub fn is_waiting(&self, ctx: &Context, addr: &Address) -> bool {
        ctx.has(&keys::waiting_to_unstake(addr))
    }

    pub(crate) fn clear_waiting(&self, ctx: &mut Context, addr: &Address) {
        ctx.delete(&keys::waiting_to_unstake(addr));
    }

    /// Waiting entries as `(address, request height)` in address order
    pub fn waiting_entries(&self, ctx: &Context) -> Result<Vec<(Address, i64)>> {
        let mut it = ctx.iter_prefix(&[keys::WAITING_TO_UNSTAKE]);
        let raw: Vec<_> = it.by_ref().collect();
        it.close();
        let mut entries = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            if let Some(addr) = keys::trailing_address(&key) {
                entries.push((addr, decode_value::<i64>(&value)?));
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use crate::keys::SERVICER_UNSTAKING_QUEUE;
    use crate::staking::StakeManager;
    use crate::testutil::test_context;
    use relaymesh_core::time::add_ms;
    use relaymesh_core::types::Address;

    #[test]
    fn test_enqueue_dequeue() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let t = ctx.block_time();
        let a = Address::new([1; 20]);
        let b = Address::new([2; 20]);

        manager.enqueue_unstaking(&mut ctx, SERVICER_UNSTAKING_QUEUE, &t, &a).unwrap();
        manager.enqueue_unstaking(&mut ctx, SERVICER_UNSTAKING_QUEUE, &t, &b).unwrap();
        manager.enqueue_unstaking(&mut ctx, SERVICER_UNSTAKING_QUEUE, &t, &a).unwrap();
        assert_eq!(manager.unstaking_queue_at(&ctx, SERVICER_UNSTAKING_QUEUE, &t).unwrap(), vec![a, b]);

        manager.dequeue_unstaking(&mut ctx, SERVICER_UNSTAKING_QUEUE, &t, &a).unwrap();
        manager.dequeue_unstaking(&mut ctx, SERVICER_UNSTAKING_QUEUE, &t, &b).unwrap();
        assert!(manager.all_unstaking(&ctx, SERVICER_UNSTAKING_QUEUE).unwrap().is_empty());
    }

    #[test]
    fn test_matured_is_inclusive() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let now = ctx.block_time();
        let later = add_ms(&now, 1);
        let a = Address::new([1; 20]);
        let b = Address::new([2; 20]);
        manager.enqueue_unstaking(&mut ctx, SERVICER_UNSTAKING_QUEUE, &now, &a).unwrap();
        manager.enqueue_unstaking(&mut ctx, SERVICER_UNSTAKING_QUEUE, &later, &b).unwrap();

        let matured = manager.matured_unstaking(&ctx, SERVICER_UNSTAKING_QUEUE, &now).unwrap();
        assert_eq!(matured.len(), 1);
        assert_eq!(matured[0].1, vec![a]);
        assert_eq!(ctx.store().open_iterators(), 0);
    }

    #[test]
    fn test_waiting_entries() {
        let mut ctx = test_context(5);
        let manager = StakeManager::new();
        let a = Address::new([9; 20]);
        manager.set_waiting(&mut ctx, &a, 5).unwrap();
        assert!(manager.is_waiting(&ctx, &a));
        assert_eq!(manager.waiting_entries(&ctx).unwrap(), vec![(a, 5)]);
        manager.clear_waiting(&mut ctx, &a);
        assert!(!manager.is_waiting(&ctx, &a));
    }
}
