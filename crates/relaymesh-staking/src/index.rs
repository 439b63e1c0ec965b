//! Staking set index and secondary indices
//!
//! The staking set maps `power ‖ !address` to the address of every staked,
//! non-jailed servicer. Reverse iteration yields the canonical ranking:
//! highest power first, ties broken smaller address first.

use crate::bank::Bank;
use crate::context::Context;
use crate::entity::Servicer;
use crate::keys;
use crate::staking::StakeManager;
use relaymesh_core::types::{Address, ChainId, GeoZone};

impl<B: Bank> StakeManager<B> {
    pub(crate) fn insert_into_staking_set(&self, ctx: &mut Context, servicer: &Servicer) {
        ctx.store_mut().set(
            keys::staking_set(servicer.power(), &servicer.address),
            servicer.address.as_bytes().to_vec(),
        );
    }

    pub(crate) fn remove_from_staking_set(&self, ctx: &mut Context, servicer: &Servicer) {
        ctx.delete(&keys::staking_set(servicer.power(), &servicer.address));
    }

    /// Ranked `(address, power)` pairs of the staking set
    pub fn staking_set_with_power(&self, ctx: &Context) -> Vec<(Address, u64)> {
        let mut it = ctx.iter_prefix_rev(&[keys::STAKING_SET]);
        let mut ranked = Vec::new();
        for (key, _) in it.by_ref() {
            if let (Some(addr), Some(power)) = (
                keys::address_from_staking_set(&key),
                keys::power_from_staking_set(&key),
            ) {
                ranked.push((addr, power));
            }
        }
        it.close();
        ranked
    }

    /// Ranked addresses of the staking set
    pub fn staking_set(&self, ctx: &Context) -> Vec<Address> {
        self.staking_set_with_power(ctx)
            .into_iter()
            .map(|(addr, _)| addr)
            .collect()
    }

    /// Whether `servicer` currently has an index entry
    pub fn in_staking_set(&self, ctx: &Context, servicer: &Servicer) -> bool {
        ctx.has(&keys::staking_set(servicer.power(), &servicer.address))
    }

    /// Addresses indexed under `chain` in address order
    pub fn addresses_by_chain(&self, ctx: &Context, prefix: u8, chain: &ChainId) -> Vec<Address> {
        Self::collect_trailing(ctx, &keys::by_chain_prefix(prefix, chain))
    }

    /// Addresses indexed under `zone` in address order
    pub fn addresses_by_geo(&self, ctx: &Context, prefix: u8, zone: &GeoZone) -> Vec<Address> {
        let mut key_prefix = keys::by_geo(prefix, zone, &Address::default());
        key_prefix.truncate(key_prefix.len() - 20);
        Self::collect_trailing(ctx, &key_prefix)
    }

    fn collect_trailing(ctx: &Context, prefix: &[u8]) -> Vec<Address> {
        let mut it = ctx.iter_prefix(prefix);
        let addrs = it
            .by_ref()
            .filter_map(|(key, _)| keys::trailing_address(&key))
            .collect();
        it.close();
        addrs
    }
}

#[cfg(test)]
mod tests {
    use crate::staking::StakeManager;
    use crate::testutil::{servicer_fixture, test_context};
    use relaymesh_core::types::GeoZone;

    #[test]
    fn test_ranking_order() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let small = servicer_fixture(1, 15_000_000_000);
        let big = servicer_fixture(2, 30_000_000_000);
        let tie = servicer_fixture(3, 15_000_000_000);
        for s in [&small, &big, &tie] {
            manager.set_servicer(&mut ctx, s).unwrap();
        }

        let ranked = manager.staking_set_with_power(&ctx);
        assert_eq!(ranked[0], (big.address, 30_000));
        let (first_tie, second_tie) = if small.address < tie.address {
            (small.address, tie.address)
        } else {
            (tie.address, small.address)
        };
        assert_eq!(ranked[1].0, first_tie);
        assert_eq!(ranked[2].0, second_tie);
    }

    #[test]
    fn test_jailed_servicer_not_indexed() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let mut servicer = servicer_fixture(1, 15_000_000_000);
        manager.set_servicer(&mut ctx, &servicer).unwrap();
        servicer.jailed = true;
        manager.set_servicer(&mut ctx, &servicer).unwrap();
        assert!(!manager.in_staking_set(&ctx, &servicer));
        assert!(manager.staking_set(&ctx).is_empty());
    }

    #[test]
    fn test_geo_index() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let servicer = servicer_fixture(1, 15_000_000_000);
        manager.set_servicer(&mut ctx, &servicer).unwrap();
        let zone = GeoZone::parse("0001", 2).unwrap();
        assert_eq!(
            manager.addresses_by_geo(&ctx, crate::keys::SERVICER_BY_GEO, &zone),
            vec![servicer.address]
        );
    }
}
