//! Governance handlers, signed by the DAO owner

use crate::bank::Bank;
use crate::context::Context;
use crate::staking::StakeManager;
use relaymesh_core::error::{Result, StakingError};
use relaymesh_core::events::{Event, EventKind};
use relaymesh_core::features;
use relaymesh_core::tx::{DaoAction, MsgUpgrade};
use relaymesh_core::types::{modules, Address};

impl<B: Bank> StakeManager<B> {
    fn require_dao(&self, ctx: &Context, signer: &Address) -> Result<()> {
        if *signer != ctx.params().dao_owner {
            return Err(StakingError::UnauthorizedDao);
        }
        Ok(())
    }

    /// Write the next parameter snapshot; it takes effect at the next block
    pub fn handle_change_param(&self, ctx: &mut Context, signer: &Address, key: &str, value: &str) -> Result<()> {
        self.require_dao(ctx, signer)?;
        let next = self.load_params(ctx)?.with_change(key, value)?;
        self.store_params(ctx, &next)?;
        ctx.emit(
            Event::new(EventKind::ParamChange, "gov", signer)
                .attr("key", key)
                .attr("value", value),
        );
        tracing::info!(key, value, "parameter changed");
        Ok(())
    }

    pub fn handle_upgrade(&self, ctx: &mut Context, signer: &Address, msg: &MsgUpgrade) -> Result<()> {
        self.require_dao(ctx, signer)?;
        let height = ctx.height();
        if msg.version.trim().is_empty() {
            return Err(StakingError::InvalidUpgrade("empty version".into()));
        }
        if msg.height <= height {
            return Err(StakingError::InvalidUpgrade(format!(
                "upgrade height {} is not above {height}",
                msg.height
            )));
        }
        for (name, at) in &msg.features {
            if !features::ALL.contains(&name.as_str()) {
                return Err(StakingError::InvalidUpgrade(format!("unknown feature {name}")));
            }
            if *at <= height {
                return Err(StakingError::InvalidUpgrade(format!("feature {name} activates in the past")));
            }
        }

        let mut upgrade = self.load_upgrade(ctx)?;
        upgrade.version = msg.version.clone();
        upgrade.height = msg.height;
        upgrade
            .features
            .extend(msg.features.iter().map(|(name, at)| (name.clone(), *at)));
        self.store_upgrade(ctx, &upgrade)?;
        ctx.emit(
            Event::new(EventKind::Upgrade, "gov", signer)
                .attr("version", &msg.version)
                .attr("height", msg.height),
        );
        tracing::info!(version = %msg.version, height = msg.height, features = msg.features.len(), "upgrade planned");
        Ok(())
    }

    pub fn handle_issue_discount_key(&self, ctx: &mut Context, signer: &Address, requestor: &Address) -> Result<()> {
        self.require_dao(ctx, signer)?;
        self.requestor(ctx, requestor)?;
        self.set_discount_key(ctx, requestor, true)?;
        tracing::info!(requestor = %requestor, "discount key issued");
        Ok(())
    }

    pub fn handle_revoke_discount_key(&self, ctx: &mut Context, signer: &Address, requestor: &Address) -> Result<()> {
        self.require_dao(ctx, signer)?;
        self.set_discount_key(ctx, requestor, false)?;
        tracing::info!(requestor = %requestor, "discount key revoked");
        Ok(())
    }

    pub fn handle_set_fisherman(&self, ctx: &mut Context, signer: &Address, addr: &Address, enabled: bool) -> Result<()> {
        self.require_dao(ctx, signer)?;
        if enabled && !self.is_fisherman_member(ctx, addr) {
            let max = ctx.params().max_fishermen;
            if self.fishermen(ctx).len() as u64 >= max {
                return Err(StakingError::MaxFishermenReached(max));
            }
        }
        self.set_fisherman_member(ctx, addr, enabled)?;
        tracing::info!(fisherman = %addr, enabled, "fisherman membership changed");
        Ok(())
    }

    pub fn handle_dao_transfer(
        &self,
        ctx: &mut Context,
        signer: &Address,
        action: DaoAction,
        to: &Address,
        amount: u128,
    ) -> Result<()> {
        self.require_dao(ctx, signer)?;
        if amount == 0 {
            return Err(StakingError::BadSendAmount);
        }
        match action {
            DaoAction::Transfer => {
                self.bank()
                    .send_from_module_to_account(ctx, modules::DAO, to, amount)?;
                ctx.emit(
                    Event::new(EventKind::Transfer, "gov", modules::DAO)
                        .attr("recipient", to)
                        .attr("amount", amount),
                );
            }
            DaoAction::Burn => {
                self.bank().burn_coins(ctx, modules::DAO, amount)?;
            }
        }
        tracing::info!(action = ?action, amount, "dao funds moved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{requestor_fixture, servicer_fixture, test_context};
    use std::collections::BTreeMap;

    const DAO_OWNER: Address = Address::new([0xda; 20]);

    fn gov_context(height: i64) -> Context {
        let mut ctx = test_context(height);
        let mut params = ctx.params().clone();
        params.dao_owner = DAO_OWNER;
        ctx.set_params(params.clone());
        StakeManager::new().store_params(&mut ctx, &params).unwrap();
        ctx
    }

    #[test]
    fn test_change_param() {
        let mut ctx = gov_context(1);
        let manager = StakeManager::new();
        assert_eq!(
            manager.handle_change_param(&mut ctx, &Address::new([1; 20]), "max_chains", "20"),
            Err(StakingError::UnauthorizedDao)
        );
        manager
            .handle_change_param(&mut ctx, &DAO_OWNER, "max_chains", "20")
            .unwrap();
        assert_eq!(manager.load_params(&ctx).unwrap().max_chains, 20);
        // the running snapshot only changes at the next block
        assert_eq!(ctx.params().max_chains, 15);

        assert!(matches!(
            manager.handle_change_param(&mut ctx, &DAO_OWNER, "max_chains", "0"),
            Err(StakingError::InvalidParam(_))
        ));
        assert!(matches!(
            manager.handle_change_param(&mut ctx, &DAO_OWNER, "no_such_key", "1"),
            Err(StakingError::InvalidParam(_))
        ));
    }

    #[test]
    fn test_upgrade_validation() {
        let mut ctx = gov_context(10);
        let manager = StakeManager::new();
        let plan = |height, feature: &str, at| MsgUpgrade {
            height,
            version: "2.0.0".into(),
            features: BTreeMap::from([(feature.to_string(), at)]),
        };

        assert!(matches!(
            manager.handle_upgrade(&mut ctx, &DAO_OWNER, &plan(10, features::STAKE_BINS, 20)),
            Err(StakingError::InvalidUpgrade(_))
        ));
        assert!(matches!(
            manager.handle_upgrade(&mut ctx, &DAO_OWNER, &plan(20, features::STAKE_BINS, 5)),
            Err(StakingError::InvalidUpgrade(_))
        ));
        assert!(matches!(
            manager.handle_upgrade(&mut ctx, &DAO_OWNER, &plan(20, "WARP_DRIVE", 20)),
            Err(StakingError::InvalidUpgrade(_))
        ));

        manager
            .handle_upgrade(&mut ctx, &DAO_OWNER, &plan(20, features::STAKE_BINS, 20))
            .unwrap();
        manager
            .handle_upgrade(&mut ctx, &DAO_OWNER, &plan(30, features::UNSTAKE_CLEANUP, 30))
            .unwrap();
        let upgrade = manager.load_upgrade(&ctx).unwrap();
        assert_eq!(upgrade.height, 30);
        assert_eq!(upgrade.features.len(), 2);
    }

    #[test]
    fn test_discount_key_requires_requestor() {
        let mut ctx = gov_context(1);
        let manager = StakeManager::new();
        let requestor = requestor_fixture(4, 10_000_000, 100);
        assert!(matches!(
            manager.handle_issue_discount_key(&mut ctx, &DAO_OWNER, &requestor.address),
            Err(StakingError::EntityNotFound(_))
        ));
        manager.stake_requestor_fixture(&mut ctx, &requestor);
        manager
            .handle_issue_discount_key(&mut ctx, &DAO_OWNER, &requestor.address)
            .unwrap();
        assert!(manager.has_discount_key(&ctx, &requestor.address));
        manager
            .handle_revoke_discount_key(&mut ctx, &DAO_OWNER, &requestor.address)
            .unwrap();
        assert!(!manager.has_discount_key(&ctx, &requestor.address));
    }

    #[test]
    fn test_fishermen_cap() {
        let mut ctx = gov_context(1);
        let manager = StakeManager::new();
        let mut params = ctx.params().clone();
        params.max_fishermen = 1;
        ctx.set_params(params);

        let first = servicer_fixture(1, 15_000_000_000);
        manager.stake_fixture(&mut ctx, &first);
        manager
            .handle_set_fisherman(&mut ctx, &DAO_OWNER, &first.address, true)
            .unwrap();
        assert!(manager.is_active_fisherman(&ctx, &first.address).unwrap());
        // re-enabling an existing member does not count against the cap
        manager
            .handle_set_fisherman(&mut ctx, &DAO_OWNER, &first.address, true)
            .unwrap();
        assert_eq!(
            manager.handle_set_fisherman(&mut ctx, &DAO_OWNER, &Address::new([9; 20]), true),
            Err(StakingError::MaxFishermenReached(1))
        );
    }

    #[test]
    fn test_dao_transfer_and_burn() {
        let mut ctx = gov_context(1);
        let manager = StakeManager::new();
        manager.bank().mint_coins(&mut ctx, modules::DAO, 1_000).unwrap();
        let to = Address::new([6; 20]);

        manager
            .handle_dao_transfer(&mut ctx, &DAO_OWNER, DaoAction::Transfer, &to, 400)
            .unwrap();
        manager
            .handle_dao_transfer(&mut ctx, &DAO_OWNER, DaoAction::Burn, &to, 100)
            .unwrap();
        assert_eq!(manager.bank().balance(&ctx, &to).unwrap(), 400);
        assert_eq!(manager.bank().module_balance(&ctx, modules::DAO).unwrap(), 500);
        assert_eq!(manager.bank().total_supply(&ctx).unwrap(), 900);
        assert_eq!(
            manager.handle_dao_transfer(&mut ctx, &DAO_OWNER, DaoAction::Burn, &to, 0),
            Err(StakingError::BadSendAmount)
        );
    }
}
