//! # Governance State
//!
//! Stored parameter snapshot, upgrade plan, one-shot feature activation,
//! discount keys and the fishermen set.
//!
//! | Feature | Activation side effect |
//! |---------|------------------------|
//! | `STAKE_BINS` | `servicer_stake_bin_width` set to the default when still 0 |
//! | `UNSTAKE_CLEANUP` | none; unstaked entities are deleted from then on |

use crate::bank::Bank;
use crate::context::Context;
use crate::keys;
use crate::staking::StakeManager;
use relaymesh_core::error::Result;
use relaymesh_core::events::{Event, EventKind};
use relaymesh_core::features;
use relaymesh_core::params::{Params, UpgradeState};
use relaymesh_core::types::Address;

impl<B: Bank> StakeManager<B> {
    /// Stored snapshot, or the defaults before genesis wrote one
    pub fn load_params(&self, ctx: &Context) -> Result<Params> {
        Ok(ctx.get(&keys::params())?.unwrap_or_default())
    }

    pub fn store_params(&self, ctx: &mut Context, params: &Params) -> Result<()> {
        ctx.set(keys::params(), params)
    }

    pub fn load_upgrade(&self, ctx: &Context) -> Result<UpgradeState> {
        Ok(ctx.get(&keys::upgrade())?.unwrap_or_default())
    }

    pub fn store_upgrade(&self, ctx: &mut Context, upgrade: &UpgradeState) -> Result<()> {
        ctx.set(keys::upgrade(), upgrade)
    }

    pub fn feature_activated(&self, ctx: &Context, feature: &str) -> bool {
        ctx.has(&keys::activated_feature(feature))
    }

    /// Run the one-shot side effects of features reaching their height
    ///
    /// Writes the stored params; callers reload the snapshot afterwards.
    pub fn activate_features(&self, ctx: &mut Context) -> Result<Vec<String>> {
        let height = ctx.height();
        let due: Vec<String> = ctx
            .upgrade()
            .features
            .iter()
            .filter(|(_, at)| **at <= height)
            .map(|(name, _)| name.clone())
            .collect();

        let mut activated = Vec::new();
        for name in due {
            if self.feature_activated(ctx, &name) {
                continue;
            }
            if name == features::STAKE_BINS {
                let mut params = self.load_params(ctx)?;
                if params.servicer_stake_bin_width == 0 {
                    params.servicer_stake_bin_width = features::DEFAULT_STAKE_BIN_WIDTH;
                    self.store_params(ctx, &params)?;
                }
            }
            ctx.set(keys::activated_feature(&name), &height)?;
            ctx.emit(Event::new(EventKind::FeatureActivated, "gov", "gov").attr("feature", &name));
            tracing::info!(feature = %name, height, "feature activated");
            activated.push(name);
        }
        Ok(activated)
    }

    // ============================================================
    // DISCOUNT KEYS
    // ============================================================

    pub fn has_discount_key(&self, ctx: &Context, requestor: &Address) -> bool {
        ctx.has(&keys::discount_key(requestor))
    }

    pub(crate) fn set_discount_key(&self, ctx: &mut Context, requestor: &Address, issued: bool) -> Result<()> {
        if issued {
            let height = ctx.height();
            ctx.set(keys::discount_key(requestor), &height)
        } else {
            ctx.delete(&keys::discount_key(requestor));
            Ok(())
        }
    }

    pub fn discount_keys(&self, ctx: &Context) -> Vec<Address> {
        let mut it = ctx.iter_prefix(&[keys::DISCOUNT_KEY]);
        let addrs = it.by_ref().filter_map(|(key, _)| keys::trailing_address(&key)).collect();
        it.close();
        addrs
    }

    // ============================================================
    // FISHERMEN
    // ============================================================

    pub fn is_fisherman_member(&self, ctx: &Context, addr: &Address) -> bool {
        ctx.has(&keys::fisherman(addr))
    }

    pub(crate) fn set_fisherman_member(&self, ctx: &mut Context, addr: &Address, enabled: bool) -> Result<()> {
        if enabled {
            let height = ctx.height();
            ctx.set(keys::fisherman(addr), &height)
        } else {
            ctx.delete(&keys::fisherman(addr));
            Ok(())
        }
    }

    pub fn fishermen(&self, ctx: &Context) -> Vec<Address> {
        let mut it = ctx.iter_prefix(&[keys::FISHERMAN]);
        let addrs = it.by_ref().filter_map(|(key, _)| keys::trailing_address(&key)).collect();
        it.close();
        addrs
    }

    /// Member of the fishermen set that is also a staked, non-jailed servicer
    pub fn is_active_fisherman(&self, ctx: &Context, addr: &Address) -> Result<bool> {
        if !self.is_fisherman_member(ctx, addr) {
            return Ok(false);
        }
        Ok(self
            .get_servicer(ctx, addr)?
            .map(|s| s.is_bonded())
            .unwrap_or(false))
    }
}
