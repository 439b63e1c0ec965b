//! Account collaborator
//!
//! The staking core moves tokens only through the [`Bank`] trait. Module
//! accounts (staked pools, fee collector, DAO, mint) are ordinary balances
//! at addresses derived from the module name. [`StoreBank`] keeps balances
//! and total supply in the same store as the staking state.

use crate::context::Context;
use crate::keys;
use relaymesh_core::error::{Result, StakingError};
use relaymesh_core::types::Address;
use serde::{Deserialize, Serialize};

/// Balance and supply operations in the staking denomination
pub trait Bank {
    fn balance(&self, ctx: &Context, addr: &Address) -> Result<u128>;

    fn total_supply(&self, ctx: &Context) -> Result<u128>;

    fn send_coins(&self, ctx: &mut Context, from: &Address, to: &Address, amount: u128) -> Result<()>;

    /// Create `amount` new tokens in a module account
    fn mint_coins(&self, ctx: &mut Context, module: &str, amount: u128) -> Result<()>;

    /// Destroy `amount` tokens held by a module account
    fn burn_coins(&self, ctx: &mut Context, module: &str, amount: u128) -> Result<()>;

    fn module_balance(&self, ctx: &Context, module: &str) -> Result<u128> {
        self.balance(ctx, &Address::for_module(module))
    }

    fn has_coins(&self, ctx: &Context, addr: &Address, amount: u128) -> Result<bool> {
        Ok(self.balance(ctx, addr)? >= amount)
    }

    fn send_from_module_to_account(&self, ctx: &mut Context, module: &str, to: &Address, amount: u128) -> Result<()> {
        self.send_coins(ctx, &Address::for_module(module), to, amount)
    }

    fn send_from_account_to_module(&self, ctx: &mut Context, from: &Address, module: &str, amount: u128) -> Result<()> {
        self.send_coins(ctx, from, &Address::for_module(module), amount)
    }

    fn send_from_module_to_module(&self, ctx: &mut Context, from: &str, to: &str, amount: u128) -> Result<()> {
        self.send_coins(ctx, &Address::for_module(from), &Address::for_module(to), amount)
    }
}

/// Store-backed balance in the staking denomination
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Amount(#[serde(with = "relaymesh_core::types::amount_string")] u128);

/// [`Bank`] implementation over the staking store
#[derive(Clone, Copy, Debug, Default)]
pub struct StoreBank;

impl StoreBank {
    fn read(&self, ctx: &Context, key: &[u8]) -> Result<u128> {
        Ok(ctx.get::<Amount>(key)?.unwrap_or_default().0)
    }

    fn write(&self, ctx: &mut Context, key: Vec<u8>, amount: u128) -> Result<()> {
        if amount == 0 {
            ctx.delete(&key);
            Ok(())
        } else {
            ctx.set(key, &Amount(amount))
        }
    }

    fn adjust_supply(&self, ctx: &mut Context, increase: bool, amount: u128) -> Result<()> {
        let key = keys::supply(&ctx.params().stake_denom);
        let supply = self.read(ctx, &key)?;
        let next = if increase {
            supply.checked_add(amount).ok_or(StakingError::Overflow)?
        } else {
            supply.checked_sub(amount).ok_or(StakingError::Overflow)?
        };
        self.write(ctx, key, next)
    }
}

impl Bank for StoreBank {
    fn balance(&self, ctx: &Context, addr: &Address) -> Result<u128> {
        self.read(ctx, &keys::balance(addr, &ctx.params().stake_denom))
    }

    fn total_supply(&self, ctx: &Context) -> Result<u128> {
        self.read(ctx, &keys::supply(&ctx.params().stake_denom))
    }

    fn send_coins(&self, ctx: &mut Context, from: &Address, to: &Address, amount: u128) -> Result<()> {
        if amount == 0 || from == to {
            return Ok(());
        }
        let denom = ctx.params().stake_denom.clone();
        let from_key = keys::balance(from, &denom);
        let available = self.read(ctx, &from_key)?;
        let remaining = available.checked_sub(amount).ok_or(StakingError::NotEnoughCoins {
            needed: amount,
            available,
        })?;
        self.write(ctx, from_key, remaining)?;

        let to_key = keys::balance(to, &denom);
        let credited = self
            .read(ctx, &to_key)?
            .checked_add(amount)
            .ok_or(StakingError::Overflow)?;
        self.write(ctx, to_key, credited)
    }

    fn mint_coins(&self, ctx: &mut Context, module: &str, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let key = keys::balance(&Address::for_module(module), &ctx.params().stake_denom);
        let balance = self.read(ctx, &key)?.checked_add(amount).ok_or(StakingError::Overflow)?;
        self.write(ctx, key, balance)?;
        self.adjust_supply(ctx, true, amount)
    }

    fn burn_coins(&self, ctx: &mut Context, module: &str, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let key = keys::balance(&Address::for_module(module), &ctx.params().stake_denom);
        let available = self.read(ctx, &key)?;
        let balance = available.checked_sub(amount).ok_or(StakingError::NotEnoughCoins {
            needed: amount,
            available,
        })?;
        self.write(ctx, key, balance)?;
        self.adjust_supply(ctx, false, amount)
    }
}

#[cfg(test)]
impl StoreBank {
    /// Overwrite a balance without touching total supply
    pub(crate) fn force_balance(&self, ctx: &mut Context, addr: &Address, amount: u128) {
        let key = keys::balance(addr, &ctx.params().stake_denom);
        self.write(ctx, key, amount).unwrap();
    }
}
