//! Genesis import and export
//!
//! `init_genesis` seeds a fresh store and returns the initial validator set;
//! `export_genesis` reads the same shape back out. Missed-block rings are not
//! carried: liveness tracking restarts from an empty window.

use crate::bank::Bank;
use crate::context::Context;
use crate::entity::{ReportCard, Requestor, Servicer};
use crate::keys;
use crate::signing::SigningInfo;
use crate::staking::StakeManager;
use relaymesh_core::codec::decode_value;
use relaymesh_core::error::{Result, StakingError};
use relaymesh_core::params::{Params, UpgradeState};
use relaymesh_core::types::{amount_string, modules, Address, ValidatorUpdate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Liquid balance of an account at genesis
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: Address,

    /// Balance in the staking denomination
    #[serde(with = "amount_string")]
    pub amount: u128,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisReportCard {
    pub address: Address,
    pub card: ReportCard,
}

/// Servicer waiting for the next session start to begin unstaking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisWaiting {
    pub address: Address,
    pub requested_at: i64,
}

/// Complete staking state at a height
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisState {
    /// Parameter snapshot in force from the first block
    pub params: Params,

    /// Planned upgrade and feature activation heights
    #[serde(default)]
    pub upgrade: UpgradeState,

    /// Features whose one-shot activation already ran, with their height
    #[serde(default)]
    pub activated_features: BTreeMap<String, i64>,

    /// Liquid balances; staked pools are derived from the entities
    #[serde(default)]
    pub accounts: Vec<GenesisAccount>,

    #[serde(default)]
    pub servicers: Vec<Servicer>,

    #[serde(default)]
    pub requestors: Vec<Requestor>,

    /// Liveness records; servicers without one start tracking at genesis
    #[serde(default)]
    pub signing_infos: Vec<SigningInfo>,

    #[serde(default)]
    pub report_cards: Vec<GenesisReportCard>,

    #[serde(default)]
    pub fishermen: Vec<Address>,

    #[serde(default)]
    pub discount_keys: Vec<Address>,

    #[serde(default)]
    pub waiting: Vec<GenesisWaiting>,
}

fn reject_duplicates<'a>(kind: &str, addrs: impl Iterator<Item = &'a Address>) -> Result<()> {
    let mut seen = BTreeSet::new();
    for addr in addrs {
        if !seen.insert(*addr) {
            return Err(StakingError::InvalidParam(format!("genesis: duplicate {kind} {addr}")));
        }
    }
    Ok(())
}

impl GenesisState {
    /// Structural checks that need no store access
    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        reject_duplicates("account", self.accounts.iter().map(|a| &a.address))?;
        reject_duplicates("servicer", self.servicers.iter().map(|s| &s.address))?;
        reject_duplicates("requestor", self.requestors.iter().map(|r| &r.address))?;
        reject_duplicates("signing info", self.signing_infos.iter().map(|i| &i.address))?;
        reject_duplicates("report card", self.report_cards.iter().map(|c| &c.address))?;

        for servicer in &self.servicers {
            if servicer.public_key.address() != servicer.address {
                return Err(StakingError::InvalidParam(format!(
                    "genesis: servicer {} does not match its public key",
                    servicer.address
                )));
            }
        }
        for requestor in &self.requestors {
            if requestor.public_key.address() != requestor.address {
                return Err(StakingError::InvalidParam(format!(
                    "genesis: requestor {} does not match its public key",
                    requestor.address
                )));
            }
        }
        let servicers: BTreeSet<_> = self.servicers.iter().map(|s| s.address).collect();
        if let Some(orphan) = self.waiting.iter().find(|w| !servicers.contains(&w.address)) {
            return Err(StakingError::InvalidParam(format!(
                "genesis: waiting entry {} has no servicer",
                orphan.address
            )));
        }
        Ok(())
    }
}

impl<B: Bank> StakeManager<B> {
    /// Seed an empty store from `genesis`
    ///
    /// Returns the initial validator set.
    pub fn init_genesis(&self, ctx: &mut Context, genesis: &GenesisState) -> Result<Vec<ValidatorUpdate>> {
        genesis.validate()?;

        self.store_params(ctx, &genesis.params)?;
        ctx.set_params(genesis.params.clone());
        self.store_upgrade(ctx, &genesis.upgrade)?;
        ctx.set_upgrade(genesis.upgrade.clone());
        for (name, height) in &genesis.activated_features {
            ctx.set(keys::activated_feature(name), height)?;
        }

        for account in &genesis.accounts {
            self.bank().mint_coins(ctx, modules::MINT, account.amount)?;
            self.bank()
                .send_from_module_to_account(ctx, modules::MINT, &account.address, account.amount)?;
        }

        for servicer in &genesis.servicers {
            self.set_servicer(ctx, servicer)?;
            if servicer.status.holds_stake() {
                self.bank()
                    .mint_coins(ctx, modules::STAKED_POOL, servicer.staked_tokens)?;
            }
        }
        for requestor in &genesis.requestors {
            self.set_requestor(ctx, requestor)?;
            if requestor.status.holds_stake() {
                self.bank()
                    .mint_coins(ctx, modules::REQUESTOR_STAKED_POOL, requestor.staked_tokens)?;
            }
        }

        for info in &genesis.signing_infos {
            self.set_signing_info(ctx, info)?;
        }
        let height = ctx.height();
        for servicer in &genesis.servicers {
            if self.signing_info(ctx, &servicer.address)?.is_none() {
                self.set_signing_info(ctx, &SigningInfo::new(servicer.address, height))?;
            }
        }
        for entry in &genesis.report_cards {
            self.set_report_card(ctx, &entry.address, &entry.card)?;
        }
        for addr in &genesis.fishermen {
            self.set_fisherman_member(ctx, addr, true)?;
        }
        for addr in &genesis.discount_keys {
            self.set_discount_key(ctx, addr, true)?;
        }
        for entry in &genesis.waiting {
            self.set_waiting(ctx, &entry.address, entry.requested_at)?;
        }

        self.assert_invariants(ctx)
            .map_err(|e| StakingError::InvalidParam(format!("genesis: {e}")))?;

        let updates = self.validator_updates(ctx)?;
        tracing::info!(
            servicers = genesis.servicers.len(),
            requestors = genesis.requestors.len(),
            accounts = genesis.accounts.len(),
            validators = updates.len(),
            "genesis initialized"
        );
        Ok(updates)
    }

    /// Read the current state back out in genesis form
    pub fn export_genesis(&self, ctx: &Context) -> Result<GenesisState> {
        let params = self.load_params(ctx)?;
        let pools = [
            Address::for_module(modules::STAKED_POOL),
            Address::for_module(modules::REQUESTOR_STAKED_POOL),
        ];

        let mut it = ctx.iter_prefix(&[keys::BALANCE]);
        let holders: Vec<Address> = it
            .by_ref()
            .filter(|(key, _)| key.get(21..) == Some(params.stake_denom.as_bytes()))
            .filter_map(|(key, _)| key.get(1..21).and_then(|raw| Address::from_slice(raw).ok()))
            .filter(|addr| !pools.contains(addr))
            .collect();
        it.close();
        let mut accounts = Vec::with_capacity(holders.len());
        for address in holders {
            accounts.push(GenesisAccount {
                address,
                amount: self.bank().balance(ctx, &address)?,
            });
        }

        let mut it = ctx.iter_prefix(&[keys::ACTIVATED_FEATURES]);
        let raw_features: Vec<_> = it.by_ref().collect();
        it.close();
        let mut activated_features = BTreeMap::new();
        for (key, value) in raw_features {
            let name = String::from_utf8_lossy(key.get(1..).unwrap_or_default()).into_owned();
            activated_features.insert(name, decode_value::<i64>(&value)?);
        }

        let mut it = ctx.iter_prefix(&[keys::SIGNING_INFO]);
        let raw_infos: Vec<_> = it.by_ref().collect();
        it.close();
        let signing_infos = raw_infos
            .into_iter()
            .map(|(_, value)| Ok(decode_value::<SigningInfo>(&value)?))
            .collect::<Result<Vec<_>>>()?;

        let mut it = ctx.iter_prefix(&[keys::REPORT_CARD]);
        let raw_cards: Vec<_> = it.by_ref().collect();
        it.close();
        let mut report_cards = Vec::with_capacity(raw_cards.len());
        for (key, value) in raw_cards {
            if let Some(address) = keys::trailing_address(&key) {
                report_cards.push(GenesisReportCard {
                    address,
                    card: decode_value(&value)?,
                });
            }
        }

        let waiting = self
            .waiting_entries(ctx)?
            .into_iter()
            .map(|(address, requested_at)| GenesisWaiting { address, requested_at })
            .collect();

        Ok(GenesisState {
            upgrade: self.load_upgrade(ctx)?,
            activated_features,
            accounts,
            servicers: self.all_servicers(ctx)?,
            requestors: self.all_requestors(ctx)?,
            signing_infos,
            report_cards,
            fishermen: self.fishermen(ctx),
            discount_keys: self.discount_keys(ctx),
            waiting,
            params,
        })
    }
}
