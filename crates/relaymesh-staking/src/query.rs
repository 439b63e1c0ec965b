//! # Read-only Queries
//!
//! [`Querier`] answers reads against a context built over a committed
//! snapshot. `route` maps a query path plus JSON arguments to a JSON result:
//!
//! | Path | Arguments |
//! |------|-----------|
//! | `servicer`, `requestor`, `signing_info`, `report_card`, `balance` | `{address}` |
//! | `servicers`, `requestors` | `{status?, chain?, geo_zone?, page?, per_page?}` |
//! | `staked_pool`, `params`, `upgrade`, `pending_claims`, `validator_set` | none |

use crate::bank::{Bank, StoreBank};
use crate::context::Context;
use crate::entity::{ReportCard, Requestor, Servicer};
use crate::report_card::ReportRecord;
use crate::signing::SigningInfo;
use crate::staking::{EntityFilter, Page, StakeManager};
use relaymesh_core::error::{Result, StakingError};
use relaymesh_core::params::{Params, UpgradeState};
use relaymesh_core::types::{amount_string, modules, Address, PublicKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default page size of list queries
pub const DEFAULT_PER_PAGE: u64 = 30;

/// Balances of the two staked pools
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakedPools {
    #[serde(with = "amount_string")]
    pub servicers: u128,
    #[serde(with = "amount_string")]
    pub requestors: u128,
}

/// One member of the last reported validator set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub address: Address,
    pub public_key: PublicKey,
    pub power: u64,
}

#[derive(Deserialize)]
struct AddressArgs {
    address: Address,
}

#[derive(Deserialize)]
struct ListArgs {
    #[serde(flatten)]
    filter: EntityFilter,
    #[serde(default)]
    page: Option<u64>,
    #[serde(default)]
    per_page: Option<u64>,
}

fn args<T: for<'de> Deserialize<'de>>(data: &Value) -> Result<T> {
    Ok(serde_json::from_value(data.clone())?)
}

/// Read-only view over one context
pub struct Querier<'a, B: Bank = StoreBank> {
    manager: &'a StakeManager<B>,
    ctx: &'a Context,
}

impl<'a, B: Bank> Querier<'a, B> {
    pub fn new(manager: &'a StakeManager<B>, ctx: &'a Context) -> Self {
        Self { manager, ctx }
    }

    /// Height of the state being read
    pub fn height(&self) -> i64 {
        self.ctx.height()
    }

    pub fn servicer(&self, addr: &Address) -> Result<Servicer> {
        self.manager.servicer(self.ctx, addr)
    }

    pub fn servicers(&self, filter: &EntityFilter, page: u64, per_page: u64) -> Result<Page<Servicer>> {
        self.manager.servicers_filtered(self.ctx, filter, page, per_page)
    }

    pub fn requestor(&self, addr: &Address) -> Result<Requestor> {
        self.manager.requestor(self.ctx, addr)
    }

    pub fn requestors(&self, filter: &EntityFilter, page: u64, per_page: u64) -> Result<Page<Requestor>> {
        self.manager.requestors_filtered(self.ctx, filter, page, per_page)
    }

    pub fn staked_pool(&self) -> Result<StakedPools> {
        Ok(StakedPools {
            servicers: self.manager.bank().module_balance(self.ctx, modules::STAKED_POOL)?,
            requestors: self
                .manager
                .bank()
                .module_balance(self.ctx, modules::REQUESTOR_STAKED_POOL)?,
        })
    }

    pub fn params(&self) -> Result<Params> {
        self.manager.load_params(self.ctx)
    }

    pub fn upgrade(&self) -> Result<UpgradeState> {
        self.manager.load_upgrade(self.ctx)
    }

    pub fn signing_info(&self, addr: &Address) -> Result<SigningInfo> {
        self.manager
            .signing_info(self.ctx, addr)?
            .ok_or_else(|| StakingError::EntityNotFound(format!("signing info {addr}")))
    }

    pub fn report_card(&self, addr: &Address) -> Result<ReportCard> {
        self.manager.report_card(self.ctx, addr)
    }

    /// Report submissions still inside the evidence window
    pub fn pending_claims(&self) -> Result<Vec<ReportRecord>> {
        self.manager.report_records(self.ctx)
    }

    pub fn balance(&self, addr: &Address) -> Result<u128> {
        self.manager.bank().balance(self.ctx, addr)
    }

    pub fn validator_set(&self) -> Result<Vec<ValidatorInfo>> {
        Ok(self
            .manager
            .last_validator_powers(self.ctx)?
            .into_iter()
            .map(|(address, last)| ValidatorInfo {
                address,
                public_key: last.public_key,
                power: last.power,
            })
            .collect())
    }

    /// Dispatch a query path with JSON arguments
    pub fn route(&self, path: &str, data: &Value) -> Result<Value> {
        let path = path.trim_matches('/');
        let value = match path {
            "servicer" => serde_json::to_value(self.servicer(&args::<AddressArgs>(data)?.address)?)?,
            "servicers" => {
                let list: ListArgs = args(data)?;
                let page = list.page.unwrap_or(1);
                let per_page = list.per_page.unwrap_or(DEFAULT_PER_PAGE);
                serde_json::to_value(self.servicers(&list.filter, page, per_page)?)?
            }
            "requestor" => serde_json::to_value(self.requestor(&args::<AddressArgs>(data)?.address)?)?,
            "requestors" => {
                let list: ListArgs = args(data)?;
                let page = list.page.unwrap_or(1);
                let per_page = list.per_page.unwrap_or(DEFAULT_PER_PAGE);
                serde_json::to_value(self.requestors(&list.filter, page, per_page)?)?
            }
            "staked_pool" => serde_json::to_value(self.staked_pool()?)?,
            "params" => serde_json::to_value(self.params()?)?,
            "upgrade" => serde_json::to_value(self.upgrade()?)?,
            "signing_info" => serde_json::to_value(self.signing_info(&args::<AddressArgs>(data)?.address)?)?,
            "report_card" => serde_json::to_value(self.report_card(&args::<AddressArgs>(data)?.address)?)?,
            "pending_claims" => serde_json::to_value(self.pending_claims()?)?,
            "balance" => {
                let amount = self.balance(&args::<AddressArgs>(data)?.address)?;
                Value::String(amount.to_string())
            }
            "validator_set" => serde_json::to_value(self.validator_set()?)?,
            other => return Err(StakingError::UnknownQuery(other.to_string())),
        };
        tracing::trace!(path, height = self.height(), "query served");
        Ok(value)
    }
}
