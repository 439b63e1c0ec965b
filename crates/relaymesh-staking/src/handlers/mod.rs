//! # Transaction Execution
//!
//! `deliver_tx` decodes the envelope, charges the fee in a branch of its own
//! and then runs the message in a nested branch:
//!
//! ```text
//! decode (height selects encoding)
//!   └─ fee branch     signer -> fee_collector     committed when paid
//!   └─ message branch handler writes + events     committed only on Ok
//! iterator leak check, gas readout
//! ```
//!
//! A failing message therefore still pays its fee, and a transaction that
//! cannot pay its fee never reaches its handler.

mod gov;
mod report;
mod requestor;
mod servicer;

use crate::bank::Bank;
use crate::context::Context;
use crate::staking::StakeManager;
use relaymesh_core::error::{Result, StakingError};
use relaymesh_core::events::Event;
use relaymesh_core::tx::{decode_tx, tx_hash, Msg, Tx, TxEncoding};
use relaymesh_core::types::{modules, Address};
use serde::{Deserialize, Serialize};

/// Outcome of one delivered transaction; `code == 0` means success
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    pub hash: String,
    pub code: u32,
    pub codespace: String,
    pub log: String,
    pub gas_used: u64,
    pub events: Vec<Event>,
}

impl TxResult {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    fn failed(hash: String, err: &StakingError, gas_used: u64, events: Vec<Event>) -> Self {
        Self {
            hash,
            code: err.code(),
            codespace: err.codespace().to_string(),
            log: err.to_string(),
            gas_used,
            events,
        }
    }
}

impl<B: Bank> StakeManager<B> {
    /// Route a message to its handler
    pub fn deliver_msg(&self, ctx: &mut Context, signer: &Address, msg: &Msg) -> Result<()> {
        if signer.is_zero() {
            return Err(StakingError::NilSigner);
        }
        match msg {
            Msg::StakeServicer(m) => self.handle_stake_servicer(ctx, signer, m),
            Msg::BeginUnstakeServicer { address } => self.handle_begin_unstake_servicer(ctx, signer, address),
            Msg::UnjailServicer { address } => self.handle_unjail_servicer(ctx, signer, address),
            Msg::PauseServicer { address } => self.handle_pause_servicer(ctx, signer, address),
            Msg::UnpauseServicer { address } => self.handle_unpause_servicer(ctx, signer, address),
            Msg::Send { from, to, amount } => self.handle_send(ctx, signer, from, to, *amount),
            Msg::StakeRequestor(m) => self.handle_stake_requestor(ctx, signer, m),
            Msg::BeginUnstakeRequestor { address } => self.handle_begin_unstake_requestor(ctx, signer, address),
            Msg::SubmitReportCard(m) => self.handle_submit_report_card(ctx, signer, m),
            Msg::ChangeParam { key, value } => self.handle_change_param(ctx, signer, key, value),
            Msg::Upgrade(m) => self.handle_upgrade(ctx, signer, m),
            Msg::IssueDiscountKey { requestor } => self.handle_issue_discount_key(ctx, signer, requestor),
            Msg::RevokeDiscountKey { requestor } => self.handle_revoke_discount_key(ctx, signer, requestor),
            Msg::SetFisherman { address, enabled } => self.handle_set_fisherman(ctx, signer, address, *enabled),
            Msg::DaoTransfer { action, to, amount } => self.handle_dao_transfer(ctx, signer, *action, to, *amount),
        }
    }

    /// Decode and execute one raw transaction
    pub fn deliver_tx(&self, ctx: &mut Context, raw: &[u8]) -> TxResult {
        let hash = tx_hash(raw);
        let span = tracing::info_span!("tx", hash = %hash);
        let _enter = span.enter();

        ctx.store().gas().reset();
        let mark = ctx.event_mark();
        let encoding = TxEncoding::for_height(ctx.height(), ctx.upgrade().codec_upgrade_height);
        let tx = match decode_tx(raw, encoding) {
            Ok(tx) => tx,
            Err(e) => {
                let err = StakingError::TxDecode(e.to_string());
                tracing::debug!(error = %err, ?encoding, "undecodable transaction");
                return TxResult::failed(hash, &err, ctx.store().gas().consumed(), Vec::new());
            }
        };

        let outcome = ctx
            .with_branch(|ctx| self.charge_fee(ctx, &tx))
            .and_then(|()| {
                let signer = tx.signer();
                ctx.with_branch(|ctx| self.deliver_msg(ctx, &signer, &tx.msg))
            });
        let leak = ctx.store().check_iterators().map_err(StakingError::from);
        let outcome = outcome.and(leak);

        let gas_used = ctx.store().gas().consumed();
        let events = ctx.events_since(mark);
        match outcome {
            Ok(()) => {
                tracing::debug!(msg = tx.msg.name(), gas_used, "transaction delivered");
                TxResult {
                    hash,
                    code: 0,
                    codespace: String::new(),
                    log: String::new(),
                    gas_used,
                    events,
                }
            }
            Err(err) => {
                tracing::debug!(msg = tx.msg.name(), error = %err, code = err.code(), "transaction failed");
                TxResult::failed(hash, &err, gas_used, events)
            }
        }
    }

    fn charge_fee(&self, ctx: &mut Context, tx: &Tx) -> Result<()> {
        let required = ctx.params().base_tx_fee;
        if tx.fee < required {
            return Err(StakingError::InsufficientFee {
                paid: tx.fee,
                required,
            });
        }
        let signer = tx.signer();
        let available = self.bank().balance(ctx, &signer)?;
        if available < tx.fee {
            return Err(StakingError::NotEnoughCoins {
                needed: tx.fee,
                available,
            });
        }
        self.bank()
            .send_from_account_to_module(ctx, &signer, modules::FEE_COLLECTOR, tx.fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{public_key, test_context};
    use relaymesh_core::tx::{encode_tx, TxSignature};

    fn tx(seed: u8, msg: Msg, fee: u128) -> Tx {
        Tx {
            msg,
            fee,
            memo: String::new(),
            entropy: 7,
            signature: TxSignature {
                public_key: public_key(seed),
                signature: vec![0; 64],
            },
        }
    }

    #[test]
    fn test_failed_message_still_pays_fee() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let signer = public_key(1).address();
        manager.fund(&mut ctx, &signer, 100_000);

        let send = Msg::Send {
            from: signer,
            to: Address::new([2; 20]),
            amount: 1_000_000,
        };
        let raw = encode_tx(&tx(1, send, 10_000), TxEncoding::Versioned).unwrap();
        let result = manager.deliver_tx(&mut ctx, &raw);

        assert_eq!(result.code, 204);
        assert_eq!(result.codespace, "bank");
        assert!(result.gas_used > 0);
        assert_eq!(manager.bank().balance(&ctx, &signer).unwrap(), 90_000);
        assert_eq!(manager.bank().module_balance(&ctx, modules::FEE_COLLECTOR).unwrap(), 10_000);
    }

    #[test]
    fn test_insufficient_fee_skips_handler() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let signer = public_key(1).address();
        manager.fund(&mut ctx, &signer, 100_000);

        let send = Msg::Send {
            from: signer,
            to: Address::new([2; 20]),
            amount: 5,
        };
        let raw = encode_tx(&tx(1, send, 9_999), TxEncoding::Versioned).unwrap();
        let result = manager.deliver_tx(&mut ctx, &raw);
        assert_eq!(result.code, StakingError::InsufficientFee { paid: 0, required: 0 }.code());
        assert_eq!(manager.bank().balance(&ctx, &signer).unwrap(), 100_000);
        assert_eq!(manager.bank().balance(&ctx, &Address::new([2; 20])).unwrap(), 0);
    }

    #[test]
    fn test_successful_send_returns_events() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let signer = public_key(1).address();
        manager.fund(&mut ctx, &signer, 100_000);
        ctx.take_events();

        let send = Msg::Send {
            from: signer,
            to: Address::new([2; 20]),
            amount: 5,
        };
        let raw = encode_tx(&tx(1, send, 10_000), TxEncoding::Versioned).unwrap();
        let result = manager.deliver_tx(&mut ctx, &raw);
        assert!(result.is_ok(), "{}", result.log);
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].get("amount"), Some("5"));
    }

    #[test]
    fn test_encoding_follows_height() {
        let mut ctx = test_context(1);
        let manager = StakeManager::new();
        let signer = public_key(1).address();
        manager.fund(&mut ctx, &signer, 100_000);
        let send = Msg::Send {
            from: signer,
            to: Address::new([2; 20]),
            amount: 5,
        };

        // height 1 is above the default codec upgrade height of 0
        let legacy = encode_tx(&tx(1, send.clone(), 10_000), TxEncoding::Legacy).unwrap();
        let result = manager.deliver_tx(&mut ctx, &legacy);
        assert_eq!(result.code, StakingError::TxDecode(String::new()).code());

        ctx.set_upgrade(relaymesh_core::params::UpgradeState {
            codec_upgrade_height: 10,
            ..Default::default()
        });
        let result = manager.deliver_tx(&mut ctx, &legacy);
        assert!(result.is_ok(), "{}", result.log);
    }
}
