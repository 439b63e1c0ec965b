//! Servicer message handlers
//!
//! Stake, edit-stake, begin-unstake, unjail, pause and unpause. Every check
//! runs before the first write so a rejected message leaves no trace even
//! outside a branch.

use crate::bank::Bank;
use crate::context::Context;
use crate::entity::Servicer;
use crate::signing::SigningInfo;
use crate::staking::StakeManager;
use crate::validation::{parse_chains, parse_geo_zones, validate_public_key, validate_service_url};
use relaymesh_core::error::{Result, StakingError};
use relaymesh_core::events::{Event, EventKind};
use relaymesh_core::features;
use relaymesh_core::time::add_ms;
use relaymesh_core::tx::MsgStakeServicer;
use relaymesh_core::types::{modules, Address, StakeStatus};

/// Quantized stake bin; width 0 disables binning
fn stake_bin(tokens: u128, width: u128) -> u128 {
    if width == 0 {
        tokens
    } else {
        tokens / width
    }
}

impl<B: Bank> StakeManager<B> {
    /// Stake a new servicer or edit an existing staked one
    pub fn handle_stake_servicer(&self, ctx: &mut Context, signer: &Address, msg: &MsgStakeServicer) -> Result<()> {
        validate_public_key(&msg.public_key, ctx.consensus())?;
        let params = ctx.params().clone();
        let chains = parse_chains(&msg.chains, params.max_chains)?;
        let geo_zones = parse_geo_zones(&msg.geo_zones, params.max_geo_zones)?;
        validate_service_url(&msg.service_url)?;
        if msg.amount < params.minimum_stake {
            return Err(StakingError::MinimumStake {
                amount: msg.amount,
                minimum: params.minimum_stake,
            });
        }

        let address = msg.public_key.address();
        let existing = self.get_servicer(ctx, &address)?;
        match existing {
            Some(current) if current.status == StakeStatus::Staked => {
                if !current.is_authorized(signer) {
                    return Err(StakingError::UnauthorizedSigner);
                }
                if current.output_address.is_some() && msg.output_address.is_none() {
                    return Err(StakingError::NilOutputAddress);
                }
                if msg.amount < current.staked_tokens {
                    return Err(StakingError::MinimumEditStake {
                        new: msg.amount,
                        current: current.staked_tokens,
                    });
                }
                if ctx.is_feature_active(features::STAKE_BINS) && msg.amount > current.staked_tokens {
                    let width = params.servicer_stake_bin_width;
                    if stake_bin(msg.amount, width) <= stake_bin(current.staked_tokens, width) {
                        return Err(StakingError::SameBinEditStake);
                    }
                }
                let delta = msg.amount - current.staked_tokens;
                self.escrow(ctx, signer, delta)?;

                let updated = Servicer {
                    chains,
                    geo_zones,
                    service_url: msg.service_url.clone(),
                    staked_tokens: msg.amount,
                    output_address: msg.output_address,
                    ..current
                };
                self.set_servicer(ctx, &updated)?;
                ctx.emit(
                    Event::new(EventKind::Stake, "servicers", signer)
                        .attr("address", address)
                        .attr("amount", msg.amount)
                        .attr("delta", delta)
                        .attr("edit", true),
                );
                tracing::debug!(servicer = %address, amount = msg.amount, delta, "servicer stake edited");
                Ok(())
            }
            Some(current) if current.status == StakeStatus::Unstaking => Err(StakingError::WrongStatus(
                "servicer is unstaking and cannot be edited".into(),
            )),
            _ => {
                let authorized = *signer == address || msg.output_address.as_ref() == Some(signer);
                if !authorized {
                    return Err(StakingError::UnauthorizedSigner);
                }
                if params.servicer_count_lock {
                    return Err(StakingError::ServicerCountLocked);
                }
                if self.staked_servicer_count(ctx)? >= params.max_servicers {
                    return Err(StakingError::MaxServicersReached(params.max_servicers));
                }
                self.escrow(ctx, signer, msg.amount)?;

                let servicer = Servicer {
                    address,
                    public_key: msg.public_key.clone(),
                    jailed: false,
                    paused: false,
                    paused_at: None,
                    status: StakeStatus::Staked,
                    chains,
                    geo_zones,
                    service_url: msg.service_url.clone(),
                    staked_tokens: msg.amount,
                    unstaking_time: None,
                    output_address: msg.output_address,
                };
                self.set_servicer(ctx, &servicer)?;
                self.set_signing_info(ctx, &SigningInfo::new(address, ctx.height()))?;
                ctx.emit(Event::new(EventKind::CreateEntity, "servicers", signer).attr("address", address));
                ctx.emit(
                    Event::new(EventKind::Stake, "servicers", signer)
                        .attr("address", address)
                        .attr("amount", msg.amount),
                );
                tracing::debug!(servicer = %address, amount = msg.amount, "servicer staked");
                Ok(())
            }
        }
    }

    /// Move `amount` from the signer into the servicer pool
    fn escrow(&self, ctx: &mut Context, signer: &Address, amount: u128) -> Result<()> {
        let available = self.bank().balance(ctx, signer)?;
        if available < amount {
            return Err(StakingError::NotEnoughCoins {
                needed: amount,
                available,
            });
        }
        self.bank()
            .send_from_account_to_module(ctx, signer, modules::STAKED_POOL, amount)
    }

    fn authorized_servicer(&self, ctx: &Context, signer: &Address, addr: &Address) -> Result<Servicer> {
        let servicer = self.servicer(ctx, addr)?;
        if !servicer.is_authorized(signer) {
            return Err(StakingError::UnauthorizedSigner);
        }
        Ok(servicer)
    }

    /// Queue an unstake request until the next session boundary
    pub fn handle_begin_unstake_servicer(&self, ctx: &mut Context, signer: &Address, addr: &Address) -> Result<()> {
        let servicer = self.authorized_servicer(ctx, signer, addr)?;
        if servicer.status != StakeStatus::Staked {
            return Err(StakingError::WrongStatus("servicer is not staked".into()));
        }
        if servicer.jailed {
            return Err(StakingError::WrongStatus("servicer is jailed".into()));
        }
        if servicer.paused {
            return Err(StakingError::WrongStatus("servicer is paused".into()));
        }
        if self.is_waiting(ctx, addr) {
            return Err(StakingError::WrongStatus("servicer is already waiting to unstake".into()));
        }

        let height = ctx.height();
        self.set_waiting(ctx, addr, height)?;
        ctx.emit(
            Event::new(EventKind::WaitingToBeginUnstaking, "servicers", signer)
                .attr("address", addr)
                .attr("requested_at", height),
        );
        tracing::debug!(servicer = %addr, height, "servicer waiting to unstake");
        Ok(())
    }

    /// Lift a jail once the jail period passed and the stake still qualifies
    pub fn handle_unjail_servicer(&self, ctx: &mut Context, signer: &Address, addr: &Address) -> Result<()> {
        let mut servicer = self.authorized_servicer(ctx, signer, addr)?;
        if !servicer.jailed {
            return Err(StakingError::NotJailed);
        }
        let info = self.signing_info_or_new(ctx, addr)?;
        if info.tombstoned {
            return Err(StakingError::Tombstoned);
        }
        if ctx.block_time() < info.jailed_until {
            return Err(StakingError::JailPeriodActive);
        }
        let minimum = ctx.params().minimum_stake;
        if servicer.staked_tokens < minimum {
            return Err(StakingError::MinimumStake {
                amount: servicer.staked_tokens,
                minimum,
            });
        }

        servicer.jailed = false;
        self.set_servicer(ctx, &servicer)?;
        self.reset_liveness(ctx, addr)?;
        ctx.emit(Event::new(EventKind::Unjail, "servicers", signer).attr("address", addr));
        tracing::info!(servicer = %addr, "servicer unjailed");
        Ok(())
    }

    pub fn handle_pause_servicer(&self, ctx: &mut Context, signer: &Address, addr: &Address) -> Result<()> {
        let mut servicer = self.authorized_servicer(ctx, signer, addr)?;
        if servicer.status != StakeStatus::Staked {
            return Err(StakingError::WrongStatus("servicer is not staked".into()));
        }
        if servicer.paused {
            return Err(StakingError::AlreadyPaused);
        }
        servicer.paused = true;
        servicer.paused_at = Some(ctx.block_time());
        self.set_servicer(ctx, &servicer)?;
        ctx.emit(Event::new(EventKind::Pause, "servicers", signer).attr("address", addr));
        tracing::debug!(servicer = %addr, "servicer paused");
        Ok(())
    }

    pub fn handle_unpause_servicer(&self, ctx: &mut Context, signer: &Address, addr: &Address) -> Result<()> {
        let mut servicer = self.authorized_servicer(ctx, signer, addr)?;
        if !servicer.paused {
            return Err(StakingError::NotPaused);
        }
        if let Some(paused_at) = servicer.paused_at {
            if ctx.block_time() < add_ms(&paused_at, ctx.params().min_pause_time_ms) {
                return Err(StakingError::PausedTooRecently);
            }
        }
        servicer.paused = false;
        servicer.paused_at = None;
        self.set_servicer(ctx, &servicer)?;
        ctx.emit(Event::new(EventKind::Unpause, "servicers", signer).attr("address", addr));
        tracing::debug!(servicer = %addr, "servicer unpaused");
        Ok(())
    }

    /// Plain balance transfer from the signer
    pub fn handle_send(&self, ctx: &mut Context, signer: &Address, from: &Address, to: &Address, amount: u128) -> Result<()> {
        if from != signer {
            return Err(StakingError::UnauthorizedSigner);
        }
        if amount == 0 {
            return Err(StakingError::BadSendAmount);
        }
        self.bank().send_coins(ctx, from, to, amount)?;
        ctx.emit(
            Event::new(EventKind::Transfer, "bank", signer)
                .attr("recipient", to)
                .attr("amount", amount),
        );
        Ok(())
    }
}
