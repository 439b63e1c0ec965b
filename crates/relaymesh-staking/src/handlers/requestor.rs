//! Requestor message handlers

use crate::bank::Bank;
use crate::context::Context;
use crate::entity::Requestor;
use crate::staking::StakeManager;
use crate::validation::{parse_chains, parse_geo_zones, validate_public_key};
use relaymesh_core::error::{Result, StakingError};
use relaymesh_core::events::{Event, EventKind};
use relaymesh_core::time::add_ms;
use relaymesh_core::tx::MsgStakeRequestor;
use relaymesh_core::types::{modules, Address, StakeStatus};

impl<B: Bank> StakeManager<B> {
    fn staked_requestor_count(&self, ctx: &Context) -> Result<u64> {
        Ok(self
            .all_requestors(ctx)?
            .iter()
            .filter(|r| r.status == StakeStatus::Staked)
            .count() as u64)
    }

    /// Stake a new requestor or raise an existing stake
    pub fn handle_stake_requestor(&self, ctx: &mut Context, signer: &Address, msg: &MsgStakeRequestor) -> Result<()> {
        validate_public_key(&msg.public_key, ctx.consensus())?;
        let params = ctx.params().clone();
        let address = msg.public_key.address();
        if *signer != address {
            return Err(StakingError::UnauthorizedSigner);
        }
        let chains = parse_chains(&msg.chains, params.max_chains)?;
        let geo_zones = parse_geo_zones(&msg.geo_zones, params.max_geo_zones)?;
        if msg.servicers_per_session == 0 || u64::from(msg.servicers_per_session) > params.max_servicers_per_session {
            return Err(StakingError::InvalidServicersPerSession);
        }
        if msg.amount < params.requestor_minimum_stake {
            return Err(StakingError::MinimumStake {
                amount: msg.amount,
                minimum: params.requestor_minimum_stake,
            });
        }

        let existing = self.get_requestor(ctx, &address)?;
        let (delta, created) = match &existing {
            Some(current) if current.status == StakeStatus::Staked => {
                if msg.amount < current.staked_tokens {
                    return Err(StakingError::MinimumEditStake {
                        new: msg.amount,
                        current: current.staked_tokens,
                    });
                }
                (msg.amount - current.staked_tokens, false)
            }
            Some(current) if current.status == StakeStatus::Unstaking => {
                return Err(StakingError::WrongStatus("requestor is unstaking and cannot be edited".into()));
            }
            _ => {
                if self.staked_requestor_count(ctx)? >= params.max_requestors {
                    return Err(StakingError::MaxRequestorsReached(params.max_requestors));
                }
                (msg.amount, true)
            }
        };

        let available = self.bank().balance(ctx, signer)?;
        if available < delta {
            return Err(StakingError::NotEnoughCoins {
                needed: delta,
                available,
            });
        }
        self.bank()
            .send_from_account_to_module(ctx, signer, modules::REQUESTOR_STAKED_POOL, delta)?;

        // participation depends on the pool balance, so price relays after the transfer
        let max_relays = self.compute_max_relays(ctx, msg.amount)?;
        let requestor = Requestor {
            address,
            public_key: msg.public_key.clone(),
            status: StakeStatus::Staked,
            chains,
            geo_zones,
            staked_tokens: msg.amount,
            max_relays,
            servicers_per_session: msg.servicers_per_session,
            unstaking_time: None,
        };
        self.set_requestor(ctx, &requestor)?;

        if created {
            ctx.emit(Event::new(EventKind::CreateEntity, "requestors", signer).attr("address", address));
        }
        ctx.emit(
            Event::new(EventKind::Stake, "requestors", signer)
                .attr("address", address)
                .attr("amount", msg.amount)
                .attr("max_relays", max_relays),
        );
        tracing::debug!(requestor = %address, amount = msg.amount, max_relays, created, "requestor staked");
        Ok(())
    }

    /// Start unstaking immediately; requestors skip the waiting queue
    pub fn handle_begin_unstake_requestor(&self, ctx: &mut Context, signer: &Address, addr: &Address) -> Result<()> {
        if signer != addr {
            return Err(StakingError::UnauthorizedSigner);
        }
        let mut requestor = self.requestor(ctx, addr)?;
        if requestor.status != StakeStatus::Staked {
            return Err(StakingError::WrongStatus("requestor is not staked".into()));
        }
        let completion = add_ms(&ctx.block_time(), ctx.params().unstaking_time_ms);
        requestor.status = StakeStatus::Unstaking;
        requestor.unstaking_time = Some(completion);
        self.set_requestor(ctx, &requestor)?;
        ctx.emit(
            Event::new(EventKind::BeginUnstake, "requestors", signer)
                .attr("address", addr)
                .attr("completion_time", completion.to_rfc3339()),
        );
        tracing::debug!(requestor = %addr, %completion, "requestor unstaking");
        Ok(())
    }
}
