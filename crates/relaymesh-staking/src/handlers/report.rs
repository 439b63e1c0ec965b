//! Fisherman report-card submission
//!
//! A report is checked against the session it claims, then lands in exactly
//! one of three outcomes:
//!
//! | Outcome | Condition | Effect |
//! |---------|-----------|--------|
//! | false report | relays above the requestor credit, or chain unsupported | fisherman slashed |
//! | no activity | zero relays and zero availability | card updated, servicer slashed |
//! | accepted | otherwise | card updated, reward minted |
//!
//! Every outcome writes a report record, so a second report for the same
//! session and servicer is refused until the session ages out.

use crate::bank::Bank;
use crate::context::Context;
use crate::entity::{weighted_score, StakedEntity};
use crate::report_card::{ReportOutcome, ReportRecord};
use crate::rewards::RewardRecipients;
use crate::slashing::SlashReason;
use crate::staking::StakeManager;
use relaymesh_core::constants::NETWORK_IDENTIFIER_LENGTH;
use relaymesh_core::error::{Result, StakingError};
use relaymesh_core::events::{Event, EventKind};
use relaymesh_core::params::Params;
use relaymesh_core::tx::{MsgSubmitReportCard, SessionHeader};
use relaymesh_core::types::{Address, ChainId, StakeStatus};

/// Session must have started on a boundary, be over, and still be within the evidence window
fn check_session(session: &SessionHeader, height: i64, params: &Params) -> Result<()> {
    let start = session.session_height;
    if start < 1 || !params.is_session_start(start) {
        return Err(StakingError::InvalidSession(format!("{start} is not a session start")));
    }
    let frequency = i64::try_from(params.session_block_frequency).unwrap_or(i64::MAX);
    if height < start.saturating_add(frequency) {
        return Err(StakingError::InvalidSession(format!("session {start} has not ended")));
    }
    let max_age = i64::try_from(params.max_evidence_age_blocks).unwrap_or(i64::MAX);
    if height - start > max_age {
        return Err(StakingError::InvalidSession(format!("session {start} is older than {max_age} blocks")));
    }
    Ok(())
}

impl<B: Bank> StakeManager<B> {
    pub fn handle_submit_report_card(&self, ctx: &mut Context, signer: &Address, msg: &MsgSubmitReportCard) -> Result<()> {
        if msg.fisherman != *signer {
            return Err(StakingError::UnauthorizedSigner);
        }
        if !self.is_active_fisherman(ctx, &msg.fisherman)? {
            return Err(StakingError::UnauthorizedFisherman(msg.fisherman.to_hex()));
        }
        if !msg.scores.in_bounds() {
            return Err(StakingError::InvalidScore);
        }
        let params = ctx.params().clone();
        check_session(&msg.session, ctx.height(), &params)?;

        let requestor = self.requestor(ctx, &msg.session.requestor)?;
        if requestor.status == StakeStatus::Unstaked {
            return Err(StakingError::WrongStatus("requestor is unstaked".into()));
        }
        let servicer = self.servicer(ctx, &msg.servicer)?;
        if servicer.status != StakeStatus::Staked {
            return Err(StakingError::WrongStatus("servicer is not staked".into()));
        }
        let chain = ChainId::parse(&msg.session.chain, NETWORK_IDENTIFIER_LENGTH)?;
        let session = SessionHeader {
            chain: chain.as_str().to_string(),
            ..msg.session.clone()
        };
        if self.has_report(ctx, &session, &msg.servicer) {
            return Err(StakingError::DuplicateReport);
        }

        let false_report =
            msg.relays > requestor.max_relays || !servicer.supports_chain(&chain) || !requestor.supports_chain(&chain);
        let no_activity = msg.relays == 0 && msg.scores.availability.is_zero();
        let outcome = if false_report {
            ReportOutcome::FalseReport
        } else if no_activity {
            ReportOutcome::NoActivity
        } else {
            ReportOutcome::Accepted
        };

        let height = ctx.height();
        self.record_report(
            ctx,
            &ReportRecord {
                session,
                servicer: msg.servicer,
                fisherman: msg.fisherman,
                relays: msg.relays,
                scores: msg.scores,
                outcome,
                submitted_at: height,
            },
        )?;

        match outcome {
            ReportOutcome::FalseReport => {
                let fraction = SlashReason::FalseReport.fraction(&params);
                self.slash(ctx, &msg.fisherman, fraction, SlashReason::FalseReport)?;
                tracing::info!(
                    fisherman = %msg.fisherman,
                    servicer = %msg.servicer,
                    relays = msg.relays,
                    max_relays = requestor.max_relays,
                    "false report, fisherman slashed"
                );
            }
            ReportOutcome::NoActivity => {
                self.fold_into_card(ctx, msg)?;
                let fraction = SlashReason::NoActivity.fraction(&params);
                self.slash(ctx, &msg.servicer, fraction, SlashReason::NoActivity)?;
            }
            ReportOutcome::Accepted => {
                self.fold_into_card(ctx, msg)?;
                let score = weighted_score(
                    msg.scores.latency,
                    msg.scores.availability,
                    msg.scores.reliability,
                    &params.score_weights,
                );
                self.reward_for_report(
                    ctx,
                    RewardRecipients {
                        servicer: &msg.servicer,
                        requestor: &msg.session.requestor,
                        fisherman: &msg.fisherman,
                    },
                    msg.relays,
                    score,
                )?;
            }
        }

        ctx.emit(
            Event::new(EventKind::ReportCard, "reports", signer)
                .attr("servicer", msg.servicer)
                .attr("requestor", msg.session.requestor)
                .attr("session_height", msg.session.session_height)
                .attr("relays", msg.relays)
                .attr("outcome", outcome.name()),
        );
        Ok(())
    }

    fn fold_into_card(&self, ctx: &mut Context, msg: &MsgSubmitReportCard) -> Result<()> {
        let mut card = self.report_card(ctx, &msg.servicer)?;
        card.update(&msg.scores);
        self.set_report_card(ctx, &msg.servicer, &card)?;
        tracing::debug!(servicer = %msg.servicer, sessions = card.total_sessions, "report card updated");
        Ok(())
    }
}
