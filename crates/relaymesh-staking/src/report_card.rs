//! Report cards and report records
//!
//! Report cards hold each servicer's rolling quality averages. Report
//! records are keyed by `(session hash, servicer)` and guard against a
//! second report for the same pair until the session ages out of the
//! evidence window.

use crate::bank::Bank;
use crate::context::Context;
use crate::entity::ReportCard;
use crate::keys;
use crate::staking::StakeManager;
use relaymesh_core::codec::decode_value;
use relaymesh_core::error::Result;
use relaymesh_core::tx::{ReportScores, SessionHeader};
use relaymesh_core::types::Address;
use serde::{Deserialize, Serialize};

/// Outcome recorded for a report submission
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutcome {
    /// Report folded into the card and rewarded
    Accepted,
    /// Report showed no activity; the servicer was slashed
    NoActivity,
    /// Report contradicted on-chain state; the fisherman was slashed
    FalseReport,
}

impl ReportOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::NoActivity => "no_activity",
            Self::FalseReport => "false_report",
        }
    }
}

/// Stored record of one report submission
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub session: SessionHeader,
    pub servicer: Address,
    pub fisherman: Address,
    pub relays: u64,
    pub scores: ReportScores,
    pub outcome: ReportOutcome,
    /// Height the report was submitted at
    pub submitted_at: i64,
}

impl<B: Bank> StakeManager<B> {
    pub fn report_card(&self, ctx: &Context, addr: &Address) -> Result<ReportCard> {
        Ok(ctx.get(&keys::report_card(addr))?.unwrap_or_default())
    }

    pub fn set_report_card(&self, ctx: &mut Context, addr: &Address, card: &ReportCard) -> Result<()> {
        ctx.set(keys::report_card(addr), card)
    }

    pub fn has_report(&self, ctx: &Context, session: &SessionHeader, servicer: &Address) -> bool {
        ctx.has(&keys::report_record(&session.hash(), servicer))
    }

    pub(crate) fn record_report(&self, ctx: &mut Context, record: &ReportRecord) -> Result<()> {
        ctx.set(keys::report_record(&record.session.hash(), &record.servicer), record)
    }

    /// Live report records in key order
    pub fn report_records(&self, ctx: &Context) -> Result<Vec<ReportRecord>> {
        let mut it = ctx.iter_prefix(&[keys::REPORT_RECORD]);
        let raw: Vec<_> = it.by_ref().collect();
        it.close();
        raw.into_iter()
            .map(|(_, value)| Ok(decode_value::<ReportRecord>(&value)?))
            .collect()
    }

    /// Drop records whose session is older than `max_evidence_age_blocks`
    pub fn prune_report_records(&self, ctx: &mut Context) -> Result<usize> {
        let horizon = ctx
            .height()
            .saturating_sub(i64::try_from(ctx.params().max_evidence_age_blocks).unwrap_or(i64::MAX));
        let mut it = ctx.iter_prefix(&[keys::REPORT_RECORD]);
        let raw: Vec<_> = it.by_ref().collect();
        it.close();

        let mut pruned = 0;
        for (key, value) in raw {
            let record = decode_value::<ReportRecord>(&value)?;
            if record.session.session_height < horizon {
                ctx.delete(&key);
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::debug!(pruned, horizon, "pruned report records");
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;
    use relaymesh_core::math::Dec;

    fn record(session_height: i64, servicer: u8) -> ReportRecord {
        ReportRecord {
            session: SessionHeader {
                requestor: Address::new([9; 20]),
                chain: "0001".into(),
                session_height,
            },
            servicer: Address::new([servicer; 20]),
            fisherman: Address::new([7; 20]),
            relays: 10,
            scores: ReportScores {
                latency: Dec::ONE,
                availability: Dec::ONE,
                reliability: Dec::ONE,
            },
            outcome: ReportOutcome::Accepted,
            submitted_at: session_height + 4,
        }
    }

    #[test]
    fn test_missing_card_is_default() {
        let ctx = test_context(1);
        let manager = StakeManager::new();
        let card = manager.report_card(&ctx, &Address::new([1; 20])).unwrap();
        assert_eq!(card.total_sessions, 0);
    }

    #[test]
    fn test_prune_keeps_recent_sessions() {
        let mut ctx = test_context(200);
        let manager = StakeManager::new();
        let old = record(1, 1);
        let recent = record(150, 2);
        manager.record_report(&mut ctx, &old).unwrap();
        manager.record_report(&mut ctx, &recent).unwrap();
        assert!(manager.has_report(&ctx, &old.session, &old.servicer));

        // horizon is 200 - 120 = 80
        assert_eq!(manager.prune_report_records(&mut ctx).unwrap(), 1);
        assert!(!manager.has_report(&ctx, &old.session, &old.servicer));
        assert_eq!(manager.report_records(&ctx).unwrap(), vec![recent]);
    }
}
