//! Property tests over random operation sequences

mod common;

use chrono::Duration;
use common::{account, public_key, Chain};
use proptest::prelude::*;
use relaymesh_core::error::StakingError;
use relaymesh_core::math::Dec;
use relaymesh_core::params::Params;
use relaymesh_core::tx::{MsgStakeServicer, ReportScores};
use relaymesh_core::types::{modules, StakeStatus};
use relaymesh_staking::slashing::slash_amounts;
use relaymesh_staking::{Bank, GenesisState, ReportCard, SlashReason, StakedEntity};

#[derive(Clone, Debug)]
enum Op {
    Stake { seed: u8, amount: u128 },
    BeginUnstake { seed: u8 },
    Slash { seed: u8, permille: u128 },
    Pause { seed: u8 },
    Advance { minutes: i64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u8..=4, 15u128..=30).prop_map(|(seed, billions)| Op::Stake {
            seed,
            amount: billions * 1_000_000_000,
        }),
        (1u8..=4).prop_map(|seed| Op::BeginUnstake { seed }),
        (1u8..=4, 0u128..=1000).prop_map(|(seed, permille)| Op::Slash { seed, permille }),
        (1u8..=4).prop_map(|seed| Op::Pause { seed }),
        (1i64..=30).prop_map(|minutes| Op::Advance { minutes }),
    ]
}

fn genesis() -> GenesisState {
    GenesisState {
        params: Params {
            unstaking_time_ms: 10 * 60 * 1000,
            session_block_frequency: 2,
            ..Params::default()
        },
        accounts: (1..=4)
            .map(|seed| account(public_key(seed).address(), 200_000_000_000))
            .collect(),
        ..Default::default()
    }
}

fn fraction(permille: u128) -> Dec {
    Dec::from_ratio(permille, 1000).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every block runs the invariant check; this drives it through
    /// stakes, edits, unstakes, slashes and queue maturity.
    #[test]
    fn prop_pool_matches_entities(ops in prop::collection::vec(op(), 1..25)) {
        let mut chain = Chain::start(&genesis());
        for op in ops {
            let time = match op {
                Op::Advance { minutes } => chain.time + Duration::minutes(minutes),
                _ => chain.time + Duration::minutes(1),
            };
            chain.block_at(time, &[], |m, ctx| {
                let _ = match op {
                    Op::Stake { seed, amount } => {
                        let signer = public_key(seed).address();
                        let msg = MsgStakeServicer {
                            public_key: public_key(seed),
                            chains: vec!["0001".into()],
                            geo_zones: vec!["0001".into()],
                            service_url: "https://x.io:443".into(),
                            amount,
                            output_address: None,
                        };
                        ctx.with_branch(|ctx| m.handle_stake_servicer(ctx, &signer, &msg))
                    }
                    Op::BeginUnstake { seed } => {
                        let addr = public_key(seed).address();
                        ctx.with_branch(|ctx| m.handle_begin_unstake_servicer(ctx, &addr, &addr))
                    }
                    Op::Slash { seed, permille } => {
                        let addr = public_key(seed).address();
                        ctx.with_branch(|ctx| {
                            m.slash(ctx, &addr, fraction(permille), SlashReason::DoubleSign).map(|_| ())
                        })
                    }
                    Op::Pause { seed } => {
                        let addr = public_key(seed).address();
                        ctx.with_branch(|ctx| m.handle_pause_servicer(ctx, &addr, &addr))
                    }
                    Op::Advance { .. } => Ok(()),
                };
            });
        }

        let ctx = chain.read();
        let m = &chain.manager;
        let staked: u128 = m
            .all_servicers(&ctx)
            .unwrap()
            .iter()
            .filter(|s| s.status().holds_stake())
            .map(|s| s.staked_tokens)
            .sum();
        prop_assert_eq!(m.bank().module_balance(&ctx, modules::STAKED_POOL).unwrap(), staked);
        let supply: u128 = 4 * 200_000_000_000;
        prop_assert!(m.bank().total_supply(&ctx).unwrap() <= supply);
    }

    #[test]
    fn prop_report_card_scores_bounded(
        samples in prop::collection::vec((0u128..=1000, 0u128..=1000, 0u128..=1000), 1..40)
    ) {
        let mut card = ReportCard::default();
        for (l, a, r) in samples {
            card.update(&ReportScores {
                latency: fraction(l),
                availability: fraction(a),
                reliability: fraction(r),
            });
            prop_assert!(card.latency <= Dec::ONE);
            prop_assert!(card.availability <= Dec::ONE);
            prop_assert!(card.reliability <= Dec::ONE);
        }
    }

    #[test]
    fn prop_slash_keeps_floor(tokens in 0u128..1_000_000_000_000_000, first in 0u128..=1000, second in 0u128..=1000) {
        let (kept, burned) = slash_amounts(tokens, fraction(first));
        prop_assert_eq!(kept + burned, tokens);
        prop_assert_eq!(kept, tokens * (1000 - first) / 1000);

        let (again, _) = slash_amounts(kept, fraction(second));
        prop_assert!(again <= kept);
        prop_assert_eq!(again, kept * (1000 - second) / 1000);
    }
}

#[test]
fn test_unjail_on_free_servicer_is_rejected_without_effect() {
    let mut chain = Chain::start(&GenesisState {
        servicers: vec![common::servicer(1, 20_000_000_000)],
        ..Default::default()
    });
    let addr = public_key(1).address();
    let before = chain.manager.export_genesis(&chain.read()).unwrap();

    let (result, _) = chain.block(|m, ctx| ctx.with_branch(|ctx| m.handle_unjail_servicer(ctx, &addr, &addr)));
    assert_eq!(result, Err(StakingError::NotJailed));

    let ctx = chain.read();
    let after = chain.manager.export_genesis(&ctx).unwrap();
    assert_eq!(after.servicers, before.servicers);
    assert_eq!(chain.manager.servicer(&ctx, &addr).unwrap().status, StakeStatus::Staked);
}
