//! Fixtures shared by the unit tests

use crate::bank::{Bank, StoreBank};
use crate::context::{Context, DEFAULT_CACHE_CAPACITY};
use crate::entity::{Requestor, Servicer};
use crate::staking::StakeManager;
use chrono::{Duration, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use relaymesh_core::params::Params;
use relaymesh_core::time::BlockTime;
use relaymesh_core::types::{modules, Address, BlockHeader, ChainId, ConsensusParams, GeoZone, PublicKey, StakeStatus};
use relaymesh_storage::{LayeredStore, MemDb};

/// Block time of `height`: one minute per block from 2024-01-01
pub(crate) fn block_time(height: i64) -> BlockTime {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(height)
}

/// Fresh context over an empty store with default params
pub(crate) fn test_context(height: i64) -> Context {
    let db = MemDb::new(1);
    let header = BlockHeader {
        chain_id: "relaymesh-test".into(),
        height,
        time: block_time(height),
        proposer: Address::default(),
    };
    let mut ctx = Context::new(
        LayeredStore::new(db.latest()),
        header,
        ConsensusParams::default(),
        DEFAULT_CACHE_CAPACITY,
    );
    ctx.set_params(Params::default());
    ctx
}

/// Move `ctx` to `height`, keeping its uncommitted writes and params
pub(crate) fn advance(ctx: Context, height: i64) -> Context {
    let params = ctx.params().clone();
    let upgrade = ctx.upgrade().clone();
    let header = BlockHeader {
        height,
        time: block_time(height),
        ..ctx.header().clone()
    };
    let consensus = ctx.consensus().clone();
    let mut next = Context::new(ctx.into_store(), header, consensus, DEFAULT_CACHE_CAPACITY);
    next.set_params(params);
    next.set_upgrade(upgrade);
    next
}

pub(crate) fn public_key(seed: u8) -> PublicKey {
    let key = SigningKey::from_bytes(&[seed; 32]);
    PublicKey::ed25519(key.verifying_key().to_bytes()).unwrap()
}

pub(crate) fn chain(id: &str) -> ChainId {
    ChainId::parse(id, 2).unwrap()
}

pub(crate) fn zone(id: &str) -> GeoZone {
    GeoZone::parse(id, 2).unwrap()
}

/// Staked servicer on chain `0001`, zone `0001`
pub(crate) fn servicer_fixture(seed: u8, tokens: u128) -> Servicer {
    let public_key = public_key(seed);
    Servicer {
        address: public_key.address(),
        public_key,
        jailed: false,
        paused: false,
        paused_at: None,
        status: StakeStatus::Staked,
        chains: vec![chain("0001")],
        geo_zones: vec![zone("0001")],
        service_url: "https://x.io:443".into(),
        staked_tokens: tokens,
        unstaking_time: None,
        output_address: None,
    }
}

/// Staked requestor on chain `0001`
pub(crate) fn requestor_fixture(seed: u8, tokens: u128, max_relays: u64) -> Requestor {
    let public_key = public_key(seed);
    Requestor {
        address: public_key.address(),
        public_key,
        status: StakeStatus::Staked,
        chains: vec![chain("0001")],
        geo_zones: vec![zone("0001")],
        staked_tokens: tokens,
        max_relays,
        servicers_per_session: 5,
        unstaking_time: None,
    }
}

impl StakeManager<StoreBank> {
    /// Persist a servicer and mint its stake into the pool
    pub(crate) fn stake_fixture(&self, ctx: &mut Context, servicer: &Servicer) {
        self.bank()
            .mint_coins(ctx, modules::STAKED_POOL, servicer.staked_tokens)
            .unwrap();
        self.set_servicer(ctx, servicer).unwrap();
    }

    /// Persist a requestor and mint its stake into the requestor pool
    pub(crate) fn stake_requestor_fixture(&self, ctx: &mut Context, requestor: &Requestor) {
        self.bank()
            .mint_coins(ctx, modules::REQUESTOR_STAKED_POOL, requestor.staked_tokens)
            .unwrap();
        self.set_requestor(ctx, requestor).unwrap();
    }

    /// Credit `amount` to `addr` through the mint account
    pub(crate) fn fund(&self, ctx: &mut Context, addr: &Address, amount: u128) {
        self.bank().mint_coins(ctx, modules::MINT, amount).unwrap();
        self.bank()
            .send_from_module_to_account(ctx, modules::MINT, addr, amount)
            .unwrap();
    }
}
