//! Block-level harness for the staking integration tests
//!
//! Runs begin-block, a caller-supplied body and end-block against a
//! `MemDb`, checks the state invariants and commits every block.

#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use relaymesh_core::time::BlockTime;
use relaymesh_core::types::{
    Address, BlockHeader, ChainId, ConsensusParams, GeoZone, LivenessSignal, PublicKey, StakeStatus,
};
use relaymesh_staking::{
    Context, EndBlockSummary, GenesisAccount, GenesisState, Servicer, StakeManager, DEFAULT_CACHE_CAPACITY,
};
use relaymesh_storage::{LayeredStore, MemDb};

pub const PROPOSER: Address = Address::new([0xee; 20]);

pub fn genesis_time() -> BlockTime {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn public_key(seed: u8) -> PublicKey {
    let key = SigningKey::from_bytes(&[seed; 32]);
    PublicKey::ed25519(key.verifying_key().to_bytes()).unwrap()
}

pub fn account(address: Address, amount: u128) -> GenesisAccount {
    GenesisAccount { address, amount }
}

/// Staked servicer on chain `0001`, zone `0001`
pub fn servicer(seed: u8, tokens: u128) -> Servicer {
    let public_key = public_key(seed);
    Servicer {
        address: public_key.address(),
        public_key,
        jailed: false,
        paused: false,
        paused_at: None,
        status: StakeStatus::Staked,
        chains: vec![ChainId::parse("0001", 2).unwrap()],
        geo_zones: vec![GeoZone::parse("0001", 2).unwrap()],
        service_url: "https://x.io:443".into(),
        staked_tokens: tokens,
        unstaking_time: None,
        output_address: None,
    }
}

fn context(db: &MemDb, height: i64, time: BlockTime) -> Context {
    let header = BlockHeader {
        chain_id: "relaymesh-scenarios".into(),
        height,
        time,
        proposer: PROPOSER,
    };
    Context::new(
        LayeredStore::new(db.latest()),
        header,
        ConsensusParams::default(),
        DEFAULT_CACHE_CAPACITY,
    )
}

fn commit(db: &MemDb, ctx: Context, height: i64) {
    let mut store = ctx.into_store();
    let changes = store.take_changes().unwrap();
    db.commit(height, changes).unwrap();
}

pub struct Chain {
    pub db: MemDb,
    pub manager: StakeManager,
    pub height: i64,
    pub time: BlockTime,
}

impl Chain {
    pub fn start(genesis: &GenesisState) -> Self {
        let db = MemDb::new(4);
        let manager = StakeManager::new();
        let mut ctx = context(&db, 0, genesis_time());
        manager.init_genesis(&mut ctx, genesis).unwrap();
        commit(&db, ctx, 0);
        Self {
            db,
            manager,
            height: 0,
            time: genesis_time(),
        }
    }

    /// Run the next block at `time`
    pub fn block_at<T>(
        &mut self,
        time: BlockTime,
        signals: &[LivenessSignal],
        body: impl FnOnce(&StakeManager, &mut Context) -> T,
    ) -> (T, EndBlockSummary) {
        self.height += 1;
        self.time = time;
        let mut ctx = context(&self.db, self.height, time);
        self.manager.begin_block(&mut ctx, signals, &[]).unwrap();
        let out = body(&self.manager, &mut ctx);
        let summary = self.manager.end_block(&mut ctx).unwrap();
        self.manager.assert_invariants(&ctx).unwrap();
        commit(&self.db, ctx, self.height);
        (out, summary)
    }

    /// Run the next block one minute after the previous one
    pub fn block<T>(&mut self, body: impl FnOnce(&StakeManager, &mut Context) -> T) -> (T, EndBlockSummary) {
        let time = self.time + Duration::minutes(1);
        self.block_at(time, &[], body)
    }

    pub fn empty_blocks(&mut self, count: usize) {
        for _ in 0..count {
            self.block(|_, _| ());
        }
    }

    /// Read-only context over the latest committed state
    pub fn read(&self) -> Context {
        let mut ctx = context(&self.db, self.height, self.time);
        let params = self.manager.load_params(&ctx).unwrap();
        ctx.set_params(params);
        ctx
    }
}
