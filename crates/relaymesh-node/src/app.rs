//! # Block Executor
//!
//! [`App`] drives the staking state machine through the consensus
//! callbacks over a committed [`MemDb`]:
//!
//! ```text
//! init_chain ─▶ begin_block ─▶ deliver_tx* ─▶ end_block ─▶ commit ─┐
//!                    ▲                                             │
//!                    └─────────────────────────────────────────────┘
//! ```
//!
//! One block is open at a time. Any error from `begin_block`, `end_block`
//! or `commit` leaves the open block unusable and the host must halt.
//! Queries read committed snapshots and never see the open block.

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::genesis::GenesisDoc;
use crate::metrics::NodeMetrics;
use relaymesh_core::events::EventKind;
use relaymesh_core::time::BlockTime;
use relaymesh_core::tx::TxEncoding;
use relaymesh_core::types::{modules, Address, BlockHeader, ConsensusParams, Evidence, LivenessSignal, ValidatorUpdate};
use relaymesh_staking::{Bank, Context, EndBlockSummary, Querier, StakeManager, TxResult};
use relaymesh_storage::{LayeredStore, MemDb};
use serde_json::{json, Value};

struct OpenBlock {
    ctx: Context,
    span: tracing::Span,
}

/// Consensus-facing executor of the staking core
pub struct App {
    db: MemDb,
    manager: StakeManager,
    chain_id: String,
    consensus: ConsensusParams,
    cache_capacity: usize,
    metrics: Option<NodeMetrics>,
    block: Option<OpenBlock>,
    initialized: bool,
    last_time: BlockTime,
}

impl App {
    pub fn new(config: &NodeConfig) -> Result<Self> {
        let metrics = if config.metrics.enabled {
            Some(NodeMetrics::new(&config.metrics)?)
        } else {
            None
        };
        Ok(Self {
            db: MemDb::new(config.node.keep_recent),
            manager: StakeManager::new(),
            chain_id: config.node.chain_id.clone(),
            consensus: config.state.consensus_params(),
            cache_capacity: config.state.entity_cache_capacity,
            metrics,
            block: None,
            initialized: false,
            last_time: BlockTime::default(),
        })
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn metrics(&self) -> Option<&NodeMetrics> {
        self.metrics.as_ref()
    }

    pub fn manager(&self) -> &StakeManager {
        &self.manager
    }

    /// Last committed height
    pub fn height(&self) -> i64 {
        self.db.latest_height()
    }

    /// Hash of the last committed state
    pub fn app_hash(&self) -> [u8; 32] {
        self.db.latest().hash()
    }

    fn context(&self, store: LayeredStore, height: i64, time: BlockTime, proposer: Address) -> Context {
        let header = BlockHeader {
            chain_id: self.chain_id.clone(),
            height,
            time,
            proposer,
        };
        Context::new(store, header, self.consensus.clone(), self.cache_capacity)
    }

    fn check_chain_id(&self, got: &str) -> Result<()> {
        if got != self.chain_id {
            return Err(NodeError::ChainIdMismatch {
                expected: self.chain_id.clone(),
                got: got.to_string(),
            });
        }
        Ok(())
    }

    /// Load the genesis state at height 0 and return the initial validator set
    pub fn init_chain(&mut self, genesis: &GenesisDoc) -> Result<Vec<ValidatorUpdate>> {
        if self.initialized || self.height() > 0 {
            return Err(NodeError::AlreadyInitialized(self.height()));
        }
        self.check_chain_id(&genesis.chain_id)?;
        genesis.validate()?;

        let mut ctx = self.context(
            LayeredStore::new(self.db.latest()),
            0,
            genesis.genesis_time,
            Address::default(),
        );
        let updates = self.manager.init_genesis(&mut ctx, &genesis.app_state)?;
        self.observe_state(&ctx)?;
        let mut store = ctx.into_store();
        let hash = self.db.commit(0, store.take_changes()?)?;
        self.initialized = true;
        self.last_time = genesis.genesis_time;
        tracing::info!(
            chain_id = %self.chain_id,
            validators = updates.len(),
            app_hash = %hex::encode(hash),
            "chain initialized"
        );
        Ok(updates)
    }

    /// Open the next block; returns the features activated at its height
    pub fn begin_block(
        &mut self,
        header: BlockHeader,
        signals: &[LivenessSignal],
        evidence: &[Evidence],
    ) -> Result<Vec<String>> {
        if let Some(open) = &self.block {
            return Err(NodeError::BlockInProgress(open.ctx.height()));
        }
        self.check_chain_id(&header.chain_id)?;
        let expected = self.height() + 1;
        if header.height != expected {
            return Err(NodeError::UnexpectedHeight {
                expected,
                got: header.height,
            });
        }

        let span = tracing::info_span!("block", height = header.height);
        let mut ctx = Context::new(
            LayeredStore::new(self.db.latest()),
            header,
            self.consensus.clone(),
            self.cache_capacity,
        );
        let activated = span.in_scope(|| self.manager.begin_block(&mut ctx, signals, evidence))?;
        for feature in &activated {
            span.in_scope(|| tracing::info!(feature = %feature, "feature activated"));
        }
        self.block = Some(OpenBlock { ctx, span });
        Ok(activated)
    }

    /// Wire encoding expected for transactions in the open block
    pub fn tx_encoding(&self) -> Result<TxEncoding> {
        let open = self.block.as_ref().ok_or(NodeError::NoOpenBlock)?;
        Ok(TxEncoding::for_height(
            open.ctx.height(),
            open.ctx.upgrade().codec_upgrade_height,
        ))
    }

    /// Execute one raw transaction inside the open block
    pub fn deliver_tx(&mut self, raw: &[u8]) -> Result<TxResult> {
        let manager = &self.manager;
        let open = self.block.as_mut().ok_or(NodeError::NoOpenBlock)?;
        let result = open.span.in_scope(|| manager.deliver_tx(&mut open.ctx, raw));
        if let Some(metrics) = &self.metrics {
            metrics.txs_delivered.inc();
            if !result.is_ok() {
                metrics.txs_failed.inc();
            }
        }
        Ok(result)
    }

    /// Run the end-block steps of the open block
    pub fn end_block(&mut self) -> Result<EndBlockSummary> {
        let manager = &self.manager;
        let open = self.block.as_mut().ok_or(NodeError::NoOpenBlock)?;
        let summary = open.span.in_scope(|| manager.end_block(&mut open.ctx))?;
        if cfg!(debug_assertions) {
            manager.assert_invariants(&open.ctx)?;
        }
        let slashes = open
            .ctx
            .events_since(0)
            .iter()
            .filter(|e| e.kind == EventKind::Slash)
            .count();
        open.span.in_scope(|| {
            tracing::debug!(
                released = summary.released,
                completed_servicers = summary.completed_servicers,
                completed_requestors = summary.completed_requestors,
                validator_updates = summary.validator_updates.len(),
                "end block"
            )
        });
        if let Some(metrics) = &self.metrics {
            metrics.slashes.inc_by(slashes as u64);
            metrics
                .unstakes_completed
                .inc_by((summary.completed_servicers + summary.completed_requestors) as u64);
        }
        Ok(summary)
    }

    /// Persist the open block and return the new state hash
    pub fn commit(&mut self) -> Result<[u8; 32]> {
        let open = self.block.take().ok_or(NodeError::NoOpenBlock)?;
        self.observe_state(&open.ctx)?;
        let height = open.ctx.height();
        let time = open.ctx.header().time;
        let mut store = open.ctx.into_store();
        let hash = self.db.commit(height, store.take_changes()?)?;
        self.last_time = time;
        open.span
            .in_scope(|| tracing::info!(app_hash = %hex::encode(hash), "block committed"));
        Ok(hash)
    }

    fn observe_state(&self, ctx: &Context) -> Result<()> {
        let Some(metrics) = &self.metrics else {
            return Ok(());
        };
        let staked = self.manager.staked_servicer_count(ctx)?;
        let pool = self.manager.bank().module_balance(ctx, modules::STAKED_POOL)?;
        metrics.block_height.set(ctx.height());
        metrics.staked_servicers.set(i64::try_from(staked).unwrap_or(i64::MAX));
        metrics.staked_pool_tokens.set(pool as f64);
        Ok(())
    }

    /// Read-only context over the snapshot at `height` (0 means latest)
    fn read_context(&self, height: i64) -> Result<Context> {
        let snapshot = self.db.snapshot_at(height)?;
        let mut ctx = self.context(
            LayeredStore::new(snapshot.clone()),
            snapshot.height(),
            self.last_time,
            Address::default(),
        );
        let params = self.manager.load_params(&ctx)?;
        ctx.set_params(params);
        let upgrade = self.manager.load_upgrade(&ctx)?;
        ctx.set_upgrade(upgrade);
        Ok(ctx)
    }

    /// Answer a query path at `height`
    ///
    /// Always returns a response object: `{code, codespace, log, height,
    /// result}` with code 0 on success.
    pub fn query(&self, path: &str, data: &Value, height: i64) -> Value {
        let answer = self.read_context(height).and_then(|ctx| {
            let result = Querier::new(&self.manager, &ctx).route(path, data)?;
            Ok((ctx.height(), result))
        });
        match answer {
            Ok((height, result)) => json!({
                "code": 0,
                "codespace": "",
                "log": "",
                "height": height,
                "result": result,
            }),
            Err(e) => {
                let (code, codespace) = match &e {
                    NodeError::Staking(err) => (err.code(), err.codespace()),
                    NodeError::Store(err) => {
                        let err = relaymesh_core::StakingError::from(err.clone());
                        (err.code(), err.codespace())
                    }
                    _ => (1, "node"),
                };
                tracing::debug!(path, height, error = %e, "query failed");
                json!({
                    "code": code,
                    "codespace": codespace,
                    "log": e.to_string(),
                    "height": height,
                    "result": Value::Null,
                })
            }
        }
    }

    /// Export the latest committed state as a genesis document
    pub fn export(&self) -> Result<GenesisDoc> {
        let ctx = self.read_context(0)?;
        Ok(GenesisDoc {
            chain_id: self.chain_id.clone(),
            genesis_time: self.last_time,
            app_state: self.manager.export_genesis(&ctx)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymesh_core::params::Params;
    use relaymesh_staking::GenesisState;

    fn genesis_time() -> BlockTime {
        chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc)
    }

    fn app() -> App {
        let mut app = App::new(&NodeConfig::default()).unwrap();
        let doc = GenesisDoc {
            chain_id: app.chain_id().to_string(),
            genesis_time: genesis_time(),
            app_state: GenesisState {
                params: Params::default(),
                ..GenesisState::default()
            },
        };
        app.init_chain(&doc).unwrap();
        app
    }

    fn header(app: &App, height: i64) -> BlockHeader {
        BlockHeader {
            chain_id: app.chain_id().to_string(),
            height,
            time: genesis_time() + chrono::Duration::minutes(height),
            proposer: Address::new([0xee; 20]),
        }
    }

    #[test]
    fn test_block_sequence_enforced() {
        let mut app = app();
        assert!(matches!(
            app.begin_block(header(&app, 2), &[], &[]),
            Err(NodeError::UnexpectedHeight { expected: 1, got: 2 })
        ));
        assert!(matches!(app.end_block(), Err(NodeError::NoOpenBlock)));

        let h1 = header(&app, 1);
        app.begin_block(h1.clone(), &[], &[]).unwrap();
        assert!(matches!(
            app.begin_block(h1, &[], &[]),
            Err(NodeError::BlockInProgress(1))
        ));
        app.end_block().unwrap();
        app.commit().unwrap();
        assert_eq!(app.height(), 1);
    }

    #[test]
    fn test_rejects_foreign_chain() {
        let mut app = app();
        let mut h1 = header(&app, 1);
        h1.chain_id = "other".into();
        assert!(matches!(
            app.begin_block(h1, &[], &[]),
            Err(NodeError::ChainIdMismatch { .. })
        ));
    }

    #[test]
    fn test_undecodable_tx_counts_as_failed() {
        let mut app = app();
        app.begin_block(header(&app, 1), &[], &[]).unwrap();
        let result = app.deliver_tx(&[0xff, 0x00]).unwrap();
        assert!(!result.is_ok());
        let metrics = app.metrics().unwrap();
        assert_eq!(metrics.txs_delivered.get(), 1);
        assert_eq!(metrics.txs_failed.get(), 1);
    }

    #[test]
    fn test_query_response_shape() {
        let app = app();
        let ok = app.query("params", &Value::Null, 0);
        assert_eq!(ok["code"], 0);
        assert_eq!(ok["height"], 0);
        assert!(ok["result"].is_object());

        let unknown = app.query("nodes", &Value::Null, 0);
        assert_eq!(unknown["code"], 704);
        assert_eq!(unknown["codespace"], "sdk");

        let missing = app.query("params", &Value::Null, 50);
        assert_ne!(missing["code"], 0);
        assert!(missing["result"].is_null());
    }

    #[test]
    fn test_init_twice_rejected() {
        let mut app = app();
        let doc = app.export().unwrap();
        assert!(matches!(app.init_chain(&doc), Err(NodeError::AlreadyInitialized(0))));
    }
}
