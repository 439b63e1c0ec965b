//! Block script replay

use crate::app::App;
use crate::error::Result;
use crate::genesis::{BlockScript, GenesisDoc};
use relaymesh_core::tx::encode_tx;
use relaymesh_core::types::BlockHeader;

/// Outcome of one replayed block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayedBlock {
    pub height: i64,
    pub app_hash: [u8; 32],
    pub txs_ok: usize,
    pub txs_failed: usize,
    pub validator_updates: usize,
}

/// Initialize `app` from `genesis` and run every block of `script`
pub fn replay(app: &mut App, genesis: &GenesisDoc, script: &BlockScript) -> Result<Vec<ReplayedBlock>> {
    app.init_chain(genesis)?;
    let mut out = Vec::with_capacity(script.blocks.len());
    for block in &script.blocks {
        let height = app.height() + 1;
        let header = BlockHeader {
            chain_id: app.chain_id().to_string(),
            height,
            time: block.time,
            proposer: block.proposer,
        };
        app.begin_block(header, &block.signals, &block.evidence)?;

        let encoding = app.tx_encoding()?;
        let (mut txs_ok, mut txs_failed) = (0, 0);
        for tx in &block.txs {
            let result = app.deliver_tx(&encode_tx(tx, encoding)?)?;
            if result.is_ok() {
                txs_ok += 1;
            } else {
                tracing::info!(height, hash = %result.hash, code = result.code, log = %result.log, "tx failed");
                txs_failed += 1;
            }
        }

        let summary = app.end_block()?;
        let app_hash = app.commit()?;
        out.push(ReplayedBlock {
            height,
            app_hash,
            txs_ok,
            txs_failed,
            validator_updates: summary.validator_updates.len(),
        });
    }
    Ok(out)
}
