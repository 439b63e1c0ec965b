//! Genesis documents and block scripts
//!
//! A genesis document wraps the staking genesis state with the chain id and
//! genesis time. A block script is a JSON list of blocks the `replay`
//! command feeds through the executor.

use crate::error::{NodeError, Result};
use relaymesh_core::time::BlockTime;
use relaymesh_core::tx::Tx;
use relaymesh_core::types::{Address, Evidence, LivenessSignal};
use relaymesh_staking::GenesisState;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Genesis file contents
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisDoc {
    pub chain_id: String,
    pub genesis_time: BlockTime,
    pub app_state: GenesisState,
}

impl GenesisDoc {
    /// Check the wrapped state without executing it
    pub fn validate(&self) -> Result<()> {
        if self.chain_id.is_empty() {
            return Err(NodeError::InvalidConfig("genesis chain_id is empty".into()));
        }
        self.app_state.validate()?;
        Ok(())
    }
}

/// Read and validate a genesis file
pub fn load_genesis(path: &Path) -> Result<GenesisDoc> {
    let contents = std::fs::read_to_string(path)?;
    let doc: GenesisDoc = serde_json::from_str(&contents)?;
    doc.validate()?;
    tracing::debug!(path = %path.display(), chain_id = %doc.chain_id, "genesis loaded");
    Ok(doc)
}

/// One block of a replay script
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptBlock {
    pub time: BlockTime,
    pub proposer: Address,
    #[serde(default)]
    pub signals: Vec<LivenessSignal>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    /// Encoded with the wire format active at the block height
    #[serde(default)]
    pub txs: Vec<Tx>,
}

/// Replay script contents
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockScript {
    pub blocks: Vec<ScriptBlock>,
}

pub fn load_script(path: &Path) -> Result<BlockScript> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymesh_core::params::Params;
    use std::io::Write;

    fn doc() -> GenesisDoc {
        GenesisDoc {
            chain_id: "relaymesh-testnet-1".into(),
            genesis_time: chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
            app_state: GenesisState {
                params: Params::default(),
                ..GenesisState::default()
            },
        }
    }

    #[test]
    fn test_load_genesis_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string_pretty(&doc()).unwrap().as_bytes())
            .unwrap();
        assert_eq!(load_genesis(file.path()).unwrap(), doc());
    }

    #[test]
    fn test_load_genesis_rejects_empty_chain_id() {
        let mut bad = doc();
        bad.chain_id.clear();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&bad).unwrap().as_bytes()).unwrap();
        assert!(matches!(load_genesis(file.path()), Err(NodeError::InvalidConfig(_))));
    }

    #[test]
    fn test_script_defaults() {
        let script: BlockScript = serde_json::from_str(
            r#"{"blocks":[{"time":"2024-01-01T00:01:00Z","proposer":"eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee"}]}"#,
        )
        .unwrap();
        assert_eq!(script.blocks.len(), 1);
        assert!(script.blocks[0].txs.is_empty());
    }
}
