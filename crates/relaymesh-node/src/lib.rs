//! # Relaymesh Node
//!
//! Host glue around the staking core: configuration, logging, metrics, the
//! block executor and genesis/replay file handling.

pub mod app;
pub mod config;
pub mod error;
pub mod genesis;
pub mod logging;
pub mod metrics;
pub mod replay;

pub use app::App;
pub use config::{LogFormat, LoggingConfig, MetricsConfig, NodeConfig};
pub use error::{NodeError, Result};
pub use genesis::{load_genesis, load_script, BlockScript, GenesisDoc, ScriptBlock};
pub use logging::init_logging;
pub use metrics::NodeMetrics;
pub use replay::{replay, ReplayedBlock};
