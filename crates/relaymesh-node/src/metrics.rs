//! Prometheus metrics of the block executor
//!
//! Rendered on demand in the text exposition format; no server is run.

use crate::config::MetricsConfig;
use crate::error::Result;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// Executor metrics
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    pub txs_delivered: IntCounter,
    pub txs_failed: IntCounter,
    pub slashes: IntCounter,
    pub unstakes_completed: IntCounter,
    pub block_height: IntGauge,
    pub staked_servicers: IntGauge,
    /// Token amounts exceed `i64`, so the pool balance is a float gauge
    pub staked_pool_tokens: Gauge,
}

impl NodeMetrics {
    /// Create and register every metric under the configured namespace
    pub fn new(config: &MetricsConfig) -> Result<Self> {
        let registry = Registry::new();
        let opts = |name: &str, help: &str| Opts::new(name, help).namespace(config.namespace.clone());

        let txs_delivered = IntCounter::with_opts(opts("txs_delivered_total", "Transactions delivered"))?;
        let txs_failed = IntCounter::with_opts(opts("txs_failed_total", "Transactions that returned an error"))?;
        let slashes = IntCounter::with_opts(opts("slashes_total", "Slash events"))?;
        let unstakes_completed = IntCounter::with_opts(opts(
            "unstakes_completed_total",
            "Servicer and requestor unstakings completed",
        ))?;
        let block_height = IntGauge::with_opts(opts("block_height", "Last executed block height"))?;
        let staked_servicers = IntGauge::with_opts(opts("staked_servicers", "Servicers in the staking set"))?;
        let staked_pool_tokens = Gauge::with_opts(opts("staked_pool_tokens", "Balance of the servicer staked pool"))?;

        registry.register(Box::new(txs_delivered.clone()))?;
        registry.register(Box::new(txs_failed.clone()))?;
        registry.register(Box::new(slashes.clone()))?;
        registry.register(Box::new(unstakes_completed.clone()))?;
        registry.register(Box::new(block_height.clone()))?;
        registry.register(Box::new(staked_servicers.clone()))?;
        registry.register(Box::new(staked_pool_tokens.clone()))?;

        Ok(Self {
            registry,
            txs_delivered,
            txs_failed,
            slashes,
            unstakes_completed,
            block_height,
            staked_servicers,
            staked_pool_tokens,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode every registered metric
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
