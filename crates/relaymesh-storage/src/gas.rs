//! Gas accounting for store access
//!
//! Gas is informational: it is reported in the transaction result but
//! never aborts execution.

use serde::{Deserialize, Serialize};
use std::cell::Cell;

/// Gas schedule for store operations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasConfig {
    pub read_flat: u64,
    pub read_per_byte: u64,
    pub write_flat: u64,
    pub write_per_byte: u64,
    pub delete_flat: u64,
    pub iter_next_flat: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            read_flat: 1_000,
            read_per_byte: 3,
            write_flat: 2_000,
            write_per_byte: 30,
            delete_flat: 1_000,
            iter_next_flat: 30,
        }
    }
}

/// Running gas total; interior-mutable so reads can charge through `&self`
#[derive(Debug, Default)]
pub struct GasMeter {
    config: GasConfig,
    consumed: Cell<u64>,
}

impl GasMeter {
    pub fn new(config: GasConfig) -> Self {
        Self {
            config,
            consumed: Cell::new(0),
        }
    }

    pub fn consume(&self, amount: u64) {
        self.consumed.set(self.consumed.get().saturating_add(amount));
    }

    pub fn charge_read(&self, key: &[u8], value: Option<&[u8]>) {
        let bytes = key.len() + value.map(<[u8]>::len).unwrap_or(0);
        self.consume(
            self.config
                .read_flat
                .saturating_add(self.config.read_per_byte.saturating_mul(bytes as u64)),
        );
    }

    pub fn charge_write(&self, key: &[u8], value: &[u8]) {
        let bytes = (key.len() + value.len()) as u64;
        self.consume(
            self.config
                .write_flat
                .saturating_add(self.config.write_per_byte.saturating_mul(bytes)),
        );
    }

    pub fn charge_delete(&self) {
        self.consume(self.config.delete_flat);
    }

    pub fn charge_iter_next(&self, key: &[u8], value: &[u8]) {
        let bytes = (key.len() + value.len()) as u64;
        self.consume(
            self.config
                .iter_next_flat
                .saturating_add(self.config.read_per_byte.saturating_mul(bytes)),
        );
    }

    pub fn consumed(&self) -> u64 {
        self.consumed.get()
    }

    /// Zero the meter, returning what was consumed
    pub fn reset(&self) -> u64 {
        self.consumed.replace(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_charges() {
        let meter = GasMeter::new(GasConfig::default());
        meter.charge_read(b"key", Some(b"value"));
        assert_eq!(meter.consumed(), 1_000 + 3 * 8);
        meter.charge_write(b"k", b"v");
        assert_eq!(meter.consumed(), 1_024 + 2_000 + 60);
        assert_eq!(meter.reset(), 3_084);
        assert_eq!(meter.consumed(), 0);
    }

    #[test]
    fn test_gas_saturates() {
        let meter = GasMeter::default();
        meter.consume(u64::MAX);
        meter.consume(5);
        assert_eq!(meter.consumed(), u64::MAX);
    }
}
