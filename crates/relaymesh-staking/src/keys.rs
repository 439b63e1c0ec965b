//! # Store Key Layout
//!
//! Every category lives under a single-byte prefix so it can be scanned on
//! its own. Key schemas are consensus-critical; changing one is a hard fork.
//!
//! | Prefix | Key suffix | Value |
//! |--------|------------|-------|
//! | 0x01 | address | servicer |
//! | 0x02 | power (u64 BE) ‖ !address | address |
//! | 0x03 | completion time | addresses maturing at that time |
//! | 0x04 | address | request height |
//! | 0x05 | address | signing info |
//! | 0x06 | address | missed-block ring |
//! | 0x07 | - | previous proposer |
//! | 0x08 | address | report card |
//! | 0x09 | chain ‖ address | empty |
//! | 0x0A | geo zone ‖ address | empty |
//! | 0x0B | address | requestor |
//! | 0x0C | completion time | requestor addresses |
//! | 0x0D | chain ‖ address | empty |
//! | 0x0E | geo zone ‖ address | empty |
//! | 0x10 | - | params |
//! | 0x11 | - | upgrade state |
//! | 0x12 | feature name | activation height |
//! | 0x13 | address | last consensus power |
//! | 0x14 | address | discount key marker |
//! | 0x15 | address | fisherman marker |
//! | 0x16 | session hash ‖ address | report record |
//! | 0x17 | - | staked servicer count |
//! | 0x20 | address ‖ denom | balance |
//! | 0x21 | denom | total supply |

use relaymesh_core::time::{time_key, BlockTime};
use relaymesh_core::types::{Address, ChainId, GeoZone};

pub const SERVICER: u8 = 0x01;
pub const STAKING_SET: u8 = 0x02;
pub const SERVICER_UNSTAKING_QUEUE: u8 = 0x03;
pub const WAITING_TO_UNSTAKE: u8 = 0x04;
pub const SIGNING_INFO: u8 = 0x05;
pub const MISSED_BLOCKS: u8 = 0x06;
pub const PREVIOUS_PROPOSER: u8 = 0x07;
pub const REPORT_CARD: u8 = 0x08;
pub const SERVICER_BY_CHAIN: u8 = 0x09;
pub const SERVICER_BY_GEO: u8 = 0x0A;
pub const REQUESTOR: u8 = 0x0B;
pub const REQUESTOR_UNSTAKING_QUEUE: u8 = 0x0C;
pub const REQUESTOR_BY_CHAIN: u8 = 0x0D;
pub const REQUESTOR_BY_GEO: u8 = 0x0E;
pub const PARAMS: u8 = 0x10;
pub const UPGRADE: u8 = 0x11;
pub const ACTIVATED_FEATURES: u8 = 0x12;
pub const LAST_VALIDATOR_POWER: u8 = 0x13;
pub const DISCOUNT_KEY: u8 = 0x14;
pub const FISHERMAN: u8 = 0x15;
pub const REPORT_RECORD: u8 = 0x16;
pub const STAKED_SERVICER_COUNT: u8 = 0x17;
pub const BALANCE: u8 = 0x20;
pub const SUPPLY: u8 = 0x21;

fn with_address(prefix: u8, addr: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(21);
    key.push(prefix);
    key.extend_from_slice(addr.as_bytes());
    key
}

/// Length-prefixed identifier segment so shorter ids never alias longer ones
fn with_segment(prefix: u8, segment: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + segment.len() + 20);
    key.push(prefix);
    key.push(segment.len() as u8);
    key.extend_from_slice(segment);
    key
}

pub fn servicer(addr: &Address) -> Vec<u8> {
    with_address(SERVICER, addr)
}

pub fn requestor(addr: &Address) -> Vec<u8> {
    with_address(REQUESTOR, addr)
}

/// `prefix ‖ power_be_u64 ‖ !address`; reverse iteration yields highest
/// power first, ties broken smaller address first
pub fn staking_set(power: u64, addr: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(29);
    key.push(STAKING_SET);
    key.extend_from_slice(&power.to_be_bytes());
    key.extend_from_slice(&addr.inverted());
    key
}

/// Address encoded in a staking-set key
pub fn address_from_staking_set(key: &[u8]) -> Option<Address> {
    key.get(9..29).and_then(|b| Address::from_inverted(b).ok())
}

/// Power encoded in a staking-set key
pub fn power_from_staking_set(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.get(1..9)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

pub fn unstaking_queue(prefix: u8, time: &BlockTime) -> Vec<u8> {
    let mut key = vec![prefix];
    key.extend_from_slice(&time_key(time));
    key
}

pub fn waiting_to_unstake(addr: &Address) -> Vec<u8> {
    with_address(WAITING_TO_UNSTAKE, addr)
}

pub fn signing_info(addr: &Address) -> Vec<u8> {
    with_address(SIGNING_INFO, addr)
}

pub fn missed_blocks(addr: &Address) -> Vec<u8> {
    with_address(MISSED_BLOCKS, addr)
}

pub fn previous_proposer() -> Vec<u8> {
    vec![PREVIOUS_PROPOSER]
}

pub fn report_card(addr: &Address) -> Vec<u8> {
    with_address(REPORT_CARD, addr)
}

pub fn by_chain(prefix: u8, chain: &ChainId, addr: &Address) -> Vec<u8> {
    let mut key = with_segment(prefix, &chain.key_bytes());
    key.extend_from_slice(addr.as_bytes());
    key
}

pub fn by_chain_prefix(prefix: u8, chain: &ChainId) -> Vec<u8> {
    with_segment(prefix, &chain.key_bytes())
}

pub fn by_geo(prefix: u8, zone: &GeoZone, addr: &Address) -> Vec<u8> {
    let mut key = with_segment(prefix, &zone.key_bytes());
    key.extend_from_slice(addr.as_bytes());
    key
}

/// Trailing address of a secondary-index key
pub fn trailing_address(key: &[u8]) -> Option<Address> {
    key.len()
        .checked_sub(20)
        .and_then(|start| Address::from_slice(&key[start..]).ok())
}

pub fn params() -> Vec<u8> {
    vec![PARAMS]
}

pub fn upgrade() -> Vec<u8> {
    vec![UPGRADE]
}

pub fn activated_feature(name: &str) -> Vec<u8> {
    let mut key = vec![ACTIVATED_FEATURES];
    key.extend_from_slice(name.as_bytes());
    key
}

pub fn last_validator_power(addr: &Address) -> Vec<u8> {
    with_address(LAST_VALIDATOR_POWER, addr)
}

pub fn discount_key(addr: &Address) -> Vec<u8> {
    with_address(DISCOUNT_KEY, addr)
}

pub fn fisherman(addr: &Address) -> Vec<u8> {
    with_address(FISHERMAN, addr)
}

pub fn report_record(session_hash: &[u8; 32], servicer: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(53);
    key.push(REPORT_RECORD);
    key.extend_from_slice(session_hash);
    key.extend_from_slice(servicer.as_bytes());
    key
}

pub fn staked_servicer_count() -> Vec<u8> {
    vec![STAKED_SERVICER_COUNT]
}

pub fn balance(addr: &Address, denom: &str) -> Vec<u8> {
    let mut key = with_address(BALANCE, addr);
    key.extend_from_slice(denom.as_bytes());
    key
}

pub fn supply(denom: &str) -> Vec<u8> {
    let mut key = vec![SUPPLY];
    key.extend_from_slice(denom.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staking_set_key_layout() {
        let addr = Address::new([0x11; 20]);
        let key = staking_set(15_000, &addr);
        assert_eq!(key.len(), 29);
        assert_eq!(key[0], STAKING_SET);
        assert_eq!(power_from_staking_set(&key), Some(15_000));
        assert_eq!(address_from_staking_set(&key), Some(addr));
    }

    #[test]
    fn test_staking_set_order() {
        let low = Address::new([1; 20]);
        let high = Address::new([2; 20]);
        // higher power sorts after lower power
        assert!(staking_set(10, &high) > staking_set(9, &low));
        // equal power: smaller address sorts last, so reverse iteration sees it first
        assert!(staking_set(10, &low) > staking_set(10, &high));
    }

    #[test]
    fn test_secondary_index_keys() {
        let chain = ChainId::parse("0001", 2).unwrap();
        let addr = Address::new([7; 20]);
        let key = by_chain(SERVICER_BY_CHAIN, &chain, &addr);
        assert!(key.starts_with(&by_chain_prefix(SERVICER_BY_CHAIN, &chain)));
        assert_eq!(trailing_address(&key), Some(addr));

        let short = ChainId::parse("01", 2).unwrap();
        assert!(!key.starts_with(&by_chain_prefix(SERVICER_BY_CHAIN, &short)));
    }
}
