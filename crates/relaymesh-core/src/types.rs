//! Core type definitions for relaymesh
//!
//! Addresses, public keys, chain and geo-zone identifiers, entity status,
//! and the values exchanged with the consensus collaborator.

use crate::error::{Result, StakingError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of an address in bytes
pub const ADDRESS_LEN: usize = 20;

/// Address - 20 bytes derived from a public key with BLAKE3
///
/// Address = BLAKE3(public_key_bytes)[..20]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    /// Create an address from raw bytes
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive the address of a public key
    pub fn from_public_key_bytes(public_key: &[u8]) -> Self {
        let hash = blake3::hash(public_key);
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&hash.as_bytes()[..ADDRESS_LEN]);
        Self(bytes)
    }

    /// Address of a named module account
    pub fn for_module(name: &str) -> Self {
        Self::from_public_key_bytes(format!("module:{name}").as_bytes())
    }

    /// Parse from a byte slice of exactly 20 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; ADDRESS_LEN] = bytes
            .try_into()
            .map_err(|_| StakingError::InvalidAddress(hex::encode(bytes)))?;
        Ok(Self(arr))
    }

    /// Parse from hex
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| StakingError::InvalidAddress(s.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Bitwise complement, used to invert address order inside index keys
    pub fn inverted(&self) -> [u8; ADDRESS_LEN] {
        let mut out = self.0;
        for b in out.iter_mut() {
            *b = !*b;
        }
        out
    }

    /// Inverse of [`Address::inverted`]
    pub fn from_inverted(bytes: &[u8]) -> Result<Self> {
        let mut addr = Self::from_slice(bytes)?;
        for b in addr.0.iter_mut() {
            *b = !*b;
        }
        Ok(addr)
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LEN]
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = StakingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Self::from_hex(&s).map_err(serde::de::Error::custom)
        } else {
            <[u8; ADDRESS_LEN]>::deserialize(deserializer).map(Self)
        }
    }
}

/// Public key algorithms understood by the consensus collaborator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicKeyType {
    Ed25519,
    Secp256k1,
}

impl PublicKeyType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::Secp256k1 => "secp256k1",
        }
    }
}

/// Public key with its algorithm tag
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    #[serde(rename = "type")]
    key_type: PublicKeyType,
    #[serde(with = "hex_bytes")]
    bytes: Vec<u8>,
}

impl PublicKey {
    /// Build and validate a public key
    pub fn new(key_type: PublicKeyType, bytes: Vec<u8>) -> Result<Self> {
        match key_type {
            PublicKeyType::Ed25519 => {
                let arr: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StakingError::InvalidPublicKey("ed25519 key must be 32 bytes".into()))?;
                ed25519_dalek::VerifyingKey::from_bytes(&arr)
                    .map_err(|e| StakingError::InvalidPublicKey(e.to_string()))?;
            }
            PublicKeyType::Secp256k1 => {
                if bytes.len() != 33 || !(bytes[0] == 0x02 || bytes[0] == 0x03) {
                    return Err(StakingError::InvalidPublicKey(
                        "secp256k1 key must be 33 compressed bytes".into(),
                    ));
                }
            }
        }
        Ok(Self { key_type, bytes })
    }

    /// Re-run the checks of [`PublicKey::new`] on a decoded key
    pub fn validate(&self) -> Result<()> {
        Self::new(self.key_type, self.bytes.clone()).map(|_| ())
    }

    /// Convenience constructor for an ed25519 key
    pub fn ed25519(bytes: [u8; 32]) -> Result<Self> {
        Self::new(PublicKeyType::Ed25519, bytes.to_vec())
    }

    pub fn key_type(&self) -> PublicKeyType {
        self.key_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Address derived from this key
    pub fn address(&self) -> Address {
        Address::from_public_key_bytes(&self.bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}:{})", self.key_type.name(), hex::encode(&self.bytes))
    }
}

/// Serde helper encoding byte vectors as hex in JSON and raw in bincode
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            hex::decode(s).map_err(serde::de::Error::custom)
        } else {
            Vec::<u8>::deserialize(deserializer)
        }
    }
}

/// Serde helper encoding token amounts as decimal strings in JSON
///
/// JSON numbers cannot carry the full `u128` range through `serde_json::Value`.
pub mod amount_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&amount.to_string())
        } else {
            serializer.serialize_u128(*amount)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            u128::deserialize(deserializer)
        }
    }
}

fn parse_hex_id(s: &str, max_bytes: usize) -> Option<String> {
    let lower = s.to_ascii_lowercase();
    let bytes = hex::decode(&lower).ok()?;
    if bytes.is_empty() || bytes.len() > max_bytes {
        return None;
    }
    Some(lower)
}

/// Identifier of an external chain a servicer relays for (hex, 1..=N bytes)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    /// Parse a chain identifier, allowing at most `max_bytes` decoded bytes
    pub fn parse(s: &str, max_bytes: usize) -> Result<Self> {
        parse_hex_id(s, max_bytes)
            .map(Self)
            .ok_or_else(|| StakingError::InvalidNetworkIdentifier(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decoded bytes, used inside index keys
    pub fn key_bytes(&self) -> Vec<u8> {
        hex::decode(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a geographic zone (hex, 1..=N bytes)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeoZone(String);

impl GeoZone {
    pub fn parse(s: &str, max_bytes: usize) -> Result<Self> {
        parse_hex_id(s, max_bytes)
            .map(Self)
            .ok_or_else(|| StakingError::InvalidGeoZone(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn key_bytes(&self) -> Vec<u8> {
        hex::decode(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for GeoZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status shared by every staked entity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StakeStatus {
    #[default]
    Unstaked,
    Unstaking,
    Staked,
}

impl StakeStatus {
    /// Convert to u8 for storage and filters
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Unstaked => 0,
            Self::Unstaking => 1,
            Self::Staked => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unstaked),
            1 => Some(Self::Unstaking),
            2 => Some(Self::Staked),
            _ => None,
        }
    }

    /// Tokens of entities in this status are escrowed in a staked pool
    pub fn holds_stake(&self) -> bool {
        matches!(self, Self::Staked | Self::Unstaking)
    }
}

/// Header of the block being executed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub chain_id: String,
    pub height: i64,
    pub time: chrono::DateTime<chrono::Utc>,
    /// Consensus address of the block proposer
    pub proposer: Address,
}

/// Consensus parameters relevant to the staking core
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    pub pubkey_types: Vec<PublicKeyType>,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            pubkey_types: vec![PublicKeyType::Ed25519],
        }
    }
}

impl ConsensusParams {
    pub fn accepts(&self, key_type: PublicKeyType) -> bool {
        self.pubkey_types.contains(&key_type)
    }
}

/// Per-validator liveness bit delivered with `BeginBlock`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessSignal {
    pub address: Address,
    pub signed_last_block: bool,
}

/// Double-sign evidence delivered with `BeginBlock`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub address: Address,
    pub height: i64,
    pub time: chrono::DateTime<chrono::Utc>,
}

/// Validator power change returned from `EndBlock`; power 0 removes the validator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorUpdate {
    pub public_key: PublicKey,
    pub power: i64,
}

/// Module account names
pub mod modules {
    /// Escrow of every staked or unstaking servicer's tokens
    pub const STAKED_POOL: &str = "staked_tokens_pool";
    /// Escrow of requestor stakes
    pub const REQUESTOR_STAKED_POOL: &str = "requestor_staked_tokens_pool";
    /// Collects transaction fees and the proposer reward allocation
    pub const FEE_COLLECTOR: &str = "fee_collector";
    /// DAO treasury
    pub const DAO: &str = "dao";
    /// Source account of minted relay rewards
    pub const MINT: &str = "mint";

    pub const ALL: [&str; 5] = [STAKED_POOL, REQUESTOR_STAKED_POOL, FEE_COLLECTOR, DAO, MINT];
}

/// Protocol constants
pub mod constants {
    /// Base units per unit of consensus power
    pub const POWER_REDUCTION: u128 = 1_000_000;

    /// Max length of a service URL
    pub const MAX_SERVICE_URL_LEN: usize = 255;

    /// Decoded byte length of a chain identifier
    pub const NETWORK_IDENTIFIER_LENGTH: usize = 2;

    /// Decoded byte length of a geo-zone identifier
    pub const GEO_ZONE_LENGTH: usize = 2;
}
