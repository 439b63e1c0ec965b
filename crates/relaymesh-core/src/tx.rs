//! Transactions, messages and their wire encodings
//!
//! A transaction carries exactly one message plus a fee, memo, entropy and
//! the signer's public key. Signature verification happens upstream in the
//! consensus layer; the core only derives the signer address.
//!
//! Two encodings exist:
//! - legacy: deterministic JSON, used up to and including the codec upgrade height
//! - versioned: `[TX_FORMAT_V2][u32 BE length][bincode]`, used above it

use crate::codec::CodecError;
use crate::math::Dec;
use crate::types::{amount_string, hex_bytes, Address, PublicKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Leading byte of a versioned transaction
pub const TX_FORMAT_V2: u8 = 0x02;

/// Stake or edit-stake a servicer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgStakeServicer {
    pub public_key: PublicKey,
    pub chains: Vec<String>,
    #[serde(default)]
    pub geo_zones: Vec<String>,
    pub service_url: String,
    #[serde(with = "amount_string")]
    pub amount: u128,
    #[serde(default)]
    pub output_address: Option<Address>,
}

/// Stake or edit-stake a requestor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgStakeRequestor {
    pub public_key: PublicKey,
    pub chains: Vec<String>,
    #[serde(default)]
    pub geo_zones: Vec<String>,
    #[serde(with = "amount_string")]
    pub amount: u128,
    pub servicers_per_session: u8,
}

/// Identifies the session a report card was sampled in
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHeader {
    pub requestor: Address,
    pub chain: String,
    pub session_height: i64,
}

impl SessionHeader {
    /// Stable hash used to key report records. Chain ids are hex, so the
    /// chain is folded to lowercase before hashing.
    pub fn hash(&self) -> [u8; 32] {
        let chain = self.chain.to_ascii_lowercase();
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.requestor.as_bytes());
        hasher.update(&(chain.len() as u32).to_be_bytes());
        hasher.update(chain.as_bytes());
        hasher.update(&self.session_height.to_be_bytes());
        *hasher.finalize().as_bytes()
    }
}

/// Sampled quality scores, each in [0, 1]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportScores {
    pub latency: Dec,
    pub availability: Dec,
    pub reliability: Dec,
}

impl ReportScores {
    pub fn in_bounds(&self) -> bool {
        self.latency <= Dec::ONE && self.availability <= Dec::ONE && self.reliability <= Dec::ONE
    }
}

/// A fisherman's signed quality report for one servicer in one session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSubmitReportCard {
    pub fisherman: Address,
    pub session: SessionHeader,
    pub servicer: Address,
    pub relays: u64,
    pub scores: ReportScores,
}

/// Protocol upgrade plan
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgUpgrade {
    pub height: i64,
    pub version: String,
    /// Feature name to activation height
    #[serde(default)]
    pub features: BTreeMap<String, i64>,
}

/// What a DAO transfer does with the funds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaoAction {
    Transfer,
    Burn,
}

/// Every message the state machine accepts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Msg {
    StakeServicer(MsgStakeServicer),
    BeginUnstakeServicer {
        address: Address,
    },
    UnjailServicer {
        address: Address,
    },
    PauseServicer {
        address: Address,
    },
    UnpauseServicer {
        address: Address,
    },
    Send {
        from: Address,
        to: Address,
        #[serde(with = "amount_string")]
        amount: u128,
    },
    StakeRequestor(MsgStakeRequestor),
    BeginUnstakeRequestor {
        address: Address,
    },
    SubmitReportCard(MsgSubmitReportCard),
    ChangeParam {
        key: String,
        /// JSON text of the new value
        value: String,
    },
    Upgrade(MsgUpgrade),
    IssueDiscountKey {
        requestor: Address,
    },
    RevokeDiscountKey {
        requestor: Address,
    },
    SetFisherman {
        address: Address,
        enabled: bool,
    },
    DaoTransfer {
        action: DaoAction,
        to: Address,
        #[serde(with = "amount_string")]
        amount: u128,
    },
}

impl Msg {
    /// Message type name used in logs and events
    pub fn name(&self) -> &'static str {
        match self {
            Msg::StakeServicer(_) => "stake_servicer",
            Msg::BeginUnstakeServicer { .. } => "begin_unstake_servicer",
            Msg::UnjailServicer { .. } => "unjail_servicer",
            Msg::PauseServicer { .. } => "pause_servicer",
            Msg::UnpauseServicer { .. } => "unpause_servicer",
            Msg::Send { .. } => "send",
            Msg::StakeRequestor(_) => "stake_requestor",
            Msg::BeginUnstakeRequestor { .. } => "begin_unstake_requestor",
            Msg::SubmitReportCard(_) => "submit_report_card",
            Msg::ChangeParam { .. } => "change_param",
            Msg::Upgrade(_) => "upgrade",
            Msg::IssueDiscountKey { .. } => "issue_discount_key",
            Msg::RevokeDiscountKey { .. } => "revoke_discount_key",
            Msg::SetFisherman { .. } => "set_fisherman",
            Msg::DaoTransfer { .. } => "dao_transfer",
        }
    }

    /// Module that handles the message
    pub fn route(&self) -> &'static str {
        match self {
            Msg::StakeServicer(_)
            | Msg::BeginUnstakeServicer { .. }
            | Msg::UnjailServicer { .. }
            | Msg::PauseServicer { .. }
            | Msg::UnpauseServicer { .. } => "servicers",
            Msg::Send { .. } => "bank",
            Msg::StakeRequestor(_) | Msg::BeginUnstakeRequestor { .. } => "requestors",
            Msg::SubmitReportCard(_) => "reports",
            _ => "gov",
        }
    }
}

/// Signer public key and signature bytes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSignature {
    pub public_key: PublicKey,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

/// Transaction envelope
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub msg: Msg,
    /// Fee in the staking denomination
    #[serde(with = "amount_string")]
    pub fee: u128,
    #[serde(default)]
    pub memo: String,
    pub entropy: i64,
    pub signature: TxSignature,
}

impl Tx {
    /// Address of the account that signed the envelope
    pub fn signer(&self) -> Address {
        self.signature.public_key.address()
    }
}

/// Wire encoding selected by block height
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxEncoding {
    Legacy,
    Versioned,
}

impl TxEncoding {
    /// Versioned strictly above the codec upgrade height
    pub fn for_height(height: i64, codec_upgrade_height: i64) -> Self {
        if height > codec_upgrade_height {
            TxEncoding::Versioned
        } else {
            TxEncoding::Legacy
        }
    }
}

/// Encode a transaction
pub fn encode_tx(tx: &Tx, encoding: TxEncoding) -> Result<Vec<u8>, CodecError> {
    match encoding {
        TxEncoding::Legacy => Ok(serde_json::to_vec(tx)?),
        TxEncoding::Versioned => {
            let body = bincode::serialize(tx)?;
            let len = u32::try_from(body.len()).map_err(|_| CodecError::LengthMismatch {
                declared: u32::MAX as usize,
                actual: body.len(),
            })?;
            let mut out = Vec::with_capacity(body.len() + 5);
            out.push(TX_FORMAT_V2);
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&body);
            Ok(out)
        }
    }
}

/// Decode a transaction with the encoding the height selects
pub fn decode_tx(bytes: &[u8], encoding: TxEncoding) -> Result<Tx, CodecError> {
    match encoding {
        TxEncoding::Legacy => Ok(serde_json::from_slice(bytes)?),
        TxEncoding::Versioned => {
            let (&version, rest) = bytes.split_first().ok_or(CodecError::Empty)?;
            if version != TX_FORMAT_V2 {
                return Err(CodecError::UnsupportedVersion(version));
            }
            if rest.len() < 4 {
                return Err(CodecError::LengthMismatch {
                    declared: 4,
                    actual: rest.len(),
                });
            }
            let (len_bytes, body) = rest.split_at(4);
            let declared = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
            if declared != body.len() {
                return Err(CodecError::LengthMismatch {
                    declared,
                    actual: body.len(),
                });
            }
            Ok(bincode::deserialize(body)?)
        }
    }
}

/// BLAKE3 hash of the raw transaction bytes, hex encoded
pub fn tx_hash(raw: &[u8]) -> String {
    blake3::hash(raw).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PublicKeyType;

    fn sample_tx() -> Tx {
        let signing = ed25519_dalek::SigningKey::from_bytes(&[3u8; 32]);
        let public_key = PublicKey::ed25519(signing.verifying_key().to_bytes()).unwrap();
        Tx {
            msg: Msg::StakeServicer(MsgStakeServicer {
                public_key: public_key.clone(),
                chains: vec!["0001".into()],
                geo_zones: vec![],
                service_url: "https://x.io:443".into(),
                amount: 15_000_000_000,
                output_address: None,
            }),
            fee: 10_000,
            memo: "hello".into(),
            entropy: -42,
            signature: TxSignature {
                public_key,
                signature: vec![0u8; 64],
            },
        }
    }

    #[test]
    fn test_encoding_selection() {
        assert_eq!(TxEncoding::for_height(0, 0), TxEncoding::Legacy);
        assert_eq!(TxEncoding::for_height(1, 0), TxEncoding::Versioned);
        assert_eq!(TxEncoding::for_height(10, 10), TxEncoding::Legacy);
        assert_eq!(TxEncoding::for_height(11, 10), TxEncoding::Versioned);
    }

    #[test]
    fn test_both_encodings_decode() {
        let tx = sample_tx();
        for encoding in [TxEncoding::Legacy, TxEncoding::Versioned] {
            let raw = encode_tx(&tx, encoding).unwrap();
            assert_eq!(decode_tx(&raw, encoding).unwrap(), tx);
        }
    }

    #[test]
    fn test_wrong_encoding_is_rejected() {
        let tx = sample_tx();
        let legacy = encode_tx(&tx, TxEncoding::Legacy).unwrap();
        assert!(decode_tx(&legacy, TxEncoding::Versioned).is_err());
        let versioned = encode_tx(&tx, TxEncoding::Versioned).unwrap();
        assert!(decode_tx(&versioned, TxEncoding::Legacy).is_err());
    }

    #[test]
    fn test_truncated_versioned_tx() {
        let raw = encode_tx(&sample_tx(), TxEncoding::Versioned).unwrap();
        let err = decode_tx(&raw[..raw.len() - 1], TxEncoding::Versioned).unwrap_err();
        assert!(matches!(err, CodecError::LengthMismatch { .. }));
    }

    #[test]
    fn test_signer_and_route() {
        let tx = sample_tx();
        assert_eq!(tx.signer(), tx.signature.public_key.address());
        assert_eq!(tx.signature.public_key.key_type(), PublicKeyType::Ed25519);
        assert_eq!(tx.msg.name(), "stake_servicer");
        assert_eq!(tx.msg.route(), "servicers");
    }

    #[test]
    fn test_session_hash_distinguishes_fields() {
        let a = SessionHeader {
            requestor: Address::new([1; 20]),
            chain: "0001".into(),
            session_height: 5,
        };
        let mut b = a.clone();
        b.session_height = 9;
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.clone().hash());
    }

    #[test]
    fn test_session_hash_ignores_chain_case() {
        let lower = SessionHeader {
            requestor: Address::new([1; 20]),
            chain: "00af".into(),
            session_height: 5,
        };
        let upper = SessionHeader {
            chain: "00AF".into(),
            ..lower.clone()
        };
        assert_eq!(lower.hash(), upper.hash());
    }
}
