//! Versioned value codec
//!
//! Every value written to the state store is a one-byte format version
//! followed by the `bincode` encoding of the record. Readers reject
//! unknown versions instead of guessing.

use crate::error::StakingError;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Current format version of stored values
pub const VALUE_VERSION: u8 = 1;

/// Encoding and decoding failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("empty value")]
    Empty,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),

    #[error("length prefix {declared} does not match payload {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("bincode: {0}")]
    Bincode(String),

    #[error("json: {0}")]
    Json(String),
}

impl From<bincode::Error> for CodecError {
    fn from(e: bincode::Error) -> Self {
        Self::Bincode(e.to_string())
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

impl From<CodecError> for StakingError {
    fn from(e: CodecError) -> Self {
        StakingError::Codec(e.to_string())
    }
}

/// Encode a store value
pub fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let body = bincode::serialize(value)?;
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(VALUE_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a store value written by [`encode_value`]
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let (&version, body) = bytes.split_first().ok_or(CodecError::Empty)?;
    if version != VALUE_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    Ok(bincode::deserialize(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_carries_version() {
        let bytes = encode_value(&(7u64, "abc".to_string())).unwrap();
        assert_eq!(bytes[0], VALUE_VERSION);
        let back: (u64, String) = decode_value(&bytes).unwrap();
        assert_eq!(back, (7, "abc".to_string()));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = encode_value(&1u32).unwrap();
        bytes[0] = 9;
        assert_eq!(
            decode_value::<u32>(&bytes),
            Err(CodecError::UnsupportedVersion(9))
        );
        assert_eq!(decode_value::<u32>(&[]), Err(CodecError::Empty));
    }
}
