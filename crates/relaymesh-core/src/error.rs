//! Error types for relaymesh staking operations

use thiserror::Error;

/// Result type alias for staking operations
pub type Result<T> = std::result::Result<T, StakingError>;

/// Errors raised by message handlers, the scheduler and the codecs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StakingError {
    // === Input validation ===
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("public key type {0} is not accepted by consensus")]
    InvalidPublicKeyType(String),

    #[error("invalid network identifier: {0}")]
    InvalidNetworkIdentifier(String),

    #[error("invalid geo zone: {0}")]
    InvalidGeoZone(String),

    #[error("invalid service url: {0}")]
    InvalidServiceUrl(String),

    #[error("duplicate chain in stake message: {0}")]
    DuplicateChain(String),

    #[error("too many chains: {count} > {max}")]
    ChainLimitExceeded { count: usize, max: u64 },

    #[error("too many geo zones: {count} > {max}")]
    GeoZoneLimitExceeded { count: usize, max: u64 },

    #[error("servicers per session must be within 1..=255")]
    InvalidServicersPerSession,

    // === Economic ===
    #[error("stake {amount} is below the minimum {minimum}")]
    MinimumStake { amount: u128, minimum: u128 },

    #[error("edit stake must not lower the stake: {new} < {current}")]
    MinimumEditStake { new: u128, current: u128 },

    #[error("edit stake must move into a higher stake bin")]
    SameBinEditStake,

    #[error("not enough coins: need {needed}, have {available}")]
    NotEnoughCoins { needed: u128, available: u128 },

    #[error("send amount must be positive")]
    BadSendAmount,

    #[error("maximum number of staked servicers reached ({0})")]
    MaxServicersReached(u64),

    #[error("new stakes are locked by governance")]
    ServicerCountLocked,

    #[error("maximum number of staked requestors reached ({0})")]
    MaxRequestorsReached(u64),

    // === Lifecycle ===
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("entity has the wrong status for this operation: {0}")]
    WrongStatus(String),

    #[error("servicer is already jailed")]
    AlreadyJailed,

    #[error("servicer is not jailed")]
    NotJailed,

    #[error("servicer jail period has not elapsed")]
    JailPeriodActive,

    #[error("servicer is tombstoned and can never be unjailed")]
    Tombstoned,

    #[error("servicer is already paused")]
    AlreadyPaused,

    #[error("servicer is not paused")]
    NotPaused,

    #[error("servicer was paused too recently")]
    PausedTooRecently,

    // === Authorization ===
    #[error("signer is not authorized for this entity")]
    UnauthorizedSigner,

    #[error("message has no signer")]
    NilSigner,

    #[error("output address cannot be removed once set")]
    NilOutputAddress,

    #[error("signer is not the DAO owner")]
    UnauthorizedDao,

    // === Reports ===
    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error("report already submitted for this session and servicer")]
    DuplicateReport,

    #[error("fisherman is not authorized: {0}")]
    UnauthorizedFisherman(String),

    #[error("report score must be within [0, 1]")]
    InvalidScore,

    // === Governance ===
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid upgrade: {0}")]
    InvalidUpgrade(String),

    #[error("maximum number of fishermen reached ({0})")]
    MaxFishermenReached(u64),

    // === Transaction ===
    #[error("fee {paid} below required {required}")]
    InsufficientFee { paid: u128, required: u128 },

    #[error("transaction decode failed: {0}")]
    TxDecode(String),

    #[error("unknown message type")]
    UnknownMessageType,

    #[error("unknown query path: {0}")]
    UnknownQuery(String),

    // === Internal ===
    #[error("arithmetic overflow")]
    Overflow,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("store error: {0}")]
    Store(String),
}

impl StakingError {
    /// Stable numeric code written into transaction results
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidAddress(_) => 101,
            Self::InvalidPublicKey(_) => 102,
            Self::InvalidPublicKeyType(_) => 103,
            Self::InvalidNetworkIdentifier(_) => 104,
            Self::InvalidGeoZone(_) => 105,
            Self::InvalidServiceUrl(_) => 106,
            Self::DuplicateChain(_) => 107,
            Self::ChainLimitExceeded { .. } => 108,
            Self::GeoZoneLimitExceeded { .. } => 109,
            Self::InvalidServicersPerSession => 110,

            Self::MinimumStake { .. } => 201,
            Self::MinimumEditStake { .. } => 202,
            Self::SameBinEditStake => 203,
            Self::NotEnoughCoins { .. } => 204,
            Self::BadSendAmount => 205,
            Self::MaxServicersReached(_) => 206,
            Self::ServicerCountLocked => 207,
            Self::MaxRequestorsReached(_) => 208,

            Self::EntityNotFound(_) => 301,
            Self::WrongStatus(_) => 302,
            Self::AlreadyJailed => 303,
            Self::NotJailed => 304,
            Self::JailPeriodActive => 305,
            Self::Tombstoned => 306,
            Self::AlreadyPaused => 307,
            Self::NotPaused => 308,
            Self::PausedTooRecently => 309,

            Self::UnauthorizedSigner => 401,
            Self::NilSigner => 402,
            Self::NilOutputAddress => 403,
            Self::UnauthorizedDao => 404,

            Self::InvalidSession(_) => 501,
            Self::DuplicateReport => 502,
            Self::UnauthorizedFisherman(_) => 503,
            Self::InvalidScore => 504,

            Self::InvalidParam(_) => 601,
            Self::InvalidUpgrade(_) => 602,
            Self::MaxFishermenReached(_) => 603,

            Self::InsufficientFee { .. } => 701,
            Self::TxDecode(_) => 702,
            Self::UnknownMessageType => 703,
            Self::UnknownQuery(_) => 704,

            Self::Overflow | Self::Codec(_) | Self::Store(_) => 999,
        }
    }

    /// Module namespace of the error code
    pub fn codespace(&self) -> &'static str {
        match self.code() {
            110 | 208 => "requestors",
            204 | 205 => "bank",
            404 => "gov",
            101..=309 | 401..=403 => "servicers",
            501..=599 => "reports",
            601..=699 => "gov",
            _ => "sdk",
        }
    }

    /// Coded errors that stem from a malformed message rather than state
    pub fn is_validation(&self) -> bool {
        (101..200).contains(&self.code())
    }
}

impl From<bincode::Error> for StakingError {
    fn from(e: bincode::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

impl From<serde_json::Error> for StakingError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(StakingError::NotJailed.code(), 304);
        assert_eq!(StakingError::UnauthorizedSigner.code(), 401);
        assert_eq!(StakingError::UnknownMessageType.code(), 703);
    }

    #[test]
    fn test_codespaces() {
        assert_eq!(StakingError::SameBinEditStake.codespace(), "servicers");
        assert_eq!(StakingError::DuplicateReport.codespace(), "reports");
        assert_eq!(StakingError::InvalidParam("x".into()).codespace(), "gov");
        assert_eq!(StakingError::BadSendAmount.codespace(), "bank");
        assert_eq!(StakingError::InvalidServicersPerSession.codespace(), "requestors");
        assert_eq!(StakingError::Overflow.codespace(), "sdk");
    }

    #[test]
    fn test_error_display() {
        let err = StakingError::MinimumStake { amount: 5, minimum: 10 };
        assert!(err.to_string().contains("below the minimum"));
        assert!(!err.is_validation());
        assert!(StakingError::DuplicateChain("0001".into()).is_validation());
    }
}
