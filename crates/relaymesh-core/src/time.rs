//! Block time helpers
//!
//! Handlers never observe wall-clock time; every decision uses the block
//! header timestamp. Queue keys embed timestamps in a fixed-width RFC 3339
//! form with nanoseconds so that byte order equals chronological order.

use crate::error::{Result, StakingError};
use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};

/// Timestamp of a block
pub type BlockTime = DateTime<Utc>;

/// Sortable byte encoding: `YYYY-MM-DDTHH:MM:SS.nnnnnnnnnZ`
pub fn time_key(t: &BlockTime) -> Vec<u8> {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true).into_bytes()
}

/// Inverse of [`time_key`]
pub fn parse_time_key(bytes: &[u8]) -> Result<BlockTime> {
    let s = std::str::from_utf8(bytes).map_err(|e| StakingError::Codec(e.to_string()))?;
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StakingError::Codec(e.to_string()))
}

/// `t + ms`, clamped to [`far_future`]
pub fn add_ms(t: &BlockTime, ms: u64) -> BlockTime {
    let ms = i64::try_from(ms).unwrap_or(i64::MAX);
    t.checked_add_signed(Duration::milliseconds(ms))
        .map(|r| r.min(far_future()))
        .unwrap_or_else(far_future)
}

/// `t - ms`, clamped to the unix epoch
pub fn sub_ms(t: &BlockTime, ms: u64) -> BlockTime {
    let ms = i64::try_from(ms).unwrap_or(i64::MAX);
    t.checked_sub_signed(Duration::milliseconds(ms))
        .map(|r| r.max(BlockTime::default()))
        .unwrap_or_default()
}

/// Sentinel used for permanent jail; the largest time with a four-digit year
pub fn far_future() -> BlockTime {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64, nanos: u32) -> BlockTime {
        Utc.timestamp_opt(secs, nanos).single().unwrap()
    }

    #[test]
    fn test_time_key_roundtrip() {
        let t = at(1_700_000_000, 123_456_789);
        let key = time_key(&t);
        assert_eq!(key.len(), 30);
        assert_eq!(parse_time_key(&key).unwrap(), t);
    }

    #[test]
    fn test_time_key_sorts_chronologically() {
        let times = [at(5, 0), at(5, 1), at(6, 0), at(1_000_000_000, 999_999_999)];
        for pair in times.windows(2) {
            assert!(time_key(&pair[0]) < time_key(&pair[1]));
        }
    }

    #[test]
    fn test_add_ms() {
        let t = at(1_000, 0);
        assert_eq!(add_ms(&t, 1_800_000), at(2_800, 0));
        assert_eq!(add_ms(&t, u64::MAX), far_future());
        assert_eq!(sub_ms(&t, 500), at(999, 500_000_000));
    }
}
