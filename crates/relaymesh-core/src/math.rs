//! Fixed-point arithmetic
//!
//! Score, fraction and reward math never touches native floats. `Dec` is an
//! unsigned decimal with 18 fractional digits stored as a scaled `u128`.
//! Products go through a 256-bit intermediate so `tokens * fraction` never
//! overflows before the division brings it back into range.
//!
//! ## Rounding
//!
//! | Operation | Mode |
//! |-----------|------|
//! | `Dec * Dec`, `Dec / Dec`, `from_ratio` | half to even |
//! | `mul_int_round` | half to even |
//! | `mul_int_floor`, `percent_of` | toward zero |
//! | `mul_int_ceil` | away from zero |

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Number of fractional digits
pub const PRECISION: u32 = 18;

/// Raw representation of 1.0
pub const ONE_RAW: u128 = 1_000_000_000_000_000_000;

/// Rounding mode for [`mul_div`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rounding {
    Floor,
    Ceil,
    HalfEven,
}

fn widening_mul(a: u128, b: u128) -> (u128, u128) {
    let mask = u64::MAX as u128;
    let (a_lo, a_hi) = (a & mask, a >> 64);
    let (b_lo, b_hi) = (b & mask, b >> 64);

    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    let mid = (ll >> 64) + (lh & mask) + (hl & mask);
    let lo = (ll & mask) | (mid << 64);
    let hi = hh + (lh >> 64) + (hl >> 64) + (mid >> 64);
    (hi, lo)
}

// Requires hi < d so the quotient fits in 128 bits.
fn div_wide(hi: u128, lo: u128, d: u128) -> (u128, u128) {
    let mut rem = hi;
    let mut quo: u128 = 0;
    for i in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((lo >> i) & 1);
        quo <<= 1;
        if carry == 1 || rem >= d {
            rem = rem.wrapping_sub(d);
            quo |= 1;
        }
    }
    (quo, rem)
}

/// Computes `a * b / d` with a 256-bit intermediate.
///
/// Returns `None` when `d == 0` or the result does not fit in a `u128`.
pub fn mul_div(a: u128, b: u128, d: u128, rounding: Rounding) -> Option<u128> {
    if d == 0 {
        return None;
    }
    let (hi, lo) = widening_mul(a, b);
    if hi >= d {
        return None;
    }
    let (q, r) = div_wide(hi, lo, d);
    if r == 0 {
        return Some(q);
    }
    let round_up = match rounding {
        Rounding::Floor => false,
        Rounding::Ceil => true,
        Rounding::HalfEven => match r.cmp(&(d - r)) {
            Ordering::Greater => true,
            Ordering::Equal => q % 2 == 1,
            Ordering::Less => false,
        },
    };
    if round_up {
        q.checked_add(1)
    } else {
        Some(q)
    }
}

/// `amount * pct / 100`, truncated
pub fn percent_of(amount: u128, pct: u64) -> u128 {
    mul_div(amount, pct as u128, 100, Rounding::Floor).unwrap_or(u128::MAX)
}

/// Unsigned fixed-point decimal with 18 fractional digits
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Dec(u128);

impl Dec {
    pub const ZERO: Dec = Dec(0);
    pub const ONE: Dec = Dec(ONE_RAW);

    /// Create from the scaled raw value
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u128 {
        self.0
    }

    /// Integer value as a decimal
    pub fn from_int(n: u64) -> Self {
        Self(n as u128 * ONE_RAW)
    }

    /// `numerator / denominator`, rounded half to even
    pub fn from_ratio(numerator: u128, denominator: u128) -> Option<Self> {
        mul_div(numerator, ONE_RAW, denominator, Rounding::HalfEven).map(Self)
    }

    /// A whole percentage, e.g. `from_percent(25) == 0.25`
    pub fn from_percent(pct: u64) -> Self {
        Self(pct as u128 * (ONE_RAW / 100))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Dec) -> Option<Dec> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn saturating_add(self, other: Dec) -> Dec {
        Self(self.0.saturating_add(other.0))
    }

    pub fn checked_sub(self, other: Dec) -> Option<Dec> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_sub(self, other: Dec) -> Dec {
        Self(self.0.saturating_sub(other.0))
    }

    /// Product rounded half to even
    pub fn checked_mul(self, other: Dec) -> Option<Dec> {
        mul_div(self.0, other.0, ONE_RAW, Rounding::HalfEven).map(Self)
    }

    /// Quotient rounded half to even
    pub fn checked_div(self, other: Dec) -> Option<Dec> {
        mul_div(self.0, ONE_RAW, other.0, Rounding::HalfEven).map(Self)
    }

    /// Multiply by an integer, staying in decimal space
    pub fn checked_mul_int(self, n: u128) -> Option<Dec> {
        self.0.checked_mul(n).map(Self)
    }

    /// Divide by an integer, rounded half to even
    pub fn checked_div_int(self, n: u128) -> Option<Dec> {
        mul_div(self.0, 1, n, Rounding::HalfEven).map(Self)
    }

    /// Clamp to at most 1.0
    pub fn min_one(self) -> Dec {
        self.min(Dec::ONE)
    }

    /// `floor(n * self)`
    pub fn mul_int_floor(self, n: u128) -> Option<u128> {
        mul_div(n, self.0, ONE_RAW, Rounding::Floor)
    }

    /// `ceil(n * self)`
    pub fn mul_int_ceil(self, n: u128) -> Option<u128> {
        mul_div(n, self.0, ONE_RAW, Rounding::Ceil)
    }

    /// `n * self` rounded half to even
    pub fn mul_int_round(self, n: u128) -> Option<u128> {
        mul_div(n, self.0, ONE_RAW, Rounding::HalfEven)
    }

    /// Round to the nearest integer, ties to even
    pub fn round_to_int(self) -> u128 {
        let q = self.0 / ONE_RAW;
        let r = self.0 % ONE_RAW;
        match r.cmp(&(ONE_RAW - r)) {
            Ordering::Greater => q + 1,
            Ordering::Equal if q % 2 == 1 => q + 1,
            _ => q,
        }
    }

    /// Integer part
    pub fn truncate(self) -> u128 {
        self.0 / ONE_RAW
    }
}

impl fmt::Display for Dec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:018}",
            self.0 / ONE_RAW,
            self.0 % ONE_RAW
        )
    }
}

impl fmt::Debug for Dec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dec({self})")
    }
}

/// Error parsing a decimal string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid decimal: {0}")]
pub struct ParseDecError(String);

impl FromStr for Dec {
    type Err = ParseDecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseDecError(s.to_string());
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(err());
        }
        if frac_part.len() > PRECISION as usize
            || !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(err());
        }
        let int_val: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| err())?
        };
        let mut frac_val: u128 = if frac_part.is_empty() {
            0
        } else {
            frac_part.parse().map_err(|_| err())?
        };
        for _ in frac_part.len()..PRECISION as usize {
            frac_val *= 10;
        }
        int_val
            .checked_mul(ONE_RAW)
            .and_then(|v| v.checked_add(frac_val))
            .map(Self)
            .ok_or_else(err)
    }
}

impl Serialize for Dec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Dec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            u128::deserialize(deserializer).map(Self)
        }
    }
}
