//! 256-bit unsigned integer arithmetic.
//!
//! Wraps `ruint::aliases::U256` so targets, hashes and chain `diff1`
//! constants share one comparable type. Callers never touch `ruint` directly.

use std::fmt;
use std::ops::{Div, Mul};

use ruint::aliases::U256 as Ruint256;

/// A 256-bit unsigned integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct U256(Ruint256);

impl U256 {
    /// Zero constant.
    pub const ZERO: Self = Self(Ruint256::ZERO);

    /// Largest representable value.
    pub const MAX: Self = Self(Ruint256::MAX);

    /// Create from little-endian bytes (hash byte order).
    pub fn from_le_bytes(bytes: [u8; 32]) -> Self {
        Self(Ruint256::from_le_bytes(bytes))
    }

    /// Create from big-endian bytes (display order of a target).
    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(Ruint256::from_be_bytes(bytes))
    }

    /// Parse a big-endian hex string of up to 64 digits.
    pub fn from_be_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let padded = format!("{:0>64}", s.trim_start_matches("0x"));
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(padded, &mut bytes)?;
        Ok(Self::from_be_bytes(bytes))
    }

    /// Convert to little-endian bytes.
    pub fn to_le_bytes(self) -> [u8; 32] {
        self.0.to_le_bytes()
    }

    /// Convert to big-endian bytes.
    pub fn to_be_bytes(self) -> [u8; 32] {
        self.0.to_be_bytes()
    }

    /// Lossy conversion to f64, used for difficulty ratios.
    pub fn to_f64(self) -> f64 {
        self.0
            .as_limbs()
            .iter()
            .rev()
            .fold(0.0, |acc, &limb| acc * 18_446_744_073_709_551_616.0 + limb as f64)
    }

    /// True if the value is zero.
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }
}

impl From<u64> for U256 {
    fn from(value: u64) -> Self {
        Self(Ruint256::from(value))
    }
}

impl From<bitcoin::pow::Target> for U256 {
    fn from(target: bitcoin::pow::Target) -> Self {
        Self::from_le_bytes(target.to_le_bytes())
    }
}

impl Div for U256 {
    type Output = Self;

    fn div(self, rhs: Self) -> Self::Output {
        Self(self.0 / rhs.0)
    }
}

impl Div<u64> for U256 {
    type Output = Self;

    fn div(self, rhs: u64) -> Self::Output {
        Self(self.0 / Ruint256::from(rhs))
    }
}

impl Mul<u64> for U256 {
    type Output = Self;

    fn mul(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_mul(Ruint256::from(rhs)))
    }
}

impl fmt::Display for U256 {
    /// Big-endian hex, zero padded to 64 digits.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_be_bytes()))
    }
}
