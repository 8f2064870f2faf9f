//! Chain-relative difficulty.

use std::cmp::Ordering;
use std::fmt;

use bitcoin::hash_types::BlockHash;
use bitcoin::hashes::Hash;

use crate::u256::U256;

/// Mining difficulty relative to a chain's `diff1` target.
///
/// Equihash chains do not share Bitcoin's difficulty-1 target, so the ratio
/// is always taken against the `diff1` of the chain that produced the hash:
/// ```text
/// difficulty = diff1 / target
/// ```
///
/// Used for:
/// - Network difficulty of a job (template target)
/// - Share difficulty of a submitted solution (header hash)
/// - Stratum difficulty comparisons (`share / stratum >= 0.99`)
#[derive(Debug, Clone, Copy, Default)]
pub struct Difficulty(f64);

impl Difficulty {
    /// Wrap a raw difficulty value.
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    /// Difficulty represented by `target` on a chain with the given `diff1`.
    ///
    /// A zero target saturates to infinity.
    pub fn from_target(target: U256, diff1: U256) -> Self {
        if target.is_zero() {
            return Self(f64::INFINITY);
        }
        Self(diff1.to_f64() / target.to_f64())
    }

    /// Difficulty met by a header hash.
    ///
    /// The hash is read as a little-endian 256-bit integer, the same way the
    /// node compares it against the block target.
    pub fn from_hash(hash: &BlockHash, diff1: U256) -> Self {
        Self::from_target(U256::from_le_bytes(*hash.as_byte_array()), diff1)
    }

    /// Get difficulty as f64.
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl From<f64> for Difficulty {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl PartialEq for Difficulty {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl PartialOrd for Difficulty {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0;

        if !value.is_finite() {
            return write!(f, "inf");
        }

        // Sub-1.0 difficulties are routine for Equihash shares
        if value < 1.0 {
            let s = format!("{:.6}", value);
            let trimmed = s.trim_end_matches('0').trim_end_matches('.');
            return write!(f, "{}", trimmed);
        }

        let (scaled, suffix) = if value >= 1e15 {
            (value / 1e15, "P")
        } else if value >= 1e12 {
            (value / 1e12, "T")
        } else if value >= 1e9 {
            (value / 1e9, "G")
        } else if value >= 1e6 {
            (value / 1e6, "M")
        } else if value >= 1e3 {
            (value / 1e3, "K")
        } else {
            (value, "")
        };

        if scaled >= 100.0 || scaled.fract() == 0.0 {
            write!(f, "{:.0}{}", scaled, suffix)
        } else if scaled >= 10.0 {
            write!(f, "{:.1}{}", scaled, suffix)
        } else {
            write!(f, "{:.2}{}", scaled, suffix)
        }
    }
}
