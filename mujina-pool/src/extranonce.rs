//! Per-connection extranonce1 allocation.
//!
//! The 32-byte Equihash header nonce is split in two. The pool assigns each
//! miner connection a unique extranonce1 prefix; the miner searches the
//! remaining extranonce2 bytes. Distinct prefixes keep miners from ever
//! producing the same header for the same job.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::job::NONCE_SIZE;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtranonceError {
    #[error("Invalid extranonce1 size: {0} (must be 1-8 bytes)")]
    InvalidSize(u8),

    #[error("Value {0} exceeds maximum for size {1} bytes")]
    ValueTooLarge(u64, u8),
}

/// A connection's nonce prefix.
///
/// Serializes big-endian so the hex a miner receives is the byte sequence
/// it prepends to its extranonce2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extranonce1 {
    value: u64,
    size: u8,
}

impl Extranonce1 {
    pub fn new(value: u64, size: u8) -> Result<Self, ExtranonceError> {
        if size == 0 || size > 8 {
            return Err(ExtranonceError::InvalidSize(size));
        }
        if value > max_for_size(size) {
            return Err(ExtranonceError::ValueTooLarge(value, size));
        }
        Ok(Self { value, size })
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.value.to_be_bytes()[8 - self.size as usize..].to_vec()
    }
}

impl fmt::Display for Extranonce1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$x}", self.value, width = self.size as usize * 2)
    }
}

fn max_for_size(size: u8) -> u64 {
    if size >= 8 {
        u64::MAX
    } else {
        (1u64 << (size * 8)) - 1
    }
}

/// Hands out extranonce1 values in sequence, wrapping at the size limit.
#[derive(Debug)]
pub struct ExtranonceProvider {
    size: u8,
    counter: AtomicU64,
}

impl ExtranonceProvider {
    pub fn new(size: u8) -> Result<Self, ExtranonceError> {
        if size == 0 || size > 8 {
            return Err(ExtranonceError::InvalidSize(size));
        }
        Ok(Self {
            size,
            counter: AtomicU64::new(0),
        })
    }

    pub fn next(&self) -> Extranonce1 {
        let raw = self.counter.fetch_add(1, Ordering::Relaxed);
        let value = match max_for_size(self.size).checked_add(1) {
            Some(modulus) => raw % modulus,
            None => raw,
        };
        Extranonce1 {
            value,
            size: self.size,
        }
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    /// Nonce bytes left for the miner.
    pub fn extranonce2_size(&self) -> usize {
        NONCE_SIZE - self.size as usize
    }
}
