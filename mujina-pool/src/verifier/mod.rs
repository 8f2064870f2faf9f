//! Proof-of-work solution verification.
//!
//! The job pipeline only ever asks one question of the proof-of-work layer:
//! does this header plus solution satisfy the chain's Equihash puzzle? That
//! question is the [`SolutionVerifier`] trait, so chains with other verifiers
//! (or tests with canned answers) plug in without touching share validation.

mod tree;

pub use tree::SolutionError;

use bitcoin::consensus::encode::{VarInt, serialize};

use crate::tracing::prelude::*;

/// Size of the serialized Equihash block header, nonce included.
pub const HEADER_SIZE: usize = 140;

/// Size of the header prefix before the nonce.
pub const HEADER_INPUT_SIZE: usize = 108;

/// BLAKE2b personalization prefix used by Zcash and most forks.
pub const ZCASH_PERSONALIZATION: [u8; 8] = *b"ZcashPoW";

/// BLAKE2b personalization prefix used by Zero.
pub const ZERO_PERSONALIZATION: [u8; 8] = *b"ZERO_PoW";

/// Equihash parameter set with its solution encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EquihashParams {
    pub n: u32,
    pub k: u32,

    /// Solution length in bytes, without the compact-size preamble.
    pub solution_size: usize,

    /// First eight bytes of the BLAKE2b personalization; `n` and `k` follow.
    pub personalization: [u8; 8],
}

impl EquihashParams {
    /// Zcash, Horizen and most Equihash coins.
    pub const EH_200_9: Self = Self::new(200, 9, 1344, ZCASH_PERSONALIZATION);

    /// Bitcoin Gold style Equihash-144,5.
    pub const EH_144_5: Self = Self::new(144, 5, 100, ZCASH_PERSONALIZATION);

    /// Zero/Equihash-192,7.
    pub const EH_192_7: Self = Self::new(192, 7, 400, ZERO_PERSONALIZATION);

    /// Minexcoin style Equihash-96,5.
    pub const EH_96_5: Self = Self::new(96, 5, 68, ZCASH_PERSONALIZATION);

    const fn new(n: u32, k: u32, solution_size: usize, personalization: [u8; 8]) -> Self {
        Self {
            n,
            k,
            solution_size,
            personalization,
        }
    }

    /// Same puzzle under a different personalization.
    pub const fn with_personalization(self, personalization: [u8; 8]) -> Self {
        Self {
            personalization,
            ..self
        }
    }

    /// Compact-size length prefix that precedes the solution on the wire and
    /// in the block.
    pub fn preamble(&self) -> Vec<u8> {
        serialize(&VarInt(self.solution_size as u64))
    }

    /// Solution length including the preamble.
    pub fn encoded_solution_size(&self) -> usize {
        self.preamble().len() + self.solution_size
    }
}

/// Verification capability consumed by share validation.
pub trait SolutionVerifier: Send + Sync {
    /// Check `solution` (preamble included) against the 140-byte `header`.
    fn is_valid_solution(&self, header: &[u8], solution: &[u8], params: &EquihashParams) -> bool;
}

/// Equihash verifier honoring the chain's parameters and personalization.
#[derive(Debug, Default, Clone, Copy)]
pub struct EquihashVerifier;

impl SolutionVerifier for EquihashVerifier {
    fn is_valid_solution(&self, header: &[u8], solution: &[u8], params: &EquihashParams) -> bool {
        if header.len() != HEADER_SIZE {
            return false;
        }

        let preamble = params.preamble();
        if solution.len() != preamble.len() + params.solution_size
            || !solution.starts_with(&preamble)
        {
            return false;
        }

        match tree::verify(params, header, &solution[preamble.len()..]) {
            Ok(()) => true,
            Err(e @ SolutionError::UnsupportedParams { .. }) => {
                warn!(error = %e, "Cannot verify solution");
                false
            }
            Err(e) => {
                trace!(error = %e, "Equihash verification failed");
                false
            }
        }
    }
}
