//! Share submission.
//!
//! A miner's submission goes through two stages:
//!
//! 1. [`ShareValidator`] checks it against the job window: the job must still
//!    exist, the fields must have the right shapes, the tuple must be new for
//!    the job, and the Equihash solution must verify. The header hash then
//!    gives the share difficulty and decides whether this is a block.
//! 2. [`BlockReconciler`] submits block candidates to the daemon once and
//!    confirms them with an independent `getblock`. A rejected or unconfirmed
//!    block is still a valid share, just not a block.
//!
//! Validation runs concurrently across miners; it only takes the job store's
//! read lock and the job's replay log lock.

mod reconcile;
mod validator;

use bitcoin::BlockHash;
use bitcoin::hashes::{Hash, HashEngine, sha256};
use thiserror::Error;
use time::OffsetDateTime;

pub use reconcile::BlockReconciler;
pub use validator::{ShareValidator, Validated};

use crate::extranonce::Extranonce1;
use crate::job::JobId;
use crate::types::Difficulty;

/// Reasons a submission is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShareError {
    #[error("job not found")]
    JobNotFound,

    #[error("duplicate share")]
    DuplicateShare,

    #[error("invalid solution")]
    InvalidSolution,

    #[error("invalid {0}")]
    InvalidParams(&'static str),

    #[error("ntime out of range")]
    NtimeOutOfRange,

    #[error("low difficulty share ({0})")]
    LowDifficultyShare(Difficulty),
}

impl ShareError {
    /// Stratum error code reported to the miner.
    pub fn stratum_code(&self) -> i32 {
        match self {
            Self::JobNotFound => 21,
            Self::DuplicateShare => 22,
            Self::LowDifficultyShare(_) => 23,
            Self::InvalidSolution | Self::InvalidParams(_) | Self::NtimeOutOfRange => 20,
        }
    }
}

/// The submitting connection's identity and current difficulty.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub worker: String,
    pub extranonce1: Extranonce1,

    /// Stratum difficulty assigned to this connection.
    pub difficulty: Difficulty,
}

/// `mining.submit` fields as received, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job_id: String,

    /// nTime, 4 bytes little-endian.
    pub time: String,

    pub extranonce2: String,

    /// Equihash solution including its length prefix.
    pub solution: String,
}

/// Replay-log key for one (worker, extranonce2, time, solution) tuple.
///
/// Stored as a digest so a window of jobs does not hold every solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubmissionKey([u8; 32]);

impl SubmissionKey {
    pub fn new(worker: &str, extranonce2: &str, time: &str, solution: &str) -> Self {
        let mut engine = sha256::Hash::engine();
        for part in [worker, extranonce2, time, solution] {
            engine.input(&(part.len() as u64).to_le_bytes());
            engine.input(part.to_ascii_lowercase().as_bytes());
        }
        Self(sha256::Hash::from_engine(engine).to_byte_array())
    }
}

/// A validated share.
#[derive(Debug, Clone)]
pub struct Share {
    pub worker: String,
    pub job_id: JobId,
    pub block_height: u64,
    pub extranonce2: String,
    pub time: u32,
    pub solution: Vec<u8>,

    /// Difficulty the worker was mining at.
    pub difficulty: Difficulty,

    /// Difficulty met by the header hash.
    pub share_difficulty: Difficulty,

    pub network_difficulty: Difficulty,

    /// Miner reward of the job's block, in coins.
    pub block_reward: f64,

    pub is_block_candidate: bool,
    pub block_hash: Option<BlockHash>,

    /// Coinbase txid of the confirmed block.
    pub transaction_confirmation_data: Option<String>,

    pub created_at: OffsetDateTime,
}
