//! Mining jobs.
//!
//! A [`Job`] is the unit of work broadcast to miners, built from one
//! [`Template`] by a [`JobBuilder`]. Jobs are immutable: a refresh builds a
//! new job with a new id rather than touching an old one, so shares in flight
//! against an older job always see the exact header fields that miner was
//! given.
//!
//! # Header layout
//!
//! ```text
//! offset  size  field
//!      0     4  version          (LE)
//!      4    32  hashPrevBlock    (internal order)
//!     36    32  hashMerkleRoot   (internal order)
//!     68    32  hashReserved     (sapling root / block commitments)
//!    100     4  nTime            (LE)
//!    104     4  nBits            (LE)
//!    108    32  nNonce           (extranonce1 ++ extranonce2)
//! ```
//!
//! The first 108 bytes are the Equihash input; the nonce completes it.

pub mod coinbase;
mod equihash;
pub mod merkle;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bitcoin::consensus::encode::{VarInt, serialize};
use bitcoin::hash_types::TxMerkleNode;
use bitcoin::hashes::Hash;
use bitcoin::pow::CompactTarget;
use bitcoin::{BlockHash, Txid};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

pub use equihash::{EquihashJobBuilder, NONCE_SIZE};

use crate::job_manager::fetcher::Template;
use crate::types::Difficulty;
use crate::u256::U256;
use crate::verifier::HEADER_SIZE;

/// Errors while turning a template into a job. Never fatal to the pipeline.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("template has neither a subsidy nor a coinbase value")]
    MissingCoinbaseValue,

    #[error("invalid miner subsidy {0}: {1}")]
    InvalidAmount(f64, String),

    #[error("height {0} cannot be encoded in the coinbase")]
    InvalidHeight(u64),

    #[error("pool tag does not fit in the coinbase script")]
    TagTooLong,
}

/// Job identifier, unique for the lifetime of a job manager.
///
/// Miners see it as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(Self)
    }
}

/// Strictly increasing job id source. Ids are never reused, including
/// across height changes.
#[derive(Debug)]
pub struct JobIdSequence(AtomicU64);

impl JobIdSequence {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> JobId {
        JobId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for JobIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Unit of work for miners.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub prev_blockhash: BlockHash,
    pub height: u64,
    pub version: u32,
    pub bits: CompactTarget,

    /// Network target expanded from `bits`.
    pub target: U256,

    /// Network difficulty relative to the chain's diff1.
    pub difficulty: Difficulty,

    /// Header time offered to miners.
    pub time: u32,

    /// hashReserved, internal byte order.
    pub reserved: [u8; 32],

    pub coinbase: Vec<u8>,
    pub coinbase_txid: Txid,
    pub merkle_root: TxMerkleNode,

    /// Siblings of the coinbase leaf, bottom up.
    pub merkle_branch: Vec<TxMerkleNode>,

    /// Bytes of the header nonce left to the miner.
    pub extranonce2_size: usize,

    pub created_at: OffsetDateTime,
    pub template: Arc<Template>,
}

impl Job {
    /// Serialize the 140-byte header for a submitted time and nonce.
    pub fn serialize_header(&self, time: u32, nonce: &[u8]) -> Vec<u8> {
        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.extend_from_slice(&self.version.to_le_bytes());
        header.extend_from_slice(self.prev_blockhash.as_byte_array());
        header.extend_from_slice(self.merkle_root.as_byte_array());
        header.extend_from_slice(&self.reserved);
        header.extend_from_slice(&time.to_le_bytes());
        header.extend_from_slice(&self.bits.to_consensus().to_le_bytes());
        header.extend_from_slice(nonce);
        header
    }

    /// Serialize a full block: header, solution (with its length prefix),
    /// transaction count, coinbase, then the template's transactions.
    pub fn serialize_block(&self, header: &[u8], solution: &[u8]) -> Vec<u8> {
        let txs = &self.template.transactions;
        let tx_bytes: usize = txs.iter().map(|tx| tx.data.len()).sum();

        let mut block =
            Vec::with_capacity(header.len() + solution.len() + 9 + self.coinbase.len() + tx_bytes);
        block.extend_from_slice(header);
        block.extend_from_slice(solution);
        block.extend(serialize(&VarInt(txs.len() as u64 + 1)));
        block.extend_from_slice(&self.coinbase);
        for tx in txs {
            block.extend_from_slice(&tx.data);
        }
        block
    }

    /// Broadcast payload for this job.
    pub fn broadcast(&self, clean_jobs: bool) -> JobBroadcast {
        JobBroadcast {
            job_id: self.id.to_string(),
            clean_jobs,
            version: hex::encode(self.version.to_le_bytes()),
            prev_hash: hex::encode(self.prev_blockhash.as_byte_array()),
            merkle_root: hex::encode(self.merkle_root.as_byte_array()),
            reserved: hex::encode(self.reserved),
            time: hex::encode(self.time.to_le_bytes()),
            bits: hex::encode(self.bits.to_consensus().to_le_bytes()),
        }
    }
}

/// Job notification for the miner-facing protocol layer.
///
/// Fields are hex in the byte order miners hash them, in the order of an
/// Equihash `mining.notify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobBroadcast {
    pub job_id: String,

    /// Miners must drop older jobs (new block).
    pub clean_jobs: bool,

    pub version: String,
    pub prev_hash: String,
    pub merkle_root: String,
    pub reserved: String,
    pub time: String,
    pub bits: String,
}

/// Turns templates into jobs for one chain.
pub trait JobBuilder: Send + Sync {
    /// Build the job with id `id` from `template`.
    fn build(&self, id: JobId, template: Arc<Template>) -> Result<Job, BuildError>;
}

/// Whether `template` starts a new block relative to the current job.
///
/// New when there is no current job, or when the previous block hash changed
/// and the height strictly increased. A changed hash at the same or a lower
/// height is a refresh.
pub fn is_new_block(current: Option<&Job>, template: &Template) -> bool {
    match current {
        None => true,
        Some(job) => job.prev_blockhash != template.prev_blockhash && template.height > job.height,
    }
}
