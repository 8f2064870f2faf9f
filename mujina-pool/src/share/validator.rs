//! Submission checks, in order: job lookup, field shapes, ntime window,
//! replay, Equihash, difficulty.

use std::sync::Arc;

use bitcoin::BlockHash;
use bitcoin::hashes::{Hash, HashEngine, sha256d};
use time::{Duration, OffsetDateTime};

use super::{Share, ShareError, Submission, SubmissionKey, WorkerContext};
use crate::chain::ChainParams;
use crate::job::{Job, JobId, NONCE_SIZE, coinbase};
use crate::job_manager::store::JobStore;
use crate::types::Difficulty;
use crate::u256::U256;
use crate::verifier::SolutionVerifier;

/// Furthest a submitted nTime may run ahead of the pool clock.
const MAX_FUTURE_TIME: Duration = Duration::hours(2);

/// Shares below this fraction of the worker's difficulty are rejected.
const MIN_DIFFICULTY_RATIO: f64 = 0.99;

/// Result of a successful validation.
#[derive(Debug)]
pub struct Validated {
    pub share: Share,
    pub job: Arc<Job>,

    /// Serialized block, present for block candidates.
    pub block: Option<Vec<u8>>,
}

pub struct ShareValidator {
    store: Arc<JobStore>,
    chain: ChainParams,
    verifier: Arc<dyn SolutionVerifier>,
}

impl ShareValidator {
    pub fn new(store: Arc<JobStore>, chain: ChainParams, verifier: Arc<dyn SolutionVerifier>) -> Self {
        Self {
            store,
            chain,
            verifier,
        }
    }

    pub fn validate(
        &self,
        worker: &WorkerContext,
        submission: &Submission,
    ) -> Result<Validated, ShareError> {
        self.validate_at(worker, submission, OffsetDateTime::now_utc())
    }

    fn validate_at(
        &self,
        worker: &WorkerContext,
        submission: &Submission,
        now: OffsetDateTime,
    ) -> Result<Validated, ShareError> {
        let id: JobId = submission
            .job_id
            .parse()
            .map_err(|_| ShareError::JobNotFound)?;
        let active = self.store.find_by_id(id)?;
        let job = active.job.clone();

        let time = decode_time(&submission.time)?;
        let extranonce2 = decode_exact(&submission.extranonce2, job.extranonce2_size, "extranonce2")?;

        let params = self.chain.equihash;
        let solution = decode_exact(&submission.solution, params.encoded_solution_size(), "solution")?;
        if !solution.starts_with(&params.preamble()) {
            return Err(ShareError::InvalidParams("solution"));
        }

        let mut nonce = worker.extranonce1.to_bytes();
        nonce.extend_from_slice(&extranonce2);
        if nonce.len() != NONCE_SIZE {
            return Err(ShareError::InvalidParams("extranonce1"));
        }

        let latest = (now + MAX_FUTURE_TIME).unix_timestamp();
        if time < job.template.cur_time || i64::from(time) > latest {
            return Err(ShareError::NtimeOutOfRange);
        }

        let key = SubmissionKey::new(
            &worker.worker,
            &submission.extranonce2,
            &submission.time,
            &submission.solution,
        );
        if !active.register(key) {
            return Err(ShareError::DuplicateShare);
        }

        let header = job.serialize_header(time, &nonce);
        if !self.verifier.is_valid_solution(&header, &solution, &params) {
            return Err(ShareError::InvalidSolution);
        }

        let hash = share_hash(&header, &solution);
        let share_difficulty = Difficulty::from_hash(&hash, self.chain.diff1);
        let is_block_candidate = U256::from_le_bytes(hash.to_byte_array()) <= job.target;

        if !is_block_candidate {
            let ratio = share_difficulty.as_f64() / worker.difficulty.as_f64();
            if ratio < MIN_DIFFICULTY_RATIO {
                return Err(ShareError::LowDifficultyShare(share_difficulty));
            }
        }

        let block = is_block_candidate.then(|| job.serialize_block(&header, &solution));

        let share = Share {
            worker: worker.worker.clone(),
            job_id: job.id,
            block_height: job.height,
            extranonce2: submission.extranonce2.to_ascii_lowercase(),
            time,
            solution,
            difficulty: worker.difficulty,
            share_difficulty,
            network_difficulty: job.difficulty,
            block_reward: coinbase::block_reward(&job.template),
            is_block_candidate,
            block_hash: is_block_candidate.then_some(hash),
            transaction_confirmation_data: None,
            created_at: now,
        };

        Ok(Validated { share, job, block })
    }
}

/// nTime is exactly 4 bytes, little-endian.
fn decode_time(hex_str: &str) -> Result<u32, ShareError> {
    let mut bytes = [0u8; 4];
    hex::decode_to_slice(hex_str, &mut bytes).map_err(|_| ShareError::InvalidParams("ntime"))?;
    Ok(u32::from_le_bytes(bytes))
}

fn decode_exact(hex_str: &str, len: usize, field: &'static str) -> Result<Vec<u8>, ShareError> {
    if hex_str.len() != len * 2 {
        return Err(ShareError::InvalidParams(field));
    }
    hex::decode(hex_str).map_err(|_| ShareError::InvalidParams(field))
}

/// Double SHA-256 of header and solution, the block hash if it wins.
fn share_hash(header: &[u8], solution: &[u8]) -> BlockHash {
    let mut engine = sha256d::Hash::engine();
    engine.input(header);
    engine.input(solution);
    BlockHash::from_raw_hash(sha256d::Hash::from_engine(engine))
}
