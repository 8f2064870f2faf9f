//! Job builder for Equihash chains.

use std::sync::Arc;

use bitcoin::pow::Target;
use bitcoin::{ScriptBuf, Txid};
use time::OffsetDateTime;

use super::{BuildError, Job, JobBuilder, JobId, coinbase, merkle};
use crate::chain::ChainParams;
use crate::job_manager::fetcher::Template;
use crate::types::Difficulty;
use crate::u256::U256;

/// Size of the Equihash header nonce, split between extranonce1 (pool) and
/// extranonce2 (miner).
pub const NONCE_SIZE: usize = 32;

/// Builds Zcash-style jobs: Sapling coinbase, bitcoin merkle tree, 32-byte
/// nonce.
#[derive(Debug, Clone)]
pub struct EquihashJobBuilder {
    chain: ChainParams,
    payout_script: ScriptBuf,
    pool_tag: Vec<u8>,
    extranonce1_size: usize,
}

impl EquihashJobBuilder {
    pub fn new(
        chain: ChainParams,
        payout_script: ScriptBuf,
        pool_tag: Vec<u8>,
        extranonce1_size: usize,
    ) -> Self {
        Self {
            chain,
            payout_script,
            pool_tag,
            extranonce1_size,
        }
    }
}

impl JobBuilder for EquihashJobBuilder {
    fn build(&self, id: JobId, template: Arc<Template>) -> Result<Job, BuildError> {
        let coinbase = coinbase::build(&template, &self.payout_script, &self.pool_tag)?;

        let txids: Vec<Txid> = template.transactions.iter().map(|tx| tx.txid).collect();
        let merkle_branch = merkle::coinbase_branch(&txids);
        let merkle_root = merkle::merkle_root(coinbase.txid, &txids);

        let target = U256::from(Target::from_compact(template.bits));

        Ok(Job {
            id,
            prev_blockhash: template.prev_blockhash,
            height: template.height,
            version: template.version,
            bits: template.bits,
            target,
            difficulty: Difficulty::from_target(target, self.chain.diff1),
            time: template.cur_time,
            reserved: template.reserved,
            coinbase: coinbase.data,
            coinbase_txid: coinbase.txid,
            merkle_root,
            merkle_branch,
            extranonce2_size: NONCE_SIZE.saturating_sub(self.extranonce1_size),
            created_at: OffsetDateTime::now_utc(),
            template,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{job_builder, template};

    #[test]
    fn builds_consistent_job() {
        let template = Arc::new(template(100));
        let job = job_builder().build(JobId::new(7), template.clone()).unwrap();

        assert_eq!(job.id, JobId::new(7));
        assert_eq!(job.height, 100);
        assert_eq!(job.prev_blockhash, template.prev_blockhash);
        assert_eq!(job.time, template.cur_time);
        assert_eq!(job.extranonce2_size, 28);
        assert_eq!(
            merkle::root_from_branch(job.coinbase_txid, &job.merkle_branch),
            job.merkle_root
        );
        assert!(Arc::ptr_eq(&job.template, &template));
    }

    #[test]
    fn target_and_difficulty_follow_bits() {
        let mut t = template(100);
        // Regtest powLimit-ish: 0x0f0f0f << 8*(0x20-3)
        t.bits = bitcoin::pow::CompactTarget::from_consensus(0x200f0f0f);
        let job = job_builder().build(JobId::new(1), Arc::new(t)).unwrap();

        assert_eq!(job.target.to_be_bytes()[0..3], [0x0f, 0x0f, 0x0f]);
        // diff1 is 0x0007ff.., target is 0x0f0f0f.., so difficulty < 1
        assert!(job.difficulty.as_f64() < 1.0);
        assert!(job.difficulty.as_f64() > 0.0);

        // Tighter bits, higher difficulty
        let mut t = template(100);
        t.bits = bitcoin::pow::CompactTarget::from_consensus(0x1d00ffff);
        let harder = job_builder().build(JobId::new(2), Arc::new(t)).unwrap();
        assert!(harder.difficulty > job.difficulty);
    }

    #[test]
    fn build_is_deterministic_apart_from_timestamp() {
        let template = Arc::new(template(100));
        let a = job_builder().build(JobId::new(1), template.clone()).unwrap();
        let b = job_builder().build(JobId::new(1), template).unwrap();

        assert_eq!(a.coinbase, b.coinbase);
        assert_eq!(a.merkle_root, b.merkle_root);
        assert_eq!(a.target, b.target);
    }
}
