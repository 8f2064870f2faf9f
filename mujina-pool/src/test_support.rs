//! Shared fixtures for unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, PubkeyHash, ScriptBuf};
use parking_lot::Mutex;
use serde_json::Value;

use crate::chain::ChainParams;
use crate::job::{EquihashJobBuilder, Job, JobBuilder, JobId};
use crate::job_manager::fetcher::Template;
use crate::rpc::types::TemplateTransaction;
use crate::rpc::{Block, BlockSubsidy, BlockTemplate, BlockchainDaemon, RpcError};
use crate::verifier::{EquihashParams, SolutionVerifier};

/// Template at `height` whose previous block hash is derived from the height,
/// so consecutive heights always differ.
pub fn raw_template(height: u64) -> BlockTemplate {
    BlockTemplate {
        version: 4,
        previous_block_hash: format!("{height:064x}"),
        cur_time: 1_700_000_000,
        min_time: None,
        bits: "200f0f0f".to_string(),
        target: None,
        height,
        transactions: vec![
            TemplateTransaction {
                data: "0102".to_string(),
                hash: "11".repeat(32),
                fee: Some(1000),
            },
            TemplateTransaction {
                data: "0304".to_string(),
                hash: "22".repeat(32),
                fee: None,
            },
        ],
        coinbase_txn: None,
        coinbase_value: Some(625_000_000),
        final_sapling_root_hash: Some(format!("01{}ff", "00".repeat(30))),
        block_commitments_hash: None,
    }
}

pub fn template(height: u64) -> Template {
    let subsidy = BlockSubsidy {
        miner: 3.125,
        ..Default::default()
    };
    Template::from_rpc(raw_template(height), Some(subsidy)).unwrap()
}

pub fn block_hash(byte: u8) -> BlockHash {
    BlockHash::from_byte_array([byte; 32])
}

pub fn job_builder() -> EquihashJobBuilder {
    let payout = ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array([0x11; 20]));
    EquihashJobBuilder::new(
        ChainParams::lookup("ZEC").unwrap(),
        payout,
        b"/mujina/".to_vec(),
        4,
    )
}

pub fn test_job(id: u64, height: u64) -> Arc<Job> {
    Arc::new(
        job_builder()
            .build(JobId::new(id), Arc::new(template(height)))
            .unwrap(),
    )
}

/// Verifier with a fixed answer.
pub struct FakeVerifier(pub bool);

impl SolutionVerifier for FakeVerifier {
    fn is_valid_solution(&self, _header: &[u8], _solution: &[u8], _params: &EquihashParams) -> bool {
        self.0
    }
}

#[derive(Default)]
struct DaemonState {
    template: Option<BlockTemplate>,
    template_error: Option<i32>,
    subsidy: Option<Result<BlockSubsidy, i32>>,
    template_calls: usize,
    last_template_params: Option<Value>,
    submit_result: Option<Result<Option<String>, RpcError>>,
    submitted: Vec<String>,
    block_hash_override: Option<String>,
}

/// In-memory daemon with scripted answers.
///
/// Defaults: no template (calls fail), `getblocksubsidy` missing,
/// `submitblock` accepts, `getblock` echoes the requested hash.
#[derive(Default)]
pub struct FakeDaemon {
    state: Mutex<DaemonState>,
}

impl FakeDaemon {
    pub const COINBASE_TXID: &'static str =
        "c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_template(&self, template: BlockTemplate) {
        let mut state = self.state.lock();
        state.template = Some(template);
        state.template_error = None;
    }

    /// Make `getblocktemplate` fail with `code`.
    pub fn fail_templates(&self, code: i32) {
        self.state.lock().template_error = Some(code);
    }

    pub fn set_subsidy(&self, subsidy: Result<BlockSubsidy, i32>) {
        self.state.lock().subsidy = Some(subsidy);
    }

    pub fn set_submit_result(&self, result: Result<Option<String>, RpcError>) {
        self.state.lock().submit_result = Some(result);
    }

    pub fn set_block_hash_override(&self, hash: Option<String>) {
        self.state.lock().block_hash_override = hash;
    }

    pub fn template_calls(&self) -> usize {
        self.state.lock().template_calls
    }

    pub fn last_template_params(&self) -> Option<Value> {
        self.state.lock().last_template_params.clone()
    }

    pub fn submitted_blocks(&self) -> Vec<String> {
        self.state.lock().submitted.clone()
    }
}

fn rpc_error(code: i32) -> RpcError {
    RpcError::Rpc {
        code,
        message: format!("scripted error {code}"),
    }
}

#[async_trait]
impl BlockchainDaemon for FakeDaemon {
    async fn get_block_template(&self, params: &Value) -> Result<BlockTemplate, RpcError> {
        let mut state = self.state.lock();
        state.template_calls += 1;
        state.last_template_params = Some(params.clone());

        if let Some(code) = state.template_error {
            return Err(rpc_error(code));
        }
        state.template.clone().ok_or_else(|| rpc_error(-10))
    }

    async fn get_block_subsidy(&self) -> Result<BlockSubsidy, RpcError> {
        match self.state.lock().subsidy.clone() {
            Some(Ok(subsidy)) => Ok(subsidy),
            Some(Err(code)) => Err(rpc_error(code)),
            None => Err(rpc_error(crate::rpc::METHOD_NOT_FOUND)),
        }
    }

    async fn submit_block(&self, block_hex: &str) -> Result<Option<String>, RpcError> {
        let mut state = self.state.lock();
        state.submitted.push(block_hex.to_string());
        state.submit_result.take().unwrap_or(Ok(None))
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<Block, RpcError> {
        let state = self.state.lock();
        Ok(Block {
            hash: state
                .block_hash_override
                .clone()
                .unwrap_or_else(|| hash.to_string()),
            height: None,
            confirmations: Some(1),
            tx: vec![Self::COINBASE_TXID.to_string()],
        })
    }
}
