//! Blockchain daemon access.
//!
//! The job pipeline talks to the daemon through [`BlockchainDaemon`], which
//! covers the four calls it needs. [`RpcClient`] implements it over
//! JSON-RPC/HTTP against one or more daemon endpoints.

mod client;
pub mod types;

use async_trait::async_trait;
use bitcoin::BlockHash;
use serde_json::Value;
use thiserror::Error;

pub use client::RpcClient;
pub use types::{Block, BlockSubsidy, BlockTemplate, JsonRpcError};

/// JSON-RPC error code for "method not found".
pub const METHOD_NOT_FOUND: i32 = -32601;

/// Errors from a daemon call.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Unexpected response: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("No daemon endpoint available")]
    NoEndpoints,
}

impl RpcError {
    /// The JSON-RPC error code, if the daemon answered with one.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<JsonRpcError> for RpcError {
    fn from(e: JsonRpcError) -> Self {
        Self::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

/// Daemon capability consumed by the job pipeline.
#[async_trait]
pub trait BlockchainDaemon: Send + Sync {
    /// `getblocktemplate` with the given request object.
    async fn get_block_template(&self, params: &Value) -> Result<BlockTemplate, RpcError>;

    /// `getblocksubsidy` for the next block.
    async fn get_block_subsidy(&self) -> Result<BlockSubsidy, RpcError>;

    /// `submitblock`. `Ok(None)` means accepted; `Ok(Some(reason))` is a
    /// rejection reason such as `"duplicate"` or `"inconclusive"`.
    async fn submit_block(&self, block_hex: &str) -> Result<Option<String>, RpcError>;

    /// `getblock` by hash.
    async fn get_block(&self, hash: &BlockHash) -> Result<Block, RpcError>;
}
