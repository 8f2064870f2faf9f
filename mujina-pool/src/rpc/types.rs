//! Daemon JSON-RPC payloads.
//!
//! Field names follow zcashd's `getblocktemplate`, `getblocksubsidy` and
//! `getblock` results. Values stay as the daemon reports them (hex strings,
//! display byte order); [`crate::job_manager::fetcher`] normalizes them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of `getblocktemplate`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlockTemplate {
    pub version: u32,

    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: String,

    #[serde(rename = "curtime")]
    pub cur_time: u32,

    #[serde(rename = "mintime", default)]
    pub min_time: Option<u32>,

    /// Compact target, big-endian hex.
    pub bits: String,

    /// Expanded target, big-endian hex.
    #[serde(default)]
    pub target: Option<String>,

    pub height: u64,

    #[serde(default)]
    pub transactions: Vec<TemplateTransaction>,

    /// Coinbase built by the daemon, when it supports `coinbasetxn`.
    #[serde(rename = "coinbasetxn", default)]
    pub coinbase_txn: Option<CoinbaseTxn>,

    /// Value available to the coinbase, in zatoshi.
    #[serde(rename = "coinbasevalue", default)]
    pub coinbase_value: Option<u64>,

    /// Sapling note commitment tree root (Sapling through Canopy).
    #[serde(rename = "finalsaplingroothash", default)]
    pub final_sapling_root_hash: Option<String>,

    /// Block commitments hash (NU5 and later).
    #[serde(rename = "blockcommitmentshash", default)]
    pub block_commitments_hash: Option<String>,
}

/// A mempool transaction selected into the template.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TemplateTransaction {
    /// Raw transaction, hex.
    pub data: String,

    /// Transaction id, display order hex.
    pub hash: String,

    #[serde(default)]
    pub fee: Option<i64>,
}

/// Daemon-built coinbase transaction.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoinbaseTxn {
    pub data: String,

    #[serde(default)]
    pub hash: Option<String>,
}

/// Result of `getblocksubsidy`, amounts in coins.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BlockSubsidy {
    pub miner: f64,

    #[serde(default)]
    pub founders: f64,

    #[serde(default)]
    pub community: Option<f64>,
}

/// Result of `getblock` with default verbosity.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Block {
    pub hash: String,

    #[serde(default)]
    pub height: Option<u64>,

    #[serde(default)]
    pub confirmations: Option<i64>,

    /// Transaction ids, coinbase first.
    #[serde(default)]
    pub tx: Vec<String>,
}

/// JSON-RPC request body.
#[derive(Debug, Serialize)]
pub(crate) struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

/// JSON-RPC response envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,

    #[serde(default)]
    pub error: Option<JsonRpcError>,

    #[serde(default)]
    pub id: Option<Value>,
}

/// Error object of a JSON-RPC response.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_zcashd_template() {
        let json = r#"{
            "capabilities": ["proposal"],
            "version": 4,
            "previousblockhash": "0000000001a6d2cfb5a1a4a6d5a79f5c6b7a3ad0c9ec02e07b9e5e2df0a8f6c1",
            "finalsaplingroothash": "3e49b5f954aa9d3545bc6c37744661eea48d7c34e3000d82b7f0010c30f4c2fb",
            "transactions": [
                {"data": "0400008085", "hash": "aa11", "fee": 1000, "depends": []}
            ],
            "coinbasetxn": {"data": "0400008085202f89", "hash": "bb22", "required": true},
            "target": "0000000005a2c5000000000000000000000000000000000000000000000000000",
            "mintime": 1700000000,
            "curtime": 1700000100,
            "bits": "1c05a2c5",
            "height": 2000000
        }"#;

        let template: BlockTemplate = serde_json::from_str(json).unwrap();
        assert_eq!(template.version, 4);
        assert_eq!(template.height, 2_000_000);
        assert_eq!(template.bits, "1c05a2c5");
        assert_eq!(template.min_time, Some(1_700_000_000));
        assert_eq!(template.transactions.len(), 1);
        assert_eq!(template.transactions[0].fee, Some(1000));
        assert!(template.coinbase_txn.is_some());
        assert!(template.block_commitments_hash.is_none());
    }

    #[test]
    fn parses_subsidy_without_founders() {
        let subsidy: BlockSubsidy = serde_json::from_str(r#"{"miner": 3.125}"#).unwrap();
        assert_eq!(subsidy.miner, 3.125);
        assert_eq!(subsidy.founders, 0.0);
    }

    #[test]
    fn parses_error_envelope() {
        let resp: JsonRpcResponse = serde_json::from_str(
            r#"{"result": null, "error": {"code": -32601, "message": "Method not found"}, "id": 1}"#,
        )
        .unwrap();
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, -32601);
    }
}
