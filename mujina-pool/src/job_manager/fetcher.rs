//! Template fetching and normalization.
//!
//! A refresh either carries a template payload (stream mode) or asks the
//! daemon for one. Either way the raw `getblocktemplate` result is checked
//! and converted into a [`Template`] with decoded hashes, bits and
//! transaction bytes, so job building never parses hex.

use std::str::FromStr;

use bitcoin::pow::{CompactTarget, Target};
use bitcoin::{BlockHash, Txid};
use serde_json::{Value, json};
use thiserror::Error;

use crate::rpc::{self, BlockSubsidy, BlockTemplate, BlockchainDaemon, RpcError};
use crate::template_source::RefreshRequest;
use crate::tracing::prelude::*;

/// Capabilities advertised in every `getblocktemplate` request.
pub const TEMPLATE_CAPABILITIES: [&str; 3] = ["coinbasetxn", "workid", "coinbase/append"];

/// Errors while obtaining a template. Never fatal to the pipeline.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("getblocktemplate failed: {0}")]
    Template(RpcError),

    #[error("getblocksubsidy failed: {0}")]
    Subsidy(RpcError),

    #[error("template payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("invalid template field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl FetchError {
    fn invalid(field: &'static str, reason: impl ToString) -> Self {
        Self::InvalidField {
            field,
            reason: reason.to_string(),
        }
    }
}

/// A transaction selected by the daemon, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateTransaction {
    pub txid: Txid,
    pub data: Vec<u8>,

    /// Fee in zatoshi; zero when the daemon omits it.
    pub fee: u64,
}

/// A daemon-built coinbase transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinbaseTransaction {
    pub data: Vec<u8>,

    /// Txid reported by the daemon. Required for v5 transactions, whose txid
    /// is not the double-SHA256 of their bytes.
    pub txid: Option<Txid>,
}

/// Normalized block template. Immutable once fetched.
#[derive(Debug, Clone)]
pub struct Template {
    pub version: u32,
    pub prev_blockhash: BlockHash,
    pub height: u64,
    pub bits: CompactTarget,
    pub cur_time: u32,
    pub min_time: Option<u32>,

    /// Header commitment field (final sapling root or block commitments
    /// hash), internal byte order. Zero before Sapling.
    pub reserved: [u8; 32],

    pub transactions: Vec<TemplateTransaction>,
    pub coinbase_txn: Option<CoinbaseTransaction>,

    /// Coinbase value in zatoshi, when the daemon reports it.
    pub coinbase_value: Option<u64>,

    pub subsidy: Option<BlockSubsidy>,
}

impl Template {
    /// Decode a raw `getblocktemplate` result.
    pub fn from_rpc(raw: BlockTemplate, subsidy: Option<BlockSubsidy>) -> Result<Self, FetchError> {
        let prev_blockhash = BlockHash::from_str(&raw.previous_block_hash)
            .map_err(|e| FetchError::invalid("previousblockhash", e))?;

        let bits = u32::from_str_radix(&raw.bits, 16)
            .map(CompactTarget::from_consensus)
            .map_err(|e| FetchError::invalid("bits", e))?;

        let reserved = match raw
            .block_commitments_hash
            .as_deref()
            .or(raw.final_sapling_root_hash.as_deref())
        {
            Some(hex_str) => {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(hex_str, &mut bytes)
                    .map_err(|e| FetchError::invalid("finalsaplingroothash", e))?;
                // Reported in display order
                bytes.reverse();
                bytes
            }
            None => [0u8; 32],
        };

        let transactions = raw
            .transactions
            .iter()
            .map(|tx| {
                Ok(TemplateTransaction {
                    txid: Txid::from_str(&tx.hash)
                        .map_err(|e| FetchError::invalid("transactions.hash", e))?,
                    data: hex::decode(&tx.data)
                        .map_err(|e| FetchError::invalid("transactions.data", e))?,
                    fee: u64::try_from(tx.fee.unwrap_or(0))
                        .map_err(|e| FetchError::invalid("transactions.fee", e))?,
                })
            })
            .collect::<Result<Vec<_>, FetchError>>()?;

        let coinbase_txn = raw
            .coinbase_txn
            .as_ref()
            .map(|cb| {
                Ok::<_, FetchError>(CoinbaseTransaction {
                    data: hex::decode(&cb.data)
                        .map_err(|e| FetchError::invalid("coinbasetxn.data", e))?,
                    txid: cb
                        .hash
                        .as_deref()
                        .map(Txid::from_str)
                        .transpose()
                        .map_err(|e| FetchError::invalid("coinbasetxn.hash", e))?,
                })
            })
            .transpose()?;

        if let Some(target_hex) = &raw.target {
            check_target(target_hex, bits)?;
        }

        Ok(Self {
            version: raw.version,
            prev_blockhash,
            height: raw.height,
            bits,
            cur_time: raw.cur_time,
            min_time: raw.min_time,
            reserved,
            transactions,
            coinbase_txn,
            coinbase_value: raw.coinbase_value,
            subsidy,
        })
    }

    /// Sum of the selected transactions' fees, in zatoshi.
    pub fn total_fees(&self) -> u64 {
        self.transactions.iter().map(|tx| tx.fee).sum()
    }
}

// The expanded target must agree with the compact bits it was derived from.
fn check_target(target_hex: &str, bits: CompactTarget) -> Result<(), FetchError> {
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(target_hex, &mut bytes).map_err(|e| FetchError::invalid("target", e))?;

    let reported = Target::from_be_bytes(bytes);
    let expected = Target::from_compact(bits);
    if reported != expected {
        return Err(FetchError::invalid(
            "target",
            format!("{target_hex} does not match bits {:08x}", bits.to_consensus()),
        ));
    }
    Ok(())
}

/// The `getblocktemplate` request object.
pub fn template_request_params() -> Value {
    json!({ "capabilities": TEMPLATE_CAPABILITIES })
}

/// Parse a stream payload: either a bare template or a JSON-RPC response
/// wrapping one.
pub fn parse_payload(payload: &str) -> Result<BlockTemplate, FetchError> {
    let value: Value = serde_json::from_str(payload)?;

    let is_envelope = value
        .as_object()
        .is_some_and(|obj| obj.contains_key("result") || obj.contains_key("error"));
    if !is_envelope {
        return Ok(serde_json::from_value(value)?);
    }

    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let error: rpc::JsonRpcError = serde_json::from_value(error.clone())?;
        return Err(FetchError::Template(error.into()));
    }

    let result = value.get("result").cloned().unwrap_or(Value::Null);
    Ok(serde_json::from_value(result)?)
}

/// Obtain the template for a refresh request.
pub async fn fetch(
    daemon: &dyn BlockchainDaemon,
    request: &RefreshRequest,
) -> Result<Template, FetchError> {
    if let Some(payload) = &request.payload {
        let raw = parse_payload(payload)?;
        return Template::from_rpc(raw, None);
    }

    let subsidy = match daemon.get_block_subsidy().await {
        Ok(subsidy) => Some(subsidy),
        Err(e) if e.code() == Some(rpc::METHOD_NOT_FOUND) => {
            trace!("Daemon has no getblocksubsidy");
            None
        }
        Err(e) => return Err(FetchError::Subsidy(e)),
    };

    let raw = daemon
        .get_block_template(&template_request_params())
        .await
        .map_err(FetchError::Template)?;

    Template::from_rpc(raw, subsidy)
}
