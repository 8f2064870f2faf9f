//! Coinbase transaction assembly.
//!
//! When the daemon supplies `coinbasetxn` it is used verbatim, since it
//! already carries funding streams and the correct transaction version for
//! the network upgrade in force. Otherwise the pool builds a Sapling (v4)
//! coinbase paying the miner subsidy plus the template's transaction fees to
//! the payout script.

use bitcoin::consensus::encode::{VarInt, serialize};
use bitcoin::hashes::{Hash, sha256d};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::{Amount, Script, Txid};

use super::BuildError;
use crate::job_manager::fetcher::Template;

/// Overwintered flag plus transaction version 4.
const SAPLING_TX_HEADER: u32 = 0x8000_0004;

/// Sapling version group id.
const SAPLING_VERSION_GROUP_ID: u32 = 0x892f_2085;

/// A serialized coinbase and its txid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coinbase {
    pub data: Vec<u8>,
    pub txid: Txid,
}

/// Build the coinbase for `template`.
pub fn build(
    template: &Template,
    payout_script: &Script,
    pool_tag: &[u8],
) -> Result<Coinbase, BuildError> {
    if let Some(cb) = &template.coinbase_txn {
        return Ok(Coinbase {
            txid: cb.txid.unwrap_or_else(|| sha256d_txid(&cb.data)),
            data: cb.data.clone(),
        });
    }

    let value = coinbase_value(template)?;
    let script_sig = script_sig(template.height, pool_tag)?;

    let mut tx = Vec::with_capacity(128 + script_sig.len() + payout_script.len());
    tx.extend_from_slice(&SAPLING_TX_HEADER.to_le_bytes());
    tx.extend_from_slice(&SAPLING_VERSION_GROUP_ID.to_le_bytes());

    // One input spending the null outpoint
    tx.extend(serialize(&VarInt(1)));
    tx.extend_from_slice(&[0u8; 32]);
    tx.extend_from_slice(&u32::MAX.to_le_bytes());
    tx.extend(serialize(&script_sig));
    tx.extend_from_slice(&u32::MAX.to_le_bytes());

    // One output to the pool
    tx.extend(serialize(&VarInt(1)));
    tx.extend_from_slice(&value.to_sat().to_le_bytes());
    tx.extend(serialize(&payout_script.to_owned()));

    // nLockTime, nExpiryHeight
    tx.extend_from_slice(&0u32.to_le_bytes());
    tx.extend_from_slice(&0u32.to_le_bytes());

    // valueBalance, then empty spends, outputs and joinsplits
    tx.extend_from_slice(&0i64.to_le_bytes());
    tx.extend(serialize(&VarInt(0)));
    tx.extend(serialize(&VarInt(0)));
    tx.extend(serialize(&VarInt(0)));

    Ok(Coinbase {
        txid: sha256d_txid(&tx),
        data: tx,
    })
}

/// Miner reward in coins, fees included, as reported to share consumers.
pub fn block_reward(template: &Template) -> f64 {
    coinbase_value(template).map_or(0.0, Amount::to_btc)
}

// `coinbasevalue` already includes fees; the subsidy does not.
fn coinbase_value(template: &Template) -> Result<Amount, BuildError> {
    if let Some(subsidy) = &template.subsidy {
        let miner = Amount::from_btc(subsidy.miner)
            .map_err(|e| BuildError::InvalidAmount(subsidy.miner, e.to_string()))?;
        let fees = Amount::from_sat(template.total_fees());
        return miner
            .checked_add(fees)
            .ok_or_else(|| BuildError::InvalidAmount(subsidy.miner, "fees overflow".to_string()));
    }

    template
        .coinbase_value
        .map(Amount::from_sat)
        .ok_or(BuildError::MissingCoinbaseValue)
}

// BIP34 height followed by the pool tag.
fn script_sig(height: u64, pool_tag: &[u8]) -> Result<bitcoin::ScriptBuf, BuildError> {
    let height = i64::try_from(height).map_err(|_| BuildError::InvalidHeight(height))?;
    let mut builder = Builder::new().push_int(height);

    if !pool_tag.is_empty() {
        let tag = PushBytesBuf::try_from(pool_tag.to_vec()).map_err(|_| BuildError::TagTooLong)?;
        builder = builder.push_slice(tag);
    }

    let script = builder.into_script();
    // Consensus limit on coinbase scriptSig size
    if script.len() > 100 {
        return Err(BuildError::TagTooLong);
    }
    Ok(script)
}

fn sha256d_txid(data: &[u8]) -> Txid {
    Txid::from_raw_hash(sha256d::Hash::hash(data))
}
