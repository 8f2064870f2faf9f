//! Per-chain network parameters.

use crate::u256::U256;
use crate::verifier::EquihashParams;

/// Network parameters the job pipeline needs for one coin.
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Ticker symbol, used in chain-height notifications.
    pub symbol: String,

    /// Equihash parameter set.
    pub equihash: EquihashParams,

    /// Target that corresponds to difficulty 1 (the chain's pow limit).
    pub diff1: U256,
}

/// Zcash `powLimit` on mainnet, kept by the forks in the table.
const ZCASH_DIFF1: &str = "0007ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";

impl ChainParams {
    /// Built-in parameters for a coin symbol (case-insensitive).
    pub fn lookup(symbol: &str) -> Option<Self> {
        let symbol = symbol.to_ascii_uppercase();
        let (equihash, diff1) = match symbol.as_str() {
            "ZEC" | "ZEN" | "ZCL" | "KMD" => (EquihashParams::EH_200_9, ZCASH_DIFF1),
            "ZER" => (EquihashParams::EH_192_7, ZCASH_DIFF1),
            _ => return None,
        };

        Some(Self {
            symbol,
            equihash,
            diff1: U256::from_be_hex(diff1).ok()?,
        })
    }
}
