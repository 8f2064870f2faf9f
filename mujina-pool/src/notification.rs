//! Pool-wide events published by the job pipeline.

use serde::Serialize;

/// Events for subscribers outside the pipeline (stats, payouts, UIs).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolNotification {
    /// The chain moved to a new block and the job window was cleared.
    NewChainHeight {
        pool_id: String,
        height: u64,
        symbol: String,
    },

    /// A block candidate was accepted and confirmed by the daemon.
    BlockFound {
        pool_id: String,
        height: u64,
        hash: String,
        worker: String,
        reward: f64,
    },

    /// A block candidate was rejected or could not be confirmed.
    BlockSubmissionFailed {
        pool_id: String,
        height: u64,
        hash: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn serializes_tagged() {
        let n = PoolNotification::NewChainHeight {
            pool_id: "zec1".into(),
            height: 101,
            symbol: "ZEC".into(),
        };
        assert_eq!(
            serde_json::to_value(&n).unwrap(),
            json!({"type": "new_chain_height", "pool_id": "zec1", "height": 101, "symbol": "ZEC"})
        );
    }
}
