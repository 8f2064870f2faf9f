//! API data transfer objects.
//!
//! These types define the API contract shared between the server and
//! clients.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Pool status snapshot.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct PoolState {
    pub pool_id: String,
    pub symbol: String,
    pub uptime_secs: u64,

    /// Height of the current job, if any job has been built yet.
    pub height: Option<u64>,

    /// Network difficulty of the current job.
    pub network_difficulty: Option<f64>,

    pub active_jobs: usize,
    pub max_active_jobs: usize,
}

/// A job in the window.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct JobSummary {
    /// Hex job id as sent to miners.
    pub job_id: String,
    pub height: u64,

    /// Previous block hash, display order.
    pub prev_hash: String,

    pub bits: String,
    pub time: u32,
    pub network_difficulty: f64,

    /// Transactions in the block, coinbase included.
    pub transactions: usize,

    /// Distinct shares submitted against this job.
    pub submissions: usize,

    /// RFC 3339 creation time.
    pub created_at: String,
}
