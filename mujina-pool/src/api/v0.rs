//! API v0 endpoints.
//!
//! Version 0 signals an unstable API -- breaking changes are expected
//! until the pool reaches 1.0.

use axum::{Json, extract::State, http::StatusCode};
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc::error::TrySendError;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::server::SharedState;
use crate::api_client::types::{JobSummary, PoolState};
use crate::job_manager::fetcher;
use crate::job_manager::store::ActiveJob;
use crate::tracing::prelude::*;

/// Build the v0 API routes with OpenAPI metadata.
pub fn routes() -> OpenApiRouter<SharedState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(get_pool))
        .routes(routes!(get_jobs))
        .routes(routes!(get_current_job))
        .routes(routes!(post_template))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = OK, description = "Server is running", body = String),
    ),
)]
async fn health() -> &'static str {
    "OK"
}

/// Return the pool state snapshot.
#[utoipa::path(
    get,
    path = "/pool",
    tag = "pool",
    responses(
        (status = OK, description = "Current pool state", body = PoolState),
    ),
)]
async fn get_pool(State(state): State<SharedState>) -> Json<PoolState> {
    let manager = &state.manager;
    let current = manager.current_job();

    Json(PoolState {
        pool_id: manager.settings().pool_id.clone(),
        symbol: manager.chain().symbol.clone(),
        uptime_secs: state.started.elapsed().as_secs(),
        height: current.as_ref().map(|job| job.height),
        network_difficulty: current.as_ref().map(|job| job.difficulty.as_f64()),
        active_jobs: manager.store().len(),
        max_active_jobs: manager.store().capacity(),
    })
}

/// Return the job window, oldest first.
#[utoipa::path(
    get,
    path = "/jobs",
    tag = "jobs",
    responses(
        (status = OK, description = "Jobs miners may submit against", body = Vec<JobSummary>),
    ),
)]
async fn get_jobs(State(state): State<SharedState>) -> Json<Vec<JobSummary>> {
    Json(
        state
            .manager
            .store()
            .jobs()
            .iter()
            .map(|active| job_summary(active))
            .collect(),
    )
}

/// Return the current job, or 404 before the first job is built.
#[utoipa::path(
    get,
    path = "/jobs/current",
    tag = "jobs",
    responses(
        (status = OK, description = "Most recent job", body = JobSummary),
        (status = NOT_FOUND, description = "No job yet"),
    ),
)]
async fn get_current_job(State(state): State<SharedState>) -> Result<Json<JobSummary>, StatusCode> {
    state
        .manager
        .store()
        .jobs()
        .last()
        .map(|active| Json(job_summary(active)))
        .ok_or(StatusCode::NOT_FOUND)
}

/// Feed a block template to a pool running in stream mode.
///
/// Accepts a bare `getblocktemplate` result or a JSON-RPC response wrapping
/// one.
#[utoipa::path(
    post,
    path = "/template",
    tag = "jobs",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = ACCEPTED, description = "Template queued"),
        (status = BAD_REQUEST, description = "Payload is not a template"),
        (status = CONFLICT, description = "Pool is not in stream mode"),
        (status = SERVICE_UNAVAILABLE, description = "Feed is full or closed"),
    ),
)]
async fn post_template(State(state): State<SharedState>, body: String) -> Result<StatusCode, StatusCode> {
    let Some(feed) = &state.template_feed else {
        return Err(StatusCode::CONFLICT);
    };

    if let Err(e) = fetcher::parse_payload(&body) {
        debug!(error = %e, "Rejected template payload");
        return Err(StatusCode::BAD_REQUEST);
    }

    match feed.try_send(body) {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(TrySendError::Full(_)) => {
            warn!("Template feed full, dropping payload");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(TrySendError::Closed(_)) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

fn job_summary(active: &ActiveJob) -> JobSummary {
    let job = &active.job;
    JobSummary {
        job_id: job.id.to_string(),
        height: job.height,
        prev_hash: job.prev_blockhash.to_string(),
        bits: format!("{:08x}", job.bits.to_consensus()),
        time: job.time,
        network_difficulty: job.difficulty.as_f64(),
        transactions: job.template.transactions.len() + 1,
        submissions: active.submission_count(),
        created_at: job.created_at.format(&Rfc3339).unwrap_or_default(),
    }
}
