//! HTTP client for the pool API.

pub mod types;

use reqwest::StatusCode;

use types::{JobSummary, PoolState};

/// Default API base URL, matching the daemon's default bind address.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:7785";

pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v0{}", self.base_url, path)
    }

    pub async fn get_pool(&self) -> Result<PoolState, reqwest::Error> {
        self.http
            .get(self.url("/pool"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    pub async fn get_jobs(&self) -> Result<Vec<JobSummary>, reqwest::Error> {
        self.http
            .get(self.url("/jobs"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// The current job, or `None` before the first job is built.
    pub async fn get_current_job(&self) -> Result<Option<JobSummary>, reqwest::Error> {
        let response = self.http.get(self.url("/jobs/current")).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        response.error_for_status()?.json().await.map(Some)
    }

    /// Feed a template payload to a pool running in stream mode.
    pub async fn post_template(&self, payload: String) -> Result<(), reqwest::Error> {
        self.http
            .post(self.url("/template"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}
