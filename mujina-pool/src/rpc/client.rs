//! JSON-RPC over HTTP client for zcashd-compatible daemons.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::BlockHash;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::types::{Block, BlockSubsidy, BlockTemplate, JsonRpcRequest, JsonRpcResponse};
use super::{BlockchainDaemon, RpcError};
use crate::config::DaemonEndpoint;
use crate::tracing::prelude::*;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC client over a list of daemon endpoints.
pub struct RpcClient {
    http: reqwest::Client,
    endpoints: Vec<DaemonEndpoint>,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(endpoints: Vec<DaemonEndpoint>) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            endpoints,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoints(&self) -> &[DaemonEndpoint] {
        &self.endpoints
    }

    /// Run `method` against the first endpoint that answers.
    ///
    /// Endpoints are tried in order. A transport failure moves on to the next
    /// endpoint; an RPC error from a daemon that did answer is returned as is.
    pub async fn execute_any<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let mut last_error = RpcError::NoEndpoints;

        for endpoint in &self.endpoints {
            match self.call(endpoint, method, params.clone()).await {
                Ok(value) => return Ok(serde_json::from_value(value)?),
                Err(RpcError::Http(e)) => {
                    debug!(daemon = %endpoint.url, method, error = %e, "Daemon unreachable");
                    last_error = RpcError::Http(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    /// Run `method` against every endpoint concurrently.
    ///
    /// Results are in endpoint order.
    pub async fn execute_all(&self, method: &str, params: Value) -> Vec<Result<Value, RpcError>> {
        join_all(
            self.endpoints
                .iter()
                .map(|endpoint| self.call(endpoint, method, params.clone())),
        )
        .await
    }

    /// Send several calls as one JSON-RPC batch to the first endpoint that
    /// answers. Per-call results are returned in request order.
    pub async fn execute_batch(
        &self,
        calls: &[(&str, Value)],
    ) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
        let mut last_error = RpcError::NoEndpoints;

        for endpoint in &self.endpoints {
            let first_id = self.next_id.fetch_add(calls.len() as u64, Ordering::Relaxed);
            let requests: Vec<_> = calls
                .iter()
                .zip(first_id..)
                .map(|((method, params), id)| JsonRpcRequest {
                    jsonrpc: "1.0",
                    id,
                    method,
                    params: params.clone(),
                })
                .collect();

            let body = match self.post(endpoint, &requests).await {
                Ok(body) => body,
                Err(RpcError::Http(e)) => {
                    debug!(daemon = %endpoint.url, error = %e, "Daemon unreachable");
                    last_error = RpcError::Http(e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let responses: Vec<JsonRpcResponse> = serde_json::from_slice(&body)?;
            let mut results: Vec<Option<Result<Value, RpcError>>> =
                (0..calls.len()).map(|_| None).collect();
            for response in responses {
                let slot = response
                    .id
                    .as_ref()
                    .and_then(Value::as_u64)
                    .and_then(|id| id.checked_sub(first_id))
                    .and_then(|i| results.get_mut(i as usize));
                if let Some(slot) = slot {
                    *slot = Some(into_result(response));
                }
            }

            return Ok(results
                .into_iter()
                .map(|r| {
                    r.unwrap_or(Err(RpcError::Rpc {
                        code: 0,
                        message: "missing from batch response".to_string(),
                    }))
                })
                .collect());
        }

        Err(last_error)
    }

    async fn call(
        &self,
        endpoint: &DaemonEndpoint,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "1.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        trace!(daemon = %endpoint.url, method, id = request.id, "RPC request");
        let body = self.post(endpoint, &request).await?;
        let response: JsonRpcResponse = serde_json::from_slice(&body)?;
        into_result(response)
    }

    // zcashd answers RPC errors with HTTP 500 and a JSON body, so the body is
    // parsed whatever the status. Only an unparseable non-2xx is an HTTP error.
    async fn post<B: serde::Serialize + ?Sized>(
        &self,
        endpoint: &DaemonEndpoint,
        body: &B,
    ) -> Result<bytes::Bytes, RpcError> {
        let mut request = self.http.post(endpoint.url.clone()).json(body);
        if !endpoint.user.is_empty() {
            request = request.basic_auth(&endpoint.user, Some(&endpoint.password));
        }

        let response = request.send().await?;
        let status_error = response.error_for_status_ref().err();
        let body = response.bytes().await?;

        match status_error {
            Some(e) if serde_json::from_slice::<Value>(&body).is_err() => Err(RpcError::Http(e)),
            _ => Ok(body),
        }
    }
}

fn into_result(response: JsonRpcResponse) -> Result<Value, RpcError> {
    match response.error {
        Some(error) => Err(error.into()),
        None => Ok(response.result.unwrap_or(Value::Null)),
    }
}

#[async_trait]
impl BlockchainDaemon for RpcClient {
    async fn get_block_template(&self, params: &Value) -> Result<BlockTemplate, RpcError> {
        self.execute_any("getblocktemplate", json!([params])).await
    }

    async fn get_block_subsidy(&self) -> Result<BlockSubsidy, RpcError> {
        self.execute_any("getblocksubsidy", json!([])).await
    }

    async fn submit_block(&self, block_hex: &str) -> Result<Option<String>, RpcError> {
        self.execute_any("submitblock", json!([block_hex])).await
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<Block, RpcError> {
        self.execute_any("getblock", json!([hash.to_string()])).await
    }
}
