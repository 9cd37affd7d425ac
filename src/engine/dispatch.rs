// ── Engine: Dispatch Client ────────────────────────────────────────────────
// Thin transport wrapper. Performs the actual call against a selected
// endpoint and classifies the outcome — success, timeout, or error. The
// router owns retries and fallback; nothing here loops.

use crate::atoms::types::Endpoint;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::time::Instant;

/// Classified result of one dispatch attempt.
#[derive(Debug, Clone)]
pub enum DispatchResult {
    Success { response: Vec<u8>, latency: Duration },
    Timeout,
    Error(String),
}

#[async_trait]
pub trait DispatchClient: Send + Sync {
    /// Execute the payload against `endpoint`, bounded by `timeout`.
    async fn dispatch(&self, endpoint: &Endpoint, payload: &[u8], timeout: Duration)
        -> DispatchResult;

    /// Liveness probe. Failures and timeouts are treated identically.
    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> bool;
}

/// HTTP transport: POST the payload to the endpoint's invoke path, GET its
/// health path for probes. Endpoints speak their own protocols behind these
/// two calls — the body is opaque here.
pub struct HttpDispatchClient {
    client: Client,
}

impl HttpDispatchClient {
    pub fn new() -> Self {
        HttpDispatchClient { client: Client::new() }
    }
}

impl Default for HttpDispatchClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchClient for HttpDispatchClient {
    async fn dispatch(
        &self,
        endpoint: &Endpoint,
        payload: &[u8],
        timeout: Duration,
    ) -> DispatchResult {
        let url = format!("{}/invoke", endpoint.address.trim_end_matches('/'));
        let started = Instant::now();

        let result = self
            .client
            .post(&url)
            .header("content-type", "application/octet-stream")
            .body(payload.to_vec())
            .timeout(timeout)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(body) => DispatchResult::Success {
                    response: body.to_vec(),
                    latency: started.elapsed(),
                },
                Err(e) => DispatchResult::Error(format!("body read: {}", e)),
            },
            Ok(resp) => DispatchResult::Error(format!("status {}", resp.status())),
            Err(e) if e.is_timeout() => DispatchResult::Timeout,
            Err(e) => DispatchResult::Error(e.to_string()),
        }
    }

    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> bool {
        let url = format!("{}/health", endpoint.address.trim_end_matches('/'));
        match self.client.get(&url).timeout(timeout).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
