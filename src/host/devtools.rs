//! Worker host backed by a browser's DevTools HTTP endpoint.
//!
//! `PUT /json/new?{url}` opens a new page target and returns its id;
//! `GET /json/close/{id}` closes it. The browser must be started with
//! `--remote-debugging-port`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{SpawnError, TargetUrl, WorkerHandle, WorkerHost};

/// HTTP client configuration for the DevTools endpoint.
#[derive(Debug, Clone)]
pub struct DevToolsConfig {
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for DevToolsConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9222".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TargetInfo {
    id: String,
}

/// `WorkerHost` implementation speaking the DevTools HTTP protocol.
pub struct DevToolsWorkerHost {
    client: Client,
    endpoint: String,
}

impl DevToolsWorkerHost {
    pub fn new(config: DevToolsConfig) -> Result<Self, SpawnError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SpawnError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl WorkerHost for DevToolsWorkerHost {
    async fn spawn(&self, target: &TargetUrl) -> Result<WorkerHandle, SpawnError> {
        let request_url = format!("{}/json/new?{}", self.endpoint, target.as_str());

        let response = self
            .client
            .put(&request_url)
            .send()
            .await
            .map_err(|e| SpawnError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SpawnError::Rejected(format!("{status}: {body}")));
        }

        let info: TargetInfo = response
            .json()
            .await
            .map_err(|e| SpawnError::Rejected(format!("malformed target info: {e}")))?;

        debug!(target_id = %info.id, url = %target, "Worker context created");
        Ok(WorkerHandle { target_id: info.id })
    }

    async fn close(&self, handle: &WorkerHandle) -> Result<(), SpawnError> {
        let request_url = format!("{}/json/close/{}", self.endpoint, handle.target_id);

        let response = self
            .client
            .get(&request_url)
            .send()
            .await
            .map_err(|e| SpawnError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            warn!(target_id = %handle.target_id, status = %response.status(), "Close rejected");
            return Err(SpawnError::Rejected(format!(
                "close rejected: {}",
                response.status()
            )));
        }

        debug!(target_id = %handle.target_id, "Worker context closed");
        Ok(())
    }
}
