//! API models for the batch export endpoints.
//!
//! The external contract has three audiences:
//! - Operators start and stop batches via `POST /exports` and inspect
//!   progress via `GET /exports/current` and `GET /exports/batches/{id}`.
//! - Worker pages report back via `POST /signals` (a [`WorkerSignal`]) and
//!   hand off media via `POST /downloads` (a [`DownloadRequest`]).
//! - The download subsystem reads transient documents from
//!   `GET /artifacts/{id}`.
//!
//! A start request looks like:
//!
//! ```json
//! {
//!   "conversation_ids": ["c-1", "c-2"],
//!   "scope": "u/1"
//! }
//! ```
//!
//! and answers `{"ok": true, "batch_id": "..."}` or, while a batch is
//! already active, a 409 with `{"ok": false, "error": "AlreadyRunning"}`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ledger::{BatchRecord, JobRecord};
use crate::orchestrator::{ExportJob, JobResult};

#[derive(Debug, Deserialize, Clone)]
pub struct StartBatchRequest {
    pub conversation_ids: Vec<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StartBatchResponse {
    pub ok: bool,
    pub batch_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AckResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SignalResponse {
    pub ok: bool,
    /// Whether an active batch was waiting for this signal.
    pub delivered: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DownloadAcceptedResponse {
    pub ok: bool,
    pub download_id: String,
}

/// Live view of the orchestrator (GET /exports/current)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CurrentRunResponse {
    pub running: bool,
    pub batch_id: Option<String>,
    pub current_job: Option<ExportJob>,
    pub results: Vec<JobResult>,
}

/// Durable view of a finished batch (GET /exports/batches/{id})
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BatchView {
    pub batch: BatchRecord,
    pub jobs: Vec<JobRecord>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}
