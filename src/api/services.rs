use axum::{Json, extract::State, http::HeaderMap, response::IntoResponse};
use http_body_util::BodyExt;

use super::{
    models::{
        AckResponse, BatchView, CurrentRunResponse, DownloadAcceptedResponse, HealthResponse,
        SignalResponse, StartBatchRequest, StartBatchResponse,
    },
    state::AppState,
};
use crate::api::error::ApiError;
use crate::downloads::DownloadError;
use crate::orchestrator::{ExportParams, OrchestratorError};
use crate::protocol::{DownloadRequest, WorkerSignal};

/// Batch start endpoint (POST /exports)
///
/// Validates the request and hands the conversation list to the
/// orchestrator. The batch runs on its own task; this returns as soon as the
/// run is admitted.
///
/// ## Flow:
/// 1. Validate headers (Content-Type) and body size
/// 2. Deserialize and validate the conversation list
/// 3. Admit the batch; a concurrent batch yields 409 AlreadyRunning with no
///    state change
/// 4. Return 202 Accepted with the batch_id
pub async fn start_export(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let body_bytes = read_json_body(&state, &headers, body).await?;
    let request: StartBatchRequest = serde_json::from_slice(&body_bytes)?;

    if request.conversation_ids.is_empty() {
        return Err(ApiError::InvalidPayload(
            "conversation_ids must not be empty".into(),
        ));
    }
    let limit = state.config.server.api.max_jobs_per_batch;
    if request.conversation_ids.len() > limit {
        return Err(ApiError::InvalidPayload(format!(
            "conversation_ids exceeds the per-batch limit of {limit}"
        )));
    }
    if request.conversation_ids.iter().any(|id| id.is_empty()) {
        return Err(ApiError::InvalidPayload(
            "conversation_ids must not contain empty ids".into(),
        ));
    }

    let params = ExportParams {
        scope: request.scope,
    };
    let batch_id = state
        .orchestrator
        .start(request.conversation_ids, params)
        .map_err(|OrchestratorError::AlreadyRunning| ApiError::AlreadyRunning)?;

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(StartBatchResponse { ok: true, batch_id }),
    ))
}

/// Cooperative stop (POST /exports/stop)
///
/// Always acknowledges; the control loop finishes its in-flight job and
/// skips the rest.
pub async fn stop_export(State(state): State<AppState>) -> impl IntoResponse {
    state.orchestrator.stop();
    Json(AckResponse { ok: true })
}

/// Live run view (GET /exports/current)
pub async fn current_run(State(state): State<AppState>) -> impl IntoResponse {
    Json(CurrentRunResponse {
        running: state.orchestrator.is_running(),
        batch_id: state.orchestrator.current_batch(),
        current_job: state.orchestrator.current_job(),
        results: state.orchestrator.results(),
    })
}

/// Durable batch view (GET /exports/batches/{batch_id})
pub async fn get_batch(
    State(state): State<AppState>,
    axum::extract::Path(batch_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let batch = state
        .ledger
        .get_batch(&batch_id)
        .map_err(|e| ApiError::Internal(format!("Failed to read batch: {}", e)))?
        .ok_or_else(|| ApiError::NotFound(format!("batch {batch_id}")))?;
    let jobs = state
        .ledger
        .batch_jobs(&batch_id)
        .map_err(|e| ApiError::Internal(format!("Failed to read batch jobs: {}", e)))?;

    Ok(Json(BatchView { batch, jobs }))
}

/// Worker signal ingestion (POST /signals)
///
/// Terminal reports from worker pages. Signals for a job other than the one
/// in flight are accepted at the HTTP layer and dropped by the control loop;
/// `delivered: false` means no batch was listening at all.
pub async fn post_signal(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let body_bytes = read_json_body(&state, &headers, body).await?;
    let signal: WorkerSignal = serde_json::from_slice(&body_bytes)?;

    let delivered = state.orchestrator.signal(signal);
    Ok(Json(SignalResponse {
        ok: true,
        delivered,
    }))
}

/// Download hand-off (POST /downloads)
///
/// Worker pages post each media reference (or an inline transcript document)
/// here; the coordinator derives the destination, initiates the transfer,
/// and registers it for start tracking and artifact reclaim.
pub async fn post_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let body_bytes = read_json_body(&state, &headers, body).await?;
    let request: DownloadRequest = serde_json::from_slice(&body_bytes)?;

    let download_id = state
        .coordinator
        .request(request)
        .await
        .map_err(|e| match e {
            DownloadError::MissingSource => ApiError::InvalidPayload(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        })?;

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(DownloadAcceptedResponse {
            ok: true,
            download_id,
        }),
    ))
}

/// Transient artifact read (GET /artifacts/{artifact_id})
///
/// Served for the download subsystem; the artifact disappears once the
/// consuming transfer reaches a terminal state.
pub async fn get_artifact(
    State(state): State<AppState>,
    axum::extract::Path(artifact_id): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let body = state.artifacts.get(&artifact_id).await.map_err(|e| {
        use crate::artifacts::ArtifactError;
        match e {
            ArtifactError::NotFound(id) => ApiError::NotFound(format!("artifact {id}")),
            other => ApiError::Internal(other.to_string()),
        }
    })?;

    Ok((
        [(
            axum::http::header::CONTENT_TYPE,
            mime::APPLICATION_OCTET_STREAM.as_ref(),
        )],
        body,
    ))
}

/// Health check endpoint (GET /health)
///
/// Returns 200 with per-component status; in v0 a component is healthy if
/// the process is serving requests.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    use std::collections::HashMap;

    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    components.insert("ledger".to_string(), "healthy".to_string());
    components.insert(
        "orchestrator".to_string(),
        if state.orchestrator.is_running() {
            "running".to_string()
        } else {
            "idle".to_string()
        },
    );

    let response = HealthResponse {
        status: "healthy".to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (axum::http::StatusCode::OK, Json(response))
}

/// Reads a JSON request body, enforcing Content-Type and the configured size
/// limit
///
/// Note: Decompression is handled transparently by RequestDecompressionLayer
/// middleware, so this receives already-decompressed data.
async fn read_json_body(
    state: &AppState,
    headers: &HeaderMap,
    body: axum::body::Body,
) -> Result<Vec<u8>, ApiError> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    super::utils::parse_content_type(content_type)?;

    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .to_bytes()
        .to_vec();

    super::utils::validate_body_size(&data, state.config.server.api.max_payload_bytes)?;

    Ok(data)
}
