//! Host capability seams: worker-context creation and the download
//! subsystem.
//!
//! The orchestrator never talks to a browser or a download backend directly;
//! it goes through these traits. `devtools` is the production worker host,
//! `local` is the filesystem-backed download backend, and `mock` provides
//! scriptable in-process implementations for tests.

pub mod devtools;
pub mod local;
pub mod mock;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::protocol::{ConflictPolicy, DownloadEvent, DownloadState};

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("context creation rejected: {0}")]
    Rejected(String),

    #[error("worker host unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Error)]
pub enum DownloadHostError {
    #[error("download initiation failed: {0}")]
    InitiateFailed(String),

    #[error("unknown download: {0}")]
    UnknownDownload(String),

    #[error("status query failed: {0}")]
    QueryFailed(String),
}

/// Opaque reference to a live worker execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pub target_id: String,
}

/// Target address for a worker context: `{base}/{scope}/{job_id}?autoRun=true`.
///
/// The auto-run marker tells the page-side exporter to start extraction as
/// soon as the conversation loads. `scope` is an account selector and
/// defaults to a neutral value when the caller supplies none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl(String);

pub const DEFAULT_SCOPE: &str = "u/0";

impl TargetUrl {
    pub fn build(base: &str, scope: Option<&str>, job_id: &str) -> Self {
        let base = base.trim_end_matches('/');
        let scope = scope.unwrap_or(DEFAULT_SCOPE);
        TargetUrl(format!("{base}/{scope}/{job_id}?autoRun=true"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Creates and tears down isolated worker execution contexts.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Request a new execution context at the given address. Failure is
    /// reported synchronously; the returned handle is opaque to callers.
    async fn spawn(&self, target: &TargetUrl) -> Result<WorkerHandle, SpawnError>;

    /// Tear down a worker context. Only called when the run is configured to
    /// close workers after settling; the default leaves them open so
    /// in-flight downloads the page initiated can finish.
    async fn close(&self, handle: &WorkerHandle) -> Result<(), SpawnError>;
}

/// The external file-transfer capability.
///
/// Start detection is a point-in-time query (`query`), while terminal
/// completion is push-driven (`events`). The two shapes are kept distinct on
/// purpose; see the tracker and reclaimer for the consumers of each.
#[async_trait]
pub trait DownloadHost: Send + Sync {
    /// Initiate a transfer of `url` to `destination` (a relative path below
    /// the host's download root). Returns an opaque download id.
    async fn initiate(
        &self,
        url: &str,
        destination: &str,
        conflict: ConflictPolicy,
    ) -> Result<String, DownloadHostError>;

    /// Point-in-time status of one transfer.
    async fn query(&self, download_id: &str) -> Result<DownloadState, DownloadHostError>;

    /// Subscribe to the status-changed push stream.
    fn events(&self) -> broadcast::Receiver<DownloadEvent>;
}
