//! Message contracts between workers, the orchestrator, and the download
//! subsystem.
//!
//! Three message families cross process boundaries here:
//! - `WorkerSignal`: worker page to orchestrator, one per job
//!   (`EXPORT_COMPLETED` / `EXPORT_FAILED`)
//! - `DownloadRequest`: worker page to download coordinator, one per file
//! - `DownloadState` / `DownloadEvent`: download subsystem to tracker and
//!   reclaimer
//!
//! All of them travel as JSON; the serde representations below are the wire
//! format.

use serde::{Deserialize, Serialize};

/// Completion / failure signal emitted by a worker page when its extraction
/// run finishes. Exactly one signal is expected per job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerSignal {
    #[serde(rename = "EXPORT_COMPLETED")]
    ExportCompleted { job_id: String },

    #[serde(rename = "EXPORT_FAILED")]
    ExportFailed { job_id: String, reason: String },
}

impl WorkerSignal {
    pub fn job_id(&self) -> &str {
        match self {
            WorkerSignal::ExportCompleted { job_id } => job_id,
            WorkerSignal::ExportFailed { job_id, .. } => job_id,
        }
    }
}

/// Externally observed state of one file transfer.
///
/// `Initiated` is the pre-registration state: the transfer has been accepted
/// by the download subsystem but has not visibly started. Everything else
/// counts as "started" for the tracker; `Complete` and `Interrupted` are
/// terminal and trigger artifact reclamation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Initiated,
    InProgress,
    Complete,
    Interrupted,
}

impl DownloadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadState::Complete | DownloadState::Interrupted)
    }

    pub fn has_started(self) -> bool {
        self != DownloadState::Initiated
    }
}

/// Push notification from the download subsystem's status-changed stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadEvent {
    pub download_id: String,
    pub state: DownloadState,
}

/// Media kind of a requested download; selects the destination subfolder and
/// the fallback file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Document,
    Image,
    Video,
}

/// One file-transfer request attributed to a job.
///
/// Either `url` points at an externally hosted file, or `document` carries an
/// inline transcript body that the service materializes as a transient
/// artifact before initiating the transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub job_id: String,
    pub kind: MediaKind,
    #[serde(default)]
    pub url: Option<String>,
    /// Inline document body (e.g. the structured transcript JSON).
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub message_index: usize,
    #[serde(default)]
    pub file_index: usize,
}

/// How the download subsystem should resolve destination-name collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    Uniquify,
    Overwrite,
}
