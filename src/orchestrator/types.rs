//! Batch run state types.

use serde::{Deserialize, Serialize};

/// Per-batch parameters supplied by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportParams {
    /// Session-scoping account selector (e.g. `u/1`); a neutral default is
    /// used when absent.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Lifecycle of one export job. Mutated only by the orchestrator's control
/// loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Spawning,
    Running,
    AwaitingDownloads,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExportJob {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: JobState::Pending,
            error: None,
        }
    }
}

/// Terminal outcome of one job.
///
/// A download-start timeout does not demote a job to `Failed`: the
/// transcript itself was produced, so the job counts as completed and the
/// timeout is surfaced separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome")]
pub enum JobOutcome {
    Completed,
    Failed { reason: String },
}

/// One entry of the append-only results ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub id: String,
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

/// Notifications emitted over the orchestrator's broadcast stream.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started { batch_id: String, total_jobs: usize },
    JobSettled { batch_id: String, result: JobResult },
    Finished { batch_id: String },
}
