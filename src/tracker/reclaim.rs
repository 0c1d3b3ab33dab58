//! Exactly-once release of transient artifacts.
//!
//! An artifact backing a transfer must stay alive until the download
//! subsystem has finished reading it, and must not leak if the transfer is
//! never cleanly completed. The reclaim map pairs each download with its
//! artifact; the first terminal status event releases the artifact and
//! removes the pair, so a duplicated terminal event finds no entry and does
//! nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::artifacts::ArtifactSink;
use crate::protocol::DownloadState;

pub struct Reclaimer {
    pending: Mutex<HashMap<String, String>>,
    sink: Arc<dyn ArtifactSink>,
}

impl Reclaimer {
    pub fn new(sink: Arc<dyn ArtifactSink>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            sink,
        }
    }

    /// Record that `download_id` is consuming `artifact_id`.
    pub fn register(&self, download_id: &str, artifact_id: &str) {
        self.pending
            .lock()
            .unwrap()
            .insert(download_id.to_string(), artifact_id.to_string());
        debug!(download_id, artifact_id, "Pending artifact release recorded");
    }

    /// Handle a status-changed push event. Non-terminal states are ignored;
    /// the first terminal state releases the artifact, later ones no-op.
    /// Returns whether an artifact was released.
    pub async fn on_status_changed(&self, download_id: &str, state: DownloadState) -> bool {
        if !state.is_terminal() {
            return false;
        }

        // Removal under the lock is what makes the release exactly-once;
        // the await happens after the entry is already claimed.
        let artifact_id = self.pending.lock().unwrap().remove(download_id);

        match artifact_id {
            Some(artifact_id) => {
                debug!(download_id, artifact_id, ?state, "Releasing artifact");
                self.sink.release(&artifact_id).await;
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
