//! Scriptable in-process hosts for development and tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{
    DownloadHost, DownloadHostError, SpawnError, TargetUrl, WorkerHandle, WorkerHost,
};
use crate::protocol::{ConflictPolicy, DownloadEvent, DownloadState};

/// Worker host that records spawn requests and can be scripted to reject
/// targets whose address contains a given marker.
#[derive(Default)]
pub struct MockWorkerHost {
    counter: AtomicUsize,
    reject_marker: Mutex<Option<String>>,
    spawned: Mutex<Vec<String>>,
    closed: Mutex<Vec<String>>,
}

impl MockWorkerHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any spawn whose target address contains `marker`.
    pub fn reject_targets_containing(&self, marker: &str) {
        *self.reject_marker.lock().unwrap() = Some(marker.to_string());
    }

    pub fn spawned_targets(&self) -> Vec<String> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn closed_targets(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerHost for MockWorkerHost {
    async fn spawn(&self, target: &TargetUrl) -> Result<WorkerHandle, SpawnError> {
        if let Some(marker) = self.reject_marker.lock().unwrap().as_deref() {
            if target.as_str().contains(marker) {
                return Err(SpawnError::Rejected(format!("scripted rejection: {marker}")));
            }
        }

        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let target_id = format!("mock-target-{n}");
        self.spawned.lock().unwrap().push(target.as_str().to_string());
        Ok(WorkerHandle { target_id })
    }

    async fn close(&self, handle: &WorkerHandle) -> Result<(), SpawnError> {
        self.closed.lock().unwrap().push(handle.target_id.clone());
        Ok(())
    }
}

/// Download host holding transfer states in memory.
///
/// Tests drive transitions with `set_state`, which also feeds the push
/// stream. `fail_queries_for` scripts a query error for one download id.
pub struct MockDownloadHost {
    counter: AtomicUsize,
    states: Mutex<HashMap<String, DownloadState>>,
    failing_queries: Mutex<Vec<String>>,
    initiated: Mutex<Vec<(String, String)>>,
    event_tx: broadcast::Sender<DownloadEvent>,
}

impl Default for MockDownloadHost {
    fn default() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            counter: AtomicUsize::new(0),
            states: Mutex::new(HashMap::new()),
            failing_queries: Mutex::new(Vec::new()),
            initiated: Mutex::new(Vec::new()),
            event_tx,
        }
    }
}

impl MockDownloadHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition a download and emit a status-changed event.
    pub fn set_state(&self, download_id: &str, state: DownloadState) {
        self.states
            .lock()
            .unwrap()
            .insert(download_id.to_string(), state);
        // No receivers is fine; the event stream is best-effort.
        let _ = self.event_tx.send(DownloadEvent {
            download_id: download_id.to_string(),
            state,
        });
    }

    pub fn fail_queries_for(&self, download_id: &str) {
        self.failing_queries
            .lock()
            .unwrap()
            .push(download_id.to_string());
    }

    /// `(url, destination)` pairs in initiation order.
    pub fn initiated_downloads(&self) -> Vec<(String, String)> {
        self.initiated.lock().unwrap().clone()
    }

    /// Id of the most recently initiated download, if any.
    pub fn last_download_id(&self) -> Option<String> {
        let n = self.counter.load(Ordering::Relaxed);
        n.checked_sub(1).map(|i| format!("dl-{i}"))
    }
}

#[async_trait]
impl DownloadHost for MockDownloadHost {
    async fn initiate(
        &self,
        url: &str,
        destination: &str,
        _conflict: ConflictPolicy,
    ) -> Result<String, DownloadHostError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let download_id = format!("dl-{n}");
        self.states
            .lock()
            .unwrap()
            .insert(download_id.clone(), DownloadState::Initiated);
        self.initiated
            .lock()
            .unwrap()
            .push((url.to_string(), destination.to_string()));
        Ok(download_id)
    }

    async fn query(&self, download_id: &str) -> Result<DownloadState, DownloadHostError> {
        if self
            .failing_queries
            .lock()
            .unwrap()
            .iter()
            .any(|id| id == download_id)
        {
            return Err(DownloadHostError::QueryFailed(format!(
                "scripted query failure: {download_id}"
            )));
        }

        self.states
            .lock()
            .unwrap()
            .get(download_id)
            .copied()
            .ok_or_else(|| DownloadHostError::UnknownDownload(download_id.to_string()))
    }

    fn events(&self) -> broadcast::Receiver<DownloadEvent> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_download_lifecycle() {
        let host = MockDownloadHost::new();
        let id = host
            .initiate("https://example.com/a.png", "exports/a.png", ConflictPolicy::Uniquify)
            .await
            .unwrap();

        assert_eq!(host.query(&id).await.unwrap(), DownloadState::Initiated);

        let mut events = host.events();
        host.set_state(&id, DownloadState::InProgress);
        assert_eq!(host.query(&id).await.unwrap(), DownloadState::InProgress);

        let event = events.recv().await.unwrap();
        assert_eq!(event.download_id, id);
        assert_eq!(event.state, DownloadState::InProgress);
    }

    #[tokio::test]
    async fn test_mock_spawn_rejection() {
        let host = MockWorkerHost::new();
        host.reject_targets_containing("bad-conv");

        let ok = TargetUrl::build("https://chat.example.com", None, "good-conv");
        let bad = TargetUrl::build("https://chat.example.com", None, "bad-conv");

        assert!(host.spawn(&ok).await.is_ok());
        assert!(matches!(
            host.spawn(&bad).await,
            Err(SpawnError::Rejected(_))
        ));
        assert_eq!(host.spawned_targets().len(), 1);
    }
}
