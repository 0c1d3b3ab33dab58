//! Download start tracking.
//!
//! The download subsystem only pushes events for state *changes*; whether a
//! transfer has left its initial state is a point-in-time query. The tracker
//! therefore polls `DownloadHost::query` at a fixed interval, with push
//! events marking handles resolved between polls so a fast transfer shortens
//! the wait.

pub mod reclaim;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::host::DownloadHost;
use crate::protocol::DownloadEvent;

#[derive(Default)]
struct JobDownloads {
    /// Registration order is preserved for logging; membership is what
    /// matters to the wait loop.
    handles: Vec<String>,
    resolved: HashSet<String>,
}

/// Per-job registry of outstanding download handles and the bounded wait for
/// all of them to start.
pub struct DownloadTracker {
    host: Arc<dyn DownloadHost>,
    poll_interval: Duration,
    sets: Mutex<HashMap<String, JobDownloads>>,
    /// download id -> job id, for attributing push events.
    index: Mutex<HashMap<String, String>>,
}

impl DownloadTracker {
    pub fn new(host: Arc<dyn DownloadHost>, poll_interval: Duration) -> Self {
        Self {
            host,
            poll_interval,
            sets: Mutex::new(HashMap::new()),
            index: Mutex::new(HashMap::new()),
        }
    }

    /// Register a download handle under a job. Inserting the same handle
    /// twice is a no-op.
    pub fn register(&self, job_id: &str, download_id: &str) {
        let mut sets = self.sets.lock().unwrap();
        let entry = sets.entry(job_id.to_string()).or_default();
        if !entry.handles.iter().any(|h| h == download_id) {
            entry.handles.push(download_id.to_string());
        }
        drop(sets);

        self.index
            .lock()
            .unwrap()
            .insert(download_id.to_string(), job_id.to_string());
        debug!(job_id, download_id, "Download registered");
    }

    /// Feed a push event into the tracker; any state past `Initiated`
    /// resolves the handle for the wait loop.
    pub fn note_event(&self, event: &DownloadEvent) {
        if !event.state.has_started() {
            return;
        }
        let job_id = match self.index.lock().unwrap().get(&event.download_id) {
            Some(job_id) => job_id.clone(),
            None => return, // not one of ours (or already cleared)
        };
        if let Some(entry) = self.sets.lock().unwrap().get_mut(&job_id) {
            entry.resolved.insert(event.download_id.clone());
        }
    }

    /// Drop a job's download set once its wait phase has concluded, keeping
    /// the registry bounded across a long batch.
    pub fn clear(&self, job_id: &str) {
        let removed = self.sets.lock().unwrap().remove(job_id);
        if let Some(entry) = removed {
            let mut index = self.index.lock().unwrap();
            for handle in &entry.handles {
                index.remove(handle);
            }
        }
    }

    /// Number of handles currently registered for a job.
    pub fn registered(&self, job_id: &str) -> usize {
        self.sets
            .lock()
            .unwrap()
            .get(job_id)
            .map(|e| e.handles.len())
            .unwrap_or(0)
    }

    /// Wait until every download registered for `job_id` has observably
    /// started, or `budget` elapses.
    ///
    /// Returns `true` when all handles left `Initiated` in time, including
    /// the trivial case of a job with no downloads, which returns without a
    /// single poll. `false` means the budget ran out; callers treat that as
    /// a non-fatal signal, not an error. A handle whose status query fails
    /// counts as resolved so one bad handle cannot block the rest.
    pub async fn await_start(&self, job_id: &str, budget: Duration) -> bool {
        let handles: Vec<String> = match self.sets.lock().unwrap().get(job_id) {
            Some(entry) => entry.handles.clone(),
            None => return true,
        };
        if handles.is_empty() {
            return true;
        }

        let deadline = Instant::now() + budget;

        loop {
            let unresolved = self.unresolved(job_id, &handles);
            if unresolved.is_empty() {
                return true;
            }

            for download_id in &unresolved {
                match self.host.query(download_id).await {
                    Ok(state) if state.has_started() => {
                        self.mark_resolved(job_id, download_id);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // Resolve it rather than letting one failing query
                        // hold up the whole job.
                        warn!(job_id, download_id, error = %e, "Status query failed");
                        self.mark_resolved(job_id, download_id);
                    }
                }
            }

            if self.unresolved(job_id, &handles).is_empty() {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(job_id, "Download start wait exhausted its budget");
                return false;
            }
            let remaining = deadline - now;
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }

    fn unresolved(&self, job_id: &str, handles: &[String]) -> Vec<String> {
        let sets = self.sets.lock().unwrap();
        let resolved = sets.get(job_id).map(|e| &e.resolved);
        handles
            .iter()
            .filter(|h| resolved.is_none_or(|r| !r.contains(*h)))
            .cloned()
            .collect()
    }

    fn mark_resolved(&self, job_id: &str, download_id: &str) {
        if let Some(entry) = self.sets.lock().unwrap().get_mut(job_id) {
            entry.resolved.insert(download_id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockDownloadHost;
    use crate::protocol::{ConflictPolicy, DownloadState};

    async fn initiate(host: &MockDownloadHost, url: &str) -> String {
        host.initiate(url, "exports/x", ConflictPolicy::Uniquify)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_set_returns_true_without_polling() {
        let host = Arc::new(MockDownloadHost::new());
        let tracker = DownloadTracker::new(host, Duration::from_millis(200));
        assert!(tracker.await_start("no-downloads", Duration::from_secs(15)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_started_within_budget() {
        let host = Arc::new(MockDownloadHost::new());
        let tracker = DownloadTracker::new(host.clone(), Duration::from_millis(200));

        let a = initiate(&host, "https://cdn.example.com/a").await;
        let b = initiate(&host, "https://cdn.example.com/b").await;
        tracker.register("conv-1", &a);
        tracker.register("conv-1", &b);

        host.set_state(&a, DownloadState::InProgress);
        host.set_state(&b, DownloadState::Complete);

        assert!(tracker.await_start("conv-1", Duration::from_secs(15)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_stuck_in_initiated() {
        let host = Arc::new(MockDownloadHost::new());
        let tracker = DownloadTracker::new(host.clone(), Duration::from_millis(200));

        let a = initiate(&host, "https://cdn.example.com/a").await;
        tracker.register("conv-y", &a);

        assert!(!tracker.await_start("conv-y", Duration::from_secs(2)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_failure_resolves_handle() {
        let host = Arc::new(MockDownloadHost::new());
        let tracker = DownloadTracker::new(host.clone(), Duration::from_millis(200));

        let a = initiate(&host, "https://cdn.example.com/a").await;
        let b = initiate(&host, "https://cdn.example.com/b").await;
        tracker.register("conv-1", &a);
        tracker.register("conv-1", &b);

        host.fail_queries_for(&a);
        host.set_state(&b, DownloadState::InProgress);

        assert!(tracker.await_start("conv-1", Duration::from_secs(15)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_event_resolves_between_polls() {
        let host = Arc::new(MockDownloadHost::new());
        let tracker = Arc::new(DownloadTracker::new(host.clone(), Duration::from_millis(200)));

        let a = initiate(&host, "https://cdn.example.com/a").await;
        tracker.register("conv-1", &a);

        // Event arrives without the queryable state changing first.
        tracker.note_event(&crate::protocol::DownloadEvent {
            download_id: a.clone(),
            state: DownloadState::InProgress,
        });

        assert!(tracker.await_start("conv-1", Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_clear_drops_registration() {
        let host = Arc::new(MockDownloadHost::new());
        let tracker = DownloadTracker::new(host.clone(), Duration::from_millis(200));

        let a = initiate(&host, "https://cdn.example.com/a").await;
        tracker.register("conv-1", &a);
        assert_eq!(tracker.registered("conv-1"), 1);

        tracker.clear("conv-1");
        assert_eq!(tracker.registered("conv-1"), 0);
        assert!(tracker.await_start("conv-1", Duration::from_secs(1)).await);
    }
}
