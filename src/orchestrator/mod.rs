//! Batch export orchestration.
//!
//! The orchestrator owns a single-flight control loop: one batch at a time,
//! one job at a time within the batch. `start` rejects a second batch while
//! one is active and otherwise returns immediately; progress is observable
//! through the results ledger, the broadcast event stream, and the durable
//! export ledger.

mod run;
pub mod types;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::host::{WorkerHandle, WorkerHost};
use crate::ledger::ExportLedger;
use crate::observability::Metrics;
use crate::protocol::WorkerSignal;
use crate::tracker::DownloadTracker;

pub use types::{BatchEvent, ExportJob, ExportParams, JobOutcome, JobResult, JobState};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("AlreadyRunning")]
    AlreadyRunning,
}

/// Timing knobs for the per-job state machine.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Bounded wait for every download of a job to start.
    pub download_wait_budget: Duration,
    /// Unconditional delay after the downloads wait, absorbing downloads
    /// registered slightly after the worker signals completion.
    pub settle_delay: Duration,
    /// Delay between jobs so the host's download-confirmation UI is never
    /// hammered.
    pub inter_job_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            download_wait_budget: Duration::from_secs(15),
            settle_delay: Duration::from_secs(3),
            inter_job_delay: Duration::from_secs(2),
        }
    }
}

/// Mutable run state. Written exclusively by the control loop; readers get
/// snapshots.
#[derive(Default)]
struct RunState {
    batch_id: Option<String>,
    current: Option<ExportJob>,
    results: Vec<JobResult>,
    /// At most one live worker context reference at any time.
    worker: Option<WorkerHandle>,
    signal_tx: Option<mpsc::UnboundedSender<WorkerSignal>>,
}

pub(crate) struct Inner {
    pub(crate) worker_host: Arc<dyn WorkerHost>,
    pub(crate) tracker: Arc<DownloadTracker>,
    pub(crate) ledger: Arc<ExportLedger>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) timing: Timing,
    pub(crate) base_url: String,
    pub(crate) default_scope: String,
    pub(crate) close_worker_after_job: bool,
    pub(crate) running: AtomicBool,
    /// Monotonic run counter. Each `start` bumps it; a control loop whose
    /// generation is no longer current has been superseded and must not
    /// touch the run state anymore.
    pub(crate) generation: AtomicU64,
    state: Mutex<RunState>,
    pub(crate) event_tx: broadcast::Sender<BatchEvent>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        worker_host: Arc<dyn WorkerHost>,
        tracker: Arc<DownloadTracker>,
        ledger: Arc<ExportLedger>,
        metrics: Arc<Metrics>,
        timing: Timing,
        base_url: String,
        default_scope: String,
        close_worker_after_job: bool,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                worker_host,
                tracker,
                ledger,
                metrics,
                timing,
                base_url,
                default_scope,
                close_worker_after_job,
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                state: Mutex::new(RunState::default()),
                event_tx,
            }),
        }
    }

    /// Begin a batch export. Jobs are processed strictly in the supplied
    /// order. Returns the batch id immediately; the run proceeds on a
    /// spawned task.
    ///
    /// Fails with `AlreadyRunning`, without mutating any run state, if a
    /// batch is active.
    pub fn start(
        &self,
        job_ids: Vec<String>,
        params: ExportParams,
    ) -> Result<String, OrchestratorError> {
        // Admission, the generation bump, and the state reset all happen
        // under the state lock: a predecessor loop that is still draining
        // cannot slip a write in between them. Replacing the sender also
        // drops the predecessor's channel, so its blocked signal wait ends.
        let (batch_id, generation, signal_rx) = {
            let mut state = self.inner.state.lock().unwrap();
            if self.inner.running.load(Ordering::SeqCst) {
                return Err(OrchestratorError::AlreadyRunning);
            }
            self.inner.running.store(true, Ordering::SeqCst);
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

            let batch_id = Uuid::now_v7().to_string();
            let (signal_tx, signal_rx) = mpsc::unbounded_channel();
            state.batch_id = Some(batch_id.clone());
            state.current = None;
            state.results.clear();
            state.worker = None;
            state.signal_tx = Some(signal_tx);
            (batch_id, generation, signal_rx)
        };

        info!(batch_id, jobs = job_ids.len(), "Batch export started");
        self.inner.metrics.batch_started();
        let _ = self.inner.event_tx.send(BatchEvent::Started {
            batch_id: batch_id.clone(),
            total_jobs: job_ids.len(),
        });

        tokio::spawn(run::run_batch(
            Arc::clone(&self.inner),
            generation,
            batch_id.clone(),
            job_ids,
            params,
            signal_rx,
        ));

        Ok(batch_id)
    }

    /// Request a cooperative stop. The loop observes the cleared flag at the
    /// top of its next iteration; a job already past spawning runs to its
    /// terminal outcome.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            info!("Batch stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Deliver a worker signal to the active batch. Returns `false` when no
    /// batch is waiting for signals.
    pub fn signal(&self, signal: WorkerSignal) -> bool {
        let state = self.inner.state.lock().unwrap();
        match state.signal_tx.as_ref() {
            Some(tx) => tx.send(signal).is_ok(),
            None => {
                warn!(job_id = signal.job_id(), "Worker signal with no active batch");
                false
            }
        }
    }

    /// Snapshot of the results ledger (partial while a batch runs, complete
    /// after it finalizes, reset by the next `start`).
    pub fn results(&self) -> Vec<JobResult> {
        self.inner.state.lock().unwrap().results.clone()
    }

    pub fn current_batch(&self) -> Option<String> {
        self.inner.state.lock().unwrap().batch_id.clone()
    }

    pub fn current_job(&self) -> Option<ExportJob> {
        self.inner.state.lock().unwrap().current.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.inner.event_tx.subscribe()
    }
}

impl Inner {
    /// Whether the given run generation still owns the state. Callers must
    /// already hold the state lock, which `start` holds while bumping.
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub(crate) fn set_current(&self, generation: u64, job: Option<ExportJob>) {
        let mut state = self.state.lock().unwrap();
        if self.is_current(generation) {
            state.current = job;
        }
    }

    pub(crate) fn set_worker(&self, generation: u64, worker: Option<WorkerHandle>) {
        let mut state = self.state.lock().unwrap();
        if self.is_current(generation) {
            state.worker = worker;
        }
    }

    pub(crate) fn take_worker(&self, generation: u64) -> Option<WorkerHandle> {
        let mut state = self.state.lock().unwrap();
        if self.is_current(generation) {
            state.worker.take()
        } else {
            None
        }
    }

    pub(crate) fn push_result(&self, generation: u64, result: JobResult) {
        let mut state = self.state.lock().unwrap();
        if self.is_current(generation) {
            state.results.push(result);
        }
    }

    pub(crate) fn finalize(&self, generation: u64) {
        let mut state = self.state.lock().unwrap();
        if !self.is_current(generation) {
            // A successor batch owns the flag and the channel now.
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        state.current = None;
        state.worker = None;
        state.signal_tx = None;
        // results and batch_id stay available for inspection until the next
        // start call.
    }
}
