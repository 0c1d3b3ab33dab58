//! The batch control loop.
//!
//! One spawned task per batch, jobs strictly sequential. Every per-job
//! failure is absorbed into that job's result so one broken conversation
//! never aborts the rest of the batch.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::host::TargetUrl;
use crate::ledger::{BatchRecord, JobRecord};
use crate::protocol::WorkerSignal;

use super::types::{BatchEvent, ExportJob, ExportParams, JobOutcome, JobResult, JobState};
use super::Inner;

pub(super) async fn run_batch(
    inner: Arc<Inner>,
    generation: u64,
    batch_id: String,
    job_ids: Vec<String>,
    params: ExportParams,
    mut signal_rx: mpsc::UnboundedReceiver<WorkerSignal>,
) {
    let started_at = Utc::now();
    let total = job_ids.len();
    let mut completed = 0usize;
    let mut failed = 0usize;
    let mut stopped = false;

    for (seq, job_id) in job_ids.iter().enumerate() {
        // A cleared flag means an operator stop; a newer generation means a
        // successor batch was admitted while this loop drained its job.
        // Either way the remaining queue is abandoned.
        if !inner.running.load(Ordering::SeqCst)
            || inner.generation.load(Ordering::SeqCst) != generation
        {
            stopped = true;
            info!(batch_id, remaining = total - seq, "Batch stopped, skipping remaining jobs");
            break;
        }

        let (outcome, downloads_timed_out) =
            process_job(&inner, generation, &params, job_id, &mut signal_rx).await;

        inner.tracker.clear(job_id);

        match &outcome {
            JobOutcome::Completed => {
                completed += 1;
                inner.metrics.job_completed();
            }
            JobOutcome::Failed { reason } => {
                failed += 1;
                inner.metrics.job_failed();
                warn!(batch_id, job_id, reason, "Export job failed");
            }
        }
        if downloads_timed_out {
            inner.metrics.download_timeout();
        }

        let result = JobResult {
            id: job_id.clone(),
            outcome,
        };
        inner.push_result(generation, result.clone());

        let record = JobRecord {
            job_id: job_id.clone(),
            outcome: result.outcome.clone(),
            downloads_timed_out,
            recorded_at: Utc::now(),
        };
        if let Err(e) = inner.ledger.record_job(&batch_id, seq, &record) {
            error!(batch_id, job_id, error = %e, "Failed to persist job record");
        }

        let _ = inner.event_tx.send(BatchEvent::JobSettled {
            batch_id: batch_id.clone(),
            result,
        });

        if seq + 1 < total {
            tokio::time::sleep(inner.timing.inter_job_delay).await;
        }
    }

    let record = BatchRecord {
        batch_id: batch_id.clone(),
        total_jobs: total,
        completed,
        failed,
        stopped,
        started_at,
        finished_at: Utc::now(),
    };
    if let Err(e) = inner.ledger.record_batch(&record) {
        error!(batch_id, error = %e, "Failed to persist batch record");
    }

    inner.finalize(generation);
    info!(batch_id, completed, failed, stopped, "Batch export finished");
    let _ = inner.event_tx.send(BatchEvent::Finished { batch_id });
}

/// Drive one job through its lifecycle. Returns the terminal outcome plus
/// whether the download-start wait ran out of budget.
async fn process_job(
    inner: &Inner,
    generation: u64,
    params: &ExportParams,
    job_id: &str,
    signal_rx: &mut mpsc::UnboundedReceiver<WorkerSignal>,
) -> (JobOutcome, bool) {
    let mut job = ExportJob::new(job_id);
    job.state = JobState::Spawning;
    inner.set_current(generation, Some(job.clone()));

    let scope = params.scope.as_deref().unwrap_or(&inner.default_scope);
    let target = TargetUrl::build(&inner.base_url, Some(scope), job_id);
    info!(job_id, target = %target, "Spawning export worker");

    let worker = match inner.worker_host.spawn(&target).await {
        Ok(worker) => worker,
        Err(e) => {
            job.state = JobState::Failed;
            job.error = Some(e.to_string());
            inner.set_current(generation, Some(job));
            return (
                JobOutcome::Failed {
                    reason: format!("worker spawn failed: {e}"),
                },
                false,
            );
        }
    };
    inner.set_worker(generation, Some(worker));

    job.state = JobState::Running;
    inner.set_current(generation, Some(job.clone()));

    // Wait for the worker's terminal signal. There is deliberately no
    // timeout here: a worker that never reports stalls the batch, and the
    // stall stays visible through the current-job view until an operator
    // stops the run.
    let signal_outcome = loop {
        match signal_rx.recv().await {
            Some(signal) if signal.job_id() != job_id => {
                inner.metrics.stale_signal();
                warn!(
                    expected = job_id,
                    received = signal.job_id(),
                    "Dropping stale worker signal"
                );
            }
            Some(WorkerSignal::ExportCompleted { .. }) => break Ok(()),
            Some(WorkerSignal::ExportFailed { reason, .. }) => break Err(reason),
            None => break Err("signal channel closed".to_string()),
        }
    };

    let result = match signal_outcome {
        Ok(()) => {
            job.state = JobState::AwaitingDownloads;
            inner.set_current(generation, Some(job.clone()));

            let started = inner
                .tracker
                .await_start(job_id, inner.timing.download_wait_budget)
                .await;
            if !started {
                warn!(job_id, "Downloads still pending when the wait budget ran out");
            }
            // Settle regardless of the wait's verdict; downloads registered
            // just after the completion signal need the grace period most.
            tokio::time::sleep(inner.timing.settle_delay).await;

            job.state = JobState::Completed;
            inner.set_current(generation, Some(job));
            (JobOutcome::Completed, !started)
        }
        Err(reason) => {
            job.state = JobState::Failed;
            job.error = Some(reason.clone());
            inner.set_current(generation, Some(job));
            (JobOutcome::Failed { reason }, false)
        }
    };

    release_worker(inner, generation).await;
    result
}

/// Drop the single-flight worker reference. The context itself is only torn
/// down when the run is configured for it; the default leaves the page open
/// so transfers it initiated can finish on their own.
async fn release_worker(inner: &Inner, generation: u64) {
    if let Some(worker) = inner.take_worker(generation) {
        if inner.close_worker_after_job {
            if let Err(e) = inner.worker_host.close(&worker).await {
                warn!(target_id = worker.target_id, error = %e, "Failed to close worker context");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::host::mock::{MockDownloadHost, MockWorkerHost};
    use crate::host::DownloadHost;
    use crate::ledger::ExportLedger;
    use crate::observability::Metrics;
    use crate::orchestrator::{Orchestrator, OrchestratorError, Timing};
    use crate::protocol::{ConflictPolicy, WorkerSignal};
    use crate::tracker::DownloadTracker;

    use super::super::types::{ExportParams, JobOutcome};

    struct Fixture {
        orchestrator: Orchestrator,
        worker_host: Arc<MockWorkerHost>,
        download_host: Arc<MockDownloadHost>,
        tracker: Arc<DownloadTracker>,
        metrics: Arc<Metrics>,
        _ledger_dir: TempDir,
    }

    fn fixture(timing: Timing) -> Fixture {
        let worker_host = Arc::new(MockWorkerHost::new());
        let download_host = Arc::new(MockDownloadHost::new());
        let tracker = Arc::new(DownloadTracker::new(
            download_host.clone(),
            Duration::from_millis(200),
        ));
        let ledger_dir = TempDir::new().unwrap();
        let ledger = Arc::new(ExportLedger::open(ledger_dir.path()).unwrap());
        let metrics = Arc::new(Metrics::new());
        let orchestrator = Orchestrator::new(
            worker_host.clone(),
            tracker.clone(),
            ledger,
            metrics.clone(),
            timing,
            "https://chat.example.com".to_string(),
            "u/0".to_string(),
            false,
        );
        Fixture {
            orchestrator,
            worker_host,
            download_host,
            tracker,
            metrics,
            _ledger_dir: ledger_dir,
        }
    }

    fn fast_timing() -> Timing {
        Timing {
            download_wait_budget: Duration::from_millis(500),
            settle_delay: Duration::from_millis(50),
            inter_job_delay: Duration::from_millis(50),
        }
    }

    fn completed(job_id: &str) -> WorkerSignal {
        WorkerSignal::ExportCompleted {
            job_id: job_id.to_string(),
        }
    }

    async fn wait_done(orchestrator: &Orchestrator) {
        while orchestrator.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_settle_in_submission_order() {
        let f = fixture(fast_timing());

        f.orchestrator
            .start(vec!["a".to_string(), "b".to_string()], ExportParams::default())
            .unwrap();
        f.orchestrator.signal(completed("a"));
        f.orchestrator.signal(completed("b"));
        wait_done(&f.orchestrator).await;

        let results = f.orchestrator.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "b");
        assert!(results.iter().all(|r| r.outcome == JobOutcome::Completed));

        let targets = f.worker_host.spawned_targets();
        assert_eq!(
            targets,
            vec![
                "https://chat.example.com/u/0/a?autoRun=true".to_string(),
                "https://chat.example.com/u/0/b?autoRun=true".to_string(),
            ]
        );
        // Default configuration leaves worker contexts open.
        assert!(f.worker_host.closed_targets().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_rejected_without_mutation() {
        let f = fixture(fast_timing());

        let batch_id = f
            .orchestrator
            .start(vec!["a".to_string()], ExportParams::default())
            .unwrap();

        let err = f
            .orchestrator
            .start(vec!["x".to_string()], ExportParams::default())
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyRunning));
        assert_eq!(f.orchestrator.current_batch(), Some(batch_id));
        assert!(f.orchestrator.results().is_empty());

        f.orchestrator.signal(completed("a"));
        wait_done(&f.orchestrator).await;
        // The rejected call never enqueued anything.
        assert_eq!(f.worker_host.spawned_targets().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_signal_does_not_abort_batch() {
        let f = fixture(fast_timing());

        f.orchestrator
            .start(vec!["a".to_string(), "b".to_string()], ExportParams::default())
            .unwrap();
        f.orchestrator.signal(WorkerSignal::ExportFailed {
            job_id: "a".to_string(),
            reason: "extraction crashed".to_string(),
        });
        f.orchestrator.signal(completed("b"));
        wait_done(&f.orchestrator).await;

        let results = f.orchestrator.results();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].outcome,
            JobOutcome::Failed {
                reason: "extraction crashed".to_string()
            }
        );
        assert_eq!(results[1].outcome, JobOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_failure_is_absorbed() {
        let f = fixture(fast_timing());
        f.worker_host.reject_targets_containing("broken");

        f.orchestrator
            .start(
                vec!["broken-conv".to_string(), "ok".to_string()],
                ExportParams::default(),
            )
            .unwrap();
        f.orchestrator.signal(completed("ok"));
        wait_done(&f.orchestrator).await;

        let results = f.orchestrator.results();
        assert_eq!(results.len(), 2);
        assert!(matches!(
            &results[0].outcome,
            JobOutcome::Failed { reason } if reason.contains("spawn failed")
        ));
        assert_eq!(results[1].outcome, JobOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_timeout_leaves_job_completed() {
        let f = fixture(fast_timing());

        f.orchestrator
            .start(vec!["a".to_string()], ExportParams::default())
            .unwrap();
        tokio::task::yield_now().await;

        // A registered download that never leaves its initial state.
        let download_id = f
            .download_host
            .initiate("https://cdn.example.com/a.png", "exports/a.png", ConflictPolicy::Uniquify)
            .await
            .unwrap();
        f.tracker.register("a", &download_id);

        f.orchestrator.signal(completed("a"));
        wait_done(&f.orchestrator).await;

        let results = f.orchestrator.results();
        assert_eq!(results[0].outcome, JobOutcome::Completed);
        assert_eq!(f.metrics.snapshot().download_timeouts, 1);
        // The wait phase concluded, so the registration is gone.
        assert_eq!(f.tracker.registered("a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_signal_is_dropped() {
        let f = fixture(fast_timing());

        f.orchestrator
            .start(vec!["a".to_string()], ExportParams::default())
            .unwrap();
        f.orchestrator.signal(completed("somebody-else"));
        f.orchestrator.signal(completed("a"));
        wait_done(&f.orchestrator).await;

        assert_eq!(f.orchestrator.results()[0].outcome, JobOutcome::Completed);
        assert_eq!(f.metrics.snapshot().stale_signals, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_skips_remaining_jobs() {
        let f = fixture(fast_timing());

        f.orchestrator
            .start(vec!["a".to_string(), "b".to_string()], ExportParams::default())
            .unwrap();
        // Let job "a" reach its signal wait before stopping.
        tokio::task::yield_now().await;
        f.orchestrator.stop();
        f.orchestrator.signal(completed("a"));
        // The running flag is already cleared, so wait on the result itself.
        while f.orchestrator.results().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let results = f.orchestrator.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
        assert_eq!(f.worker_host.spawned_targets().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_stop_does_not_resurrect_old_batch() {
        let f = fixture(fast_timing());

        f.orchestrator
            .start(vec!["a".to_string(), "b".to_string()], ExportParams::default())
            .unwrap();
        // Let job "a" reach its signal wait, then stop and admit a new batch
        // while the old loop is still draining.
        tokio::task::yield_now().await;
        f.orchestrator.stop();
        let second = f
            .orchestrator
            .start(vec!["x".to_string()], ExportParams::default())
            .unwrap();

        f.orchestrator.signal(completed("x"));
        wait_done(&f.orchestrator).await;

        // The new batch owns the run state: its job succeeded and the old
        // loop's drained job did not leak into its results.
        assert_eq!(f.orchestrator.current_batch(), Some(second));
        let results = f.orchestrator.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "x");
        assert_eq!(results[0].outcome, JobOutcome::Completed);

        // The stopped batch never spawned its remaining job.
        let targets = f.worker_host.spawned_targets();
        assert!(targets.iter().any(|t| t.contains("/x?")));
        assert!(!targets.iter().any(|t| t.contains("/b?")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scope_parameter_shapes_target() {
        let f = fixture(fast_timing());

        f.orchestrator
            .start(
                vec!["conv".to_string()],
                ExportParams {
                    scope: Some("u/3".to_string()),
                },
            )
            .unwrap();
        f.orchestrator.signal(completed("conv"));
        wait_done(&f.orchestrator).await;

        assert_eq!(
            f.worker_host.spawned_targets(),
            vec!["https://chat.example.com/u/3/conv?autoRun=true".to_string()]
        );
    }

    #[tokio::test]
    async fn test_signal_without_batch_reports_undelivered() {
        let f = fixture(fast_timing());
        assert!(!f.orchestrator.signal(completed("a")));
    }
}
