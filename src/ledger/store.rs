use std::path::Path;

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::orchestrator::JobOutcome;

use super::error::Result;
use super::partitions::{encode_batch_key, encode_job_key, encode_job_prefix};
use super::pruning::{prune_expired, PruneStats};

/// Durable record of one settled job, written as each job reaches a terminal
/// outcome so a crash mid-batch loses at most the in-flight job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    #[serde(flatten)]
    pub outcome: JobOutcome,
    /// The transcript was exported but its downloads were not all observed
    /// starting within the wait budget.
    #[serde(default)]
    pub downloads_timed_out: bool,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub recorded_at: DateTime<Utc>,
}

/// Durable summary of one finished (or stopped) batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: String,
    pub total_jobs: usize,
    pub completed: usize,
    pub failed: usize,
    pub stopped: bool,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub finished_at: DateTime<Utc>,
}

/// Fjall-backed persistent storage for batch and job records
#[derive(Clone)]
pub struct ExportLedger {
    keyspace: Keyspace,
    batches: PartitionHandle,
    jobs: PartitionHandle,
    metadata: PartitionHandle,
}

impl ExportLedger {
    /// Open or create a ledger at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening export ledger at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let batches = keyspace.open_partition("batches", PartitionCreateOptions::default())?;
        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        info!("Export ledger opened successfully");
        Ok(Self {
            keyspace,
            batches,
            jobs,
            metadata,
        })
    }

    /// Record one settled job under its batch and sequence position
    pub fn record_job(&self, batch_id: &str, seq: usize, record: &JobRecord) -> Result<()> {
        let key = encode_job_key(batch_id, seq);
        let value = serde_json::to_vec(record)?;
        self.jobs.insert(key, value)?;
        debug!("Recorded job {} for batch {}", record.job_id, batch_id);
        Ok(())
    }

    /// Record a finished batch summary
    pub fn record_batch(&self, record: &BatchRecord) -> Result<()> {
        let key = encode_batch_key(&record.batch_id);
        let value = serde_json::to_vec(record)?;
        self.batches.insert(key, value)?;
        debug!("Recorded batch {}", record.batch_id);
        Ok(())
    }

    /// Get a batch summary by ID
    pub fn get_batch(&self, batch_id: &str) -> Result<Option<BatchRecord>> {
        let key = encode_batch_key(batch_id);
        match self.batches.get(key)? {
            Some(value) => {
                let record = serde_json::from_slice(&value)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Job records for a batch, in settle order
    pub fn batch_jobs(&self, batch_id: &str) -> Result<Vec<JobRecord>> {
        let prefix = encode_job_prefix(batch_id);
        let mut records = Vec::new();
        for item in self.jobs.prefix(prefix) {
            let (_, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    /// Prune batches whose records are older than the retention window
    pub fn prune_expired(&self, retention_days: u64) -> Result<PruneStats> {
        info!("Starting pruning process");
        let stats = prune_expired(
            &self.keyspace,
            &self.batches,
            &self.jobs,
            &self.metadata,
            retention_days,
        )?;
        info!("Pruning completed: {:?}", stats);
        Ok(stats)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Get internal statistics (for debugging/monitoring)
    pub fn stats(&self) -> Result<LedgerStats> {
        let mut batch_count = 0;
        let mut job_count = 0;

        for item in self.batches.iter() {
            item?;
            batch_count += 1;
        }

        for item in self.jobs.iter() {
            item?;
            job_count += 1;
        }

        Ok(LedgerStats {
            batch_count,
            job_count,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LedgerStats {
    pub batch_count: usize,
    pub job_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_ledger() -> (ExportLedger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ExportLedger::open(temp_dir.path().join("test_ledger")).unwrap();
        (ledger, temp_dir)
    }

    fn job_record(job_id: &str, outcome: JobOutcome) -> JobRecord {
        JobRecord {
            job_id: job_id.to_string(),
            outcome,
            downloads_timed_out: false,
            recorded_at: Utc::now(),
        }
    }

    fn batch_record(batch_id: &str) -> BatchRecord {
        BatchRecord {
            batch_id: batch_id.to_string(),
            total_jobs: 2,
            completed: 1,
            failed: 1,
            stopped: false,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_open_ledger() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ExportLedger::open(temp_dir.path().join("test_ledger"));
        assert!(ledger.is_ok());
    }

    #[test]
    fn test_record_and_get_batch() {
        let (ledger, _temp) = create_test_ledger();

        ledger.record_batch(&batch_record("batch_1")).unwrap();
        let retrieved = ledger.get_batch("batch_1").unwrap().unwrap();

        assert_eq!(retrieved.batch_id, "batch_1");
        assert_eq!(retrieved.total_jobs, 2);
        assert_eq!(retrieved.completed, 1);
    }

    #[test]
    fn test_get_nonexistent_batch() {
        let (ledger, _temp) = create_test_ledger();
        assert!(ledger.get_batch("missing").unwrap().is_none());
    }

    #[test]
    fn test_batch_jobs_in_settle_order() {
        let (ledger, _temp) = create_test_ledger();

        ledger
            .record_job("batch_1", 0, &job_record("conv-a", JobOutcome::Completed))
            .unwrap();
        ledger
            .record_job(
                "batch_1",
                1,
                &job_record(
                    "conv-b",
                    JobOutcome::Failed {
                        reason: "worker spawn failed".to_string(),
                    },
                ),
            )
            .unwrap();
        // Another batch's rows must not leak into the scan.
        ledger
            .record_job("batch_2", 0, &job_record("conv-x", JobOutcome::Completed))
            .unwrap();

        let jobs = ledger.batch_jobs("batch_1").unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].job_id, "conv-a");
        assert_eq!(jobs[1].job_id, "conv-b");
        assert_eq!(jobs[0].outcome, JobOutcome::Completed);
    }

    #[test]
    fn test_stats() {
        let (ledger, _temp) = create_test_ledger();

        ledger.record_batch(&batch_record("batch_1")).unwrap();
        ledger
            .record_job("batch_1", 0, &job_record("conv-a", JobOutcome::Completed))
            .unwrap();

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.batch_count, 1);
        assert_eq!(stats.job_count, 1);
    }

    #[test]
    fn test_persist() {
        let (ledger, _temp) = create_test_ledger();
        ledger.record_batch(&batch_record("batch_persist")).unwrap();
        ledger.persist().unwrap();
    }
}
