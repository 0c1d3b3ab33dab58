/// Pruning and retention policy implementation
use chrono::{Duration, Utc};
use fjall::{Keyspace, PartitionHandle};
use tracing::{debug, info};

use super::error::Result;
use super::partitions::{decode_batch_key, encode_job_prefix, encode_meta_key};
use super::store::BatchRecord;

/// Default retention window for batch history (days)
pub const RETENTION_BATCHES_DAYS: u64 = 30;

const META_LAST_PRUNE: &str = "last_prune";

/// Pruning statistics
#[derive(Debug, Default)]
pub struct PruneStats {
    pub batches_pruned: usize,
    pub jobs_pruned: usize,
}

/// Prune batches whose `finished_at` is older than the retention window,
/// together with their job rows.
pub fn prune_expired(
    keyspace: &Keyspace,
    batches_partition: &PartitionHandle,
    jobs_partition: &PartitionHandle,
    metadata_partition: &PartitionHandle,
    retention_days: u64,
) -> Result<PruneStats> {
    let cutoff = Utc::now() - Duration::days(retention_days as i64);
    let mut stats = PruneStats::default();

    let mut expired: Vec<(Vec<u8>, String)> = Vec::new();
    for item in batches_partition.iter() {
        let (key, value) = item?;
        let record: BatchRecord = serde_json::from_slice(&value)?;
        if record.finished_at < cutoff {
            if let Some(batch_id) = decode_batch_key(&key) {
                expired.push((key.to_vec(), batch_id));
            }
        }
    }

    for (key, batch_id) in expired {
        let prefix = encode_job_prefix(&batch_id);
        let mut job_keys: Vec<Vec<u8>> = Vec::new();
        for item in jobs_partition.prefix(prefix) {
            let (job_key, _) = item?;
            job_keys.push(job_key.to_vec());
        }
        for job_key in job_keys {
            jobs_partition.remove(job_key)?;
            stats.jobs_pruned += 1;
        }

        batches_partition.remove(key)?;
        stats.batches_pruned += 1;
        debug!("Pruned expired batch {}", batch_id);
    }

    metadata_partition.insert(
        encode_meta_key(META_LAST_PRUNE),
        Utc::now().timestamp().to_string().as_bytes(),
    )?;

    keyspace.persist(fjall::PersistMode::SyncAll)?;
    info!("Pruning complete: {:?}", stats);

    Ok(stats)
}
