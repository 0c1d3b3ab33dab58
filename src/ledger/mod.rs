//! Fjall-based persistence layer for batch export history
//!
//! This module provides durable storage for settled batches, so the outcome
//! of a run survives a restart. It uses Fjall (an embedded LSM key-value
//! store) to persist:
//!
//! - Batch summaries (totals, stop flag, timestamps)
//! - Job records (terminal outcome plus the download-timeout marker, one row
//!   per settled job in settle order)
//! - Metadata (pruning state)
//!
//! Job records are written as each job settles; the batch summary lands when
//! the run finalizes. A crash therefore loses at most the in-flight job.
//!
//! Pruning is timestamp-based over `finished_at` and triggered via
//! `ExportLedger::prune_expired()`.
pub mod error;
pub mod partitions;
pub mod pruning;
pub mod store;

pub use error::{LedgerError, Result};
pub use pruning::{PruneStats, RETENTION_BATCHES_DAYS};
pub use store::{BatchRecord, ExportLedger, JobRecord, LedgerStats};
