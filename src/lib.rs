pub mod api;
pub mod artifacts;
pub mod config;
pub mod downloads;
pub mod host; // Expose for tests (MockWorkerHost / MockDownloadHost)
pub mod ledger;
pub mod observability;
pub mod orchestrator;
pub mod protocol;
pub mod tracker;
