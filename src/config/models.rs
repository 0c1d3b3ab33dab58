use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::orchestrator::Timing;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub devtools: DevToolsSection,
    #[serde(default)]
    pub downloads: DownloadsSection,
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            export: ExportConfig::default(),
            devtools: DevToolsSection::default(),
            downloads: DownloadsSection::default(),
            retention: RetentionConfig::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default)]
    pub api: ApiLimits,
}

/// API request limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiLimits {
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_max_jobs_per_batch")]
    pub max_jobs_per_batch: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            ledger_path: default_ledger_path(),
            api: ApiLimits::default(),
        }
    }
}

impl Default for ApiLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            max_jobs_per_batch: default_max_jobs_per_batch(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

fn default_max_payload_bytes() -> usize {
    1024 * 1024 // 1 MB
}

fn default_max_jobs_per_batch() -> usize {
    500
}

/// Export pipeline configuration
///
/// The timing values mirror the pacing the conversation site and the
/// download subsystem tolerate; lowering them risks tripping rate limits or
/// the multiple-download confirmation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportConfig {
    /// Conversation site the workers are pointed at.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Account selector used when a batch supplies none.
    #[serde(default = "default_scope")]
    pub default_scope: String,
    #[serde(default = "default_download_wait_budget_ms")]
    pub download_wait_budget_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_inter_job_delay_ms")]
    pub inter_job_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_download_stagger_ms")]
    pub download_stagger_ms: u64,
    /// Tear down worker contexts after each job settles. Off by default so
    /// transfers the page itself initiated can finish.
    #[serde(default)]
    pub close_worker_after_job: bool,
    /// Folder prefix for downloaded files ({prefix}, {prefix}-images,
    /// {prefix}-videos).
    #[serde(default = "default_subdir_prefix")]
    pub subdir_prefix: String,
    /// Base URL under which this service's artifact routes are reachable by
    /// the download subsystem.
    #[serde(default = "default_public_base")]
    pub public_base: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_scope: default_scope(),
            download_wait_budget_ms: default_download_wait_budget_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            inter_job_delay_ms: default_inter_job_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            download_stagger_ms: default_download_stagger_ms(),
            close_worker_after_job: false,
            subdir_prefix: default_subdir_prefix(),
            public_base: default_public_base(),
        }
    }
}

impl ExportConfig {
    pub fn timing(&self) -> Timing {
        Timing {
            download_wait_budget: Duration::from_millis(self.download_wait_budget_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            inter_job_delay: Duration::from_millis(self.inter_job_delay_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn download_stagger(&self) -> Duration {
        Duration::from_millis(self.download_stagger_ms)
    }
}

fn default_base_url() -> String {
    "https://gemini.google.com".to_string()
}

fn default_scope() -> String {
    crate::host::DEFAULT_SCOPE.to_string()
}

fn default_download_wait_budget_ms() -> u64 {
    15_000
}

fn default_settle_delay_ms() -> u64 {
    3_000
}

fn default_inter_job_delay_ms() -> u64 {
    2_000
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_download_stagger_ms() -> u64 {
    500
}

fn default_subdir_prefix() -> String {
    "gemini".to_string()
}

fn default_public_base() -> String {
    "http://127.0.0.1:8080".to_string()
}

/// DevTools endpoint configuration (worker host)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DevToolsSection {
    #[serde(default = "default_devtools_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for DevToolsSection {
    fn default() -> Self {
        Self {
            endpoint: default_devtools_endpoint(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_devtools_endpoint() -> String {
    "http://127.0.0.1:9222".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

/// Download backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadsSection {
    /// Directory the download backend writes below.
    #[serde(default = "default_download_root")]
    pub root: PathBuf,
    #[serde(default = "default_download_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_download_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for DownloadsSection {
    fn default() -> Self {
        Self {
            root: default_download_root(),
            connect_timeout_ms: default_download_connect_timeout_ms(),
            request_timeout_ms: default_download_request_timeout_ms(),
        }
    }
}

fn default_download_root() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_download_connect_timeout_ms() -> u64 {
    10_000
}

fn default_download_request_timeout_ms() -> u64 {
    60_000
}

/// Retention configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_batch_ttl_days")]
    pub batch_ttl_days: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            batch_ttl_days: default_batch_ttl_days(),
        }
    }
}

fn default_batch_ttl_days() -> u64 {
    crate::ledger::RETENTION_BATCHES_DAYS
}
