//! Local-filesystem download backend.
//!
//! Fetches each source over HTTP and writes it below a configured download
//! root, reporting the same state machine a browser download manager would:
//! `Initiated` on acceptance, `InProgress` once the response arrives,
//! `Complete` or `Interrupted` at the end. Conflicting destination names are
//! uniquified with a ` (n)` suffix instead of prompting.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::{ConflictPolicy, DownloadEvent, DownloadState};

use super::{DownloadHost, DownloadHostError};

/// HTTP client configuration for the local backend
#[derive(Debug, Clone)]
pub struct LocalDownloadConfig {
    pub root: PathBuf,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for LocalDownloadConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("downloads"),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            user_agent: format!("chatexport/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

struct Shared {
    client: Client,
    root: PathBuf,
    states: Mutex<HashMap<String, DownloadState>>,
    event_tx: broadcast::Sender<DownloadEvent>,
}

impl Shared {
    fn set_state(&self, download_id: &str, state: DownloadState) {
        self.states
            .lock()
            .unwrap()
            .insert(download_id.to_string(), state);
        let _ = self.event_tx.send(DownloadEvent {
            download_id: download_id.to_string(),
            state,
        });
    }

    async fn transfer(
        &self,
        download_id: &str,
        url: &str,
        destination: &Path,
        conflict: ConflictPolicy,
    ) -> Result<PathBuf, DownloadHostError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadHostError::InitiateFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadHostError::InitiateFailed(format!(
                "HTTP {}",
                status.as_u16()
            )));
        }

        // The response arrived, so the transfer has observably started.
        self.set_state(download_id, DownloadState::InProgress);

        let body = response
            .bytes()
            .await
            .map_err(|e| DownloadHostError::InitiateFailed(e.to_string()))?;

        let mut path = self.root.join(destination);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadHostError::InitiateFailed(e.to_string()))?;
        }
        if conflict == ConflictPolicy::Uniquify {
            path = uniquify_path(path);
        }

        tokio::fs::write(&path, &body)
            .await
            .map_err(|e| DownloadHostError::InitiateFailed(e.to_string()))?;

        Ok(path)
    }
}

pub struct LocalDownloadHost {
    shared: Arc<Shared>,
}

impl LocalDownloadHost {
    pub fn new(config: LocalDownloadConfig) -> Result<Self, DownloadHostError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| DownloadHostError::InitiateFailed(e.to_string()))?;

        let (event_tx, _) = broadcast::channel(256);
        Ok(Self {
            shared: Arc::new(Shared {
                client,
                root: config.root,
                states: Mutex::new(HashMap::new()),
                event_tx,
            }),
        })
    }
}

#[async_trait]
impl DownloadHost for LocalDownloadHost {
    async fn initiate(
        &self,
        url: &str,
        destination: &str,
        conflict: ConflictPolicy,
    ) -> Result<String, DownloadHostError> {
        let destination = sanitize_destination(destination)?;

        let download_id = format!("dl-{}", Uuid::new_v4());
        self.shared.set_state(&download_id, DownloadState::Initiated);

        let shared = Arc::clone(&self.shared);
        let id = download_id.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            match shared.transfer(&id, &url, &destination, conflict).await {
                Ok(path) => {
                    debug!(download_id = id, path = %path.display(), "Download complete");
                    shared.set_state(&id, DownloadState::Complete);
                }
                Err(e) => {
                    warn!(download_id = id, url, error = %e, "Download interrupted");
                    shared.set_state(&id, DownloadState::Interrupted);
                }
            }
        });

        Ok(download_id)
    }

    async fn query(&self, download_id: &str) -> Result<DownloadState, DownloadHostError> {
        self.shared
            .states
            .lock()
            .unwrap()
            .get(download_id)
            .copied()
            .ok_or_else(|| DownloadHostError::UnknownDownload(download_id.to_string()))
    }

    fn events(&self) -> broadcast::Receiver<DownloadEvent> {
        self.shared.event_tx.subscribe()
    }
}

/// Reject absolute paths and parent traversal in a destination
fn sanitize_destination(destination: &str) -> Result<PathBuf, DownloadHostError> {
    let path = PathBuf::from(destination);
    let safe = !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(DownloadHostError::InitiateFailed(format!(
            "unsafe destination: {destination}"
        )));
    }
    Ok(path)
}

/// First non-existing variant of a path: `name.ext`, `name (1).ext`, ...
fn uniquify_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();

    for n in 1.. {
        let name = match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_rejects_traversal() {
        assert!(sanitize_destination("exports/a.json").is_ok());
        assert!(sanitize_destination("../outside").is_err());
        assert!(sanitize_destination("/etc/passwd").is_err());
        assert!(sanitize_destination("exports/../../x").is_err());
        assert!(sanitize_destination("").is_err());
    }

    #[test]
    fn test_uniquify_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.json");
        assert_eq!(uniquify_path(path.clone()), path);

        std::fs::write(&path, b"x").unwrap();
        assert_eq!(uniquify_path(path.clone()), dir.path().join("file (1).json"));

        std::fs::write(dir.path().join("file (1).json"), b"x").unwrap();
        assert_eq!(uniquify_path(path), dir.path().join("file (2).json"));
    }

    #[tokio::test]
    async fn test_unreachable_source_interrupts() {
        let dir = tempfile::tempdir().unwrap();
        let host = LocalDownloadHost::new(LocalDownloadConfig {
            root: dir.path().to_path_buf(),
            connect_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_millis(500),
            ..LocalDownloadConfig::default()
        })
        .unwrap();
        let mut events = host.events();

        let id = host
            .initiate("http://127.0.0.1:1/never", "exports/x.bin", ConflictPolicy::Uniquify)
            .await
            .unwrap();

        loop {
            let event = events.recv().await.unwrap();
            assert_eq!(event.download_id, id);
            if event.state == DownloadState::Interrupted {
                break;
            }
        }
        assert_eq!(host.query(&id).await.unwrap(), DownloadState::Interrupted);
    }
}
