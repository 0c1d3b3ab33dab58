//! Download coordination: turning worker download requests into initiated
//! transfers.
//!
//! The coordinator derives destination filenames, materializes inline
//! documents as transient artifacts, spaces out consecutive initiations so
//! the host's multiple-download confirmation never fires, and wires every
//! transfer into the tracker (start detection) and the reclaimer (artifact
//! cleanup).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::host::{DownloadHost, DownloadHostError};
use crate::observability::Metrics;
use crate::protocol::{ConflictPolicy, DownloadRequest, MediaKind};
use crate::tracker::DownloadTracker;
use crate::tracker::reclaim::Reclaimer;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request has neither url nor document")]
    MissingSource,

    #[error(transparent)]
    Host(#[from] DownloadHostError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

pub type Result<T> = std::result::Result<T, DownloadError>;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

pub struct DownloadCoordinator {
    host: Arc<dyn DownloadHost>,
    tracker: Arc<DownloadTracker>,
    reclaimer: Arc<Reclaimer>,
    artifacts: ArtifactStore,
    metrics: Arc<Metrics>,
    /// Base URL under which this service's artifact routes are reachable by
    /// the download subsystem.
    public_base: String,
    subdir_prefix: String,
    stagger: Duration,
    last_initiated: Mutex<Option<Instant>>,
}

impl DownloadCoordinator {
    pub fn new(
        host: Arc<dyn DownloadHost>,
        tracker: Arc<DownloadTracker>,
        reclaimer: Arc<Reclaimer>,
        artifacts: ArtifactStore,
        metrics: Arc<Metrics>,
        public_base: String,
        subdir_prefix: String,
        stagger: Duration,
    ) -> Self {
        Self {
            host,
            tracker,
            reclaimer,
            artifacts,
            metrics,
            public_base: public_base.trim_end_matches('/').to_string(),
            subdir_prefix,
            stagger,
            last_initiated: Mutex::new(None),
        }
    }

    /// Initiate the transfer described by `request` and register it for
    /// tracking. Returns the download id.
    pub async fn request(&self, request: DownloadRequest) -> Result<String> {
        let (url, artifact_id) = match (&request.url, &request.document) {
            (Some(url), _) => (url.clone(), None),
            (None, Some(document)) => {
                let artifact_id = self
                    .artifacts
                    .put(bytes::Bytes::from(document.clone().into_bytes()))
                    .await?;
                let url = format!("{}/artifacts/{}", self.public_base, artifact_id);
                (url, Some(artifact_id))
            }
            (None, None) => return Err(DownloadError::MissingSource),
        };

        let filename = derive_filename(&request, &url);
        let destination = self.destination(request.kind, &filename);

        self.stagger_delay().await;

        let download_id = self
            .host
            .initiate(&url, &destination, ConflictPolicy::Uniquify)
            .await?;

        self.tracker.register(&request.job_id, &download_id);
        if let Some(artifact_id) = artifact_id {
            self.reclaimer.register(&download_id, &artifact_id);
        }

        info!(
            job_id = %request.job_id,
            download_id,
            destination,
            "Download initiated"
        );
        Ok(download_id)
    }

    /// Forward the download subsystem's push stream into the tracker and the
    /// reclaimer. Runs until the host drops its sender.
    pub fn spawn_event_pump(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let mut events = coordinator.host.events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        coordinator.tracker.note_event(&event);
                        let released = coordinator
                            .reclaimer
                            .on_status_changed(&event.download_id, event.state)
                            .await;
                        if released {
                            coordinator.metrics.artifact_released();
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Download event stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn destination(&self, kind: MediaKind, filename: &str) -> String {
        match kind {
            MediaKind::Video => format!("{}-videos/{}", self.subdir_prefix, filename),
            MediaKind::Image => format!("{}-images/{}", self.subdir_prefix, filename),
            MediaKind::Document => format!("{}/{}", self.subdir_prefix, filename),
        }
    }

    async fn stagger_delay(&self) {
        let mut last = self.last_initiated.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.stagger {
                tokio::time::sleep(self.stagger - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Destination filename for a request: an explicit name wins, then a
/// `filename` query parameter on the source URL, then a generated
/// `{job}_msg{m}_{kind}{n}.{ext}` name.
pub fn derive_filename(request: &DownloadRequest, url: &str) -> String {
    if let Some(name) = request.filename.as_deref().filter(|n| !n.is_empty()) {
        return name.to_string();
    }

    if let Some(name) = filename_query_param(url) {
        return name;
    }

    let (word, ext) = match request.kind {
        MediaKind::Video => ("video", "mp4".to_string()),
        MediaKind::Image => ("image", image_extension(url)),
        MediaKind::Document => ("document", "json".to_string()),
    };
    format!(
        "{}_msg{}_{}{}.{}",
        request.job_id, request.message_index, word, request.file_index, ext
    )
}

fn filename_query_param(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "filename")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Image extension from the URL path, falling back to `jpg`.
fn image_extension(url: &str) -> String {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_default();
    let ext = path.rsplit('.').next().unwrap_or_default().to_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        ext
    } else {
        "jpg".to_string()
    }
}
