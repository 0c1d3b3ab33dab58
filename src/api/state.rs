use std::sync::Arc;

use crate::artifacts::ArtifactStore;
use crate::config::Config;
use crate::downloads::DownloadCoordinator;
use crate::ledger::ExportLedger;
use crate::observability::Metrics;
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Orchestrator,
    pub coordinator: Arc<DownloadCoordinator>,
    pub artifacts: ArtifactStore,
    pub ledger: Arc<ExportLedger>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Config,
        orchestrator: Orchestrator,
        coordinator: Arc<DownloadCoordinator>,
        artifacts: ArtifactStore,
        ledger: Arc<ExportLedger>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator,
            coordinator,
            artifacts,
            ledger,
            metrics,
        }
    }
}
