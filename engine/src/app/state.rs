//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::catalog::{FileEnvironmentDirectory, FileOverrideStore};
use crate::errors::PipelineError;
use crate::pipeline::archive::ArchiveBuilder;
use crate::pipeline::deployer::Deployer;
use crate::pipeline::diff::DiffResolver;
use crate::pipeline::git::GitDiffProvider;
use crate::pipeline::orchestrator::{JobOrchestrator, JobQueue, Stages};
use crate::pipeline::overrides::OverrideApplier;
use crate::pipeline::transport::HttpArchiveTransport;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::SettingsStore;
use crate::store::{JobStore, PersistentJobStore};

/// Long-lived components shared by the workers and the server
pub struct AppState {
    pub settings: Arc<SettingsStore>,
    pub store: Arc<dyn JobStore>,
    pub orchestrator: Arc<JobOrchestrator>,
}

impl AppState {
    /// Open the job store and wire the pipeline against `layout`
    pub async fn init(
        layout: &StorageLayout,
        settings: Arc<SettingsStore>,
    ) -> Result<(Self, JobQueue), PipelineError> {
        layout.setup().await?;

        let store: Arc<dyn JobStore> = Arc::new(PersistentJobStore::open(layout.jobs_dir()).await?);
        let environments = Arc::new(FileEnvironmentDirectory::new(layout.environments_file()));
        let overrides = Arc::new(FileOverrideStore::new(layout.overrides_file()));
        let transport = Arc::new(HttpArchiveTransport::new()?);

        let stages = Stages {
            resolver: DiffResolver::new(Arc::new(GitDiffProvider::new(settings.clone()))),
            applier: OverrideApplier::new(overrides, environments.clone()),
            builder: ArchiveBuilder::new(layout.archives_dir()),
            deployer: Deployer::new(transport, environments),
        };
        let (orchestrator, queue) = JobOrchestrator::new(store.clone(), settings.clone(), stages);

        info!("Storage ready at {}", layout.base_dir.display());
        Ok((
            Self {
                settings,
                store,
                orchestrator,
            },
            queue,
        ))
    }
}
