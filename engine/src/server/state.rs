//! Server state

use std::sync::Arc;

use crate::pipeline::orchestrator::JobOrchestrator;
use crate::storage::settings::SettingsStore;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<JobOrchestrator>,
    pub settings: Arc<SettingsStore>,
}

impl ServerState {
    pub fn new(orchestrator: Arc<JobOrchestrator>, settings: Arc<SettingsStore>) -> Self {
        Self {
            orchestrator,
            settings,
        }
    }
}
