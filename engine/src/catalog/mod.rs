//! Read-only collaborators the pipeline consults: environment directory and
//! per-environment file overrides.

pub mod environments;
pub mod overrides;

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::PipelineError;
use crate::models::environment::Environment;
use crate::models::overrides::FileOverride;

pub use environments::{FileEnvironmentDirectory, MemoryEnvironmentDirectory};
pub use overrides::{FileOverrideStore, MemoryOverrideStore};

/// Environment id → deployment target
#[async_trait]
pub trait EnvironmentDirectory: Send + Sync {
    async fn get(&self, environment_id: &str) -> Result<Option<Arc<Environment>>, PipelineError>;
}

/// Environment id → file overrides
#[async_trait]
pub trait OverrideStore: Send + Sync {
    /// Every override of one environment, read in a single pass
    async fn snapshot(&self, environment_id: &str) -> Result<Vec<FileOverride>, PipelineError>;
}
