//! Environment directory

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::catalog::EnvironmentDirectory;
use crate::errors::PipelineError;
use crate::filesys::file::File;
use crate::models::environment::Environment;

/// Environments read from a JSON array on every lookup
pub struct FileEnvironmentDirectory {
    file: File,
}

impl FileEnvironmentDirectory {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

#[async_trait]
impl EnvironmentDirectory for FileEnvironmentDirectory {
    async fn get(&self, environment_id: &str) -> Result<Option<Arc<Environment>>, PipelineError> {
        if !self.file.exists().await {
            return Ok(None);
        }
        let environments: Vec<Environment> = self.file.read_json().await.map_err(|e| {
            PipelineError::ConfigError(format!(
                "Invalid environment file {}: {}",
                self.file.path().display(),
                e
            ))
        })?;
        Ok(environments
            .into_iter()
            .find(|env| env.id == environment_id)
            .map(Arc::new))
    }
}

/// Environments held in memory
#[derive(Default)]
pub struct MemoryEnvironmentDirectory {
    environments: RwLock<HashMap<String, Arc<Environment>>>,
}

impl MemoryEnvironmentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, environment: Environment) {
        self.environments
            .write()
            .await
            .insert(environment.id.clone(), Arc::new(environment));
    }
}

#[async_trait]
impl EnvironmentDirectory for MemoryEnvironmentDirectory {
    async fn get(&self, environment_id: &str) -> Result<Option<Arc<Environment>>, PipelineError> {
        Ok(self.environments.read().await.get(environment_id).cloned())
    }
}
