//! Override store

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::catalog::OverrideStore;
use crate::errors::PipelineError;
use crate::filesys::file::File;
use crate::models::overrides::FileOverride;

/// Overrides read from a JSON array. Each snapshot is one read of the file,
/// which administrators replace atomically.
pub struct FileOverrideStore {
    file: File,
}

impl FileOverrideStore {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

#[async_trait]
impl OverrideStore for FileOverrideStore {
    async fn snapshot(&self, environment_id: &str) -> Result<Vec<FileOverride>, PipelineError> {
        if !self.file.exists().await {
            return Ok(Vec::new());
        }
        let all: Vec<FileOverride> = self.file.read_json().await.map_err(|e| {
            PipelineError::ConfigError(format!(
                "Invalid override file {}: {}",
                self.file.path().display(),
                e
            ))
        })?;
        Ok(all
            .into_iter()
            .filter(|o| o.environment_id == environment_id)
            .collect())
    }
}

/// Overrides held in memory
#[derive(Default)]
pub struct MemoryOverrideStore {
    overrides: RwLock<Vec<FileOverride>>,
}

impl MemoryOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the override for (environment, path)
    pub async fn upsert(&self, file_override: FileOverride) {
        let mut overrides = self.overrides.write().await;
        overrides.retain(|o| {
            o.environment_id != file_override.environment_id || o.path != file_override.path
        });
        overrides.push(file_override);
    }

    pub async fn remove(&self, environment_id: &str, path: &str) -> bool {
        let mut overrides = self.overrides.write().await;
        let before = overrides.len();
        overrides.retain(|o| o.environment_id != environment_id || o.path != path);
        overrides.len() != before
    }
}

#[async_trait]
impl OverrideStore for MemoryOverrideStore {
    async fn snapshot(&self, environment_id: &str) -> Result<Vec<FileOverride>, PipelineError> {
        Ok(self
            .overrides
            .read()
            .await
            .iter()
            .filter(|o| o.environment_id == environment_id)
            .cloned()
            .collect())
    }
}
