//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::PipelineError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the engine
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Versioned settings record
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Environment directory (id → host, port, credentials)
    pub fn environments_file(&self) -> File {
        File::new(self.base_dir.join("environments.json"))
    }

    /// Override store (environment id → overrides)
    pub fn overrides_file(&self) -> File {
        File::new(self.base_dir.join("overrides.json"))
    }

    /// Built archives, addressed by version and digest
    pub fn archives_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("archives"))
    }

    /// Job records and their append-only logs
    pub fn jobs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("jobs"))
    }

    /// Rolling log files
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), PipelineError> {
        self.archives_dir().create().await?;
        self.jobs_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/jarsmith");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".jarsmith");

        Self::new(base_dir)
    }
}
