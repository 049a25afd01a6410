//! Settings file management
//!
//! Settings live in a single versioned record. Readers take cheap snapshots;
//! writers must present the version they read, and a stale version is
//! rejected instead of silently overwriting a concurrent edit.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::errors::PipelineError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::utils::RetryBackoff;

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON formatted logs
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily rolling log files here
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Job pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Git configuration
    #[serde(default)]
    pub git: GitSettings,

    /// Project id → local repository clone
    #[serde(default)]
    pub repositories: BTreeMap<String, PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            pipeline: PipelineSettings::default(),
            git: GitSettings::default(),
            repositories: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.server.host.trim().is_empty() {
            return Err(PipelineError::ValidationError(
                "server.host must not be empty".to_string(),
            ));
        }
        if self.server.port == 0 {
            return Err(PipelineError::ValidationError(
                "server.port must not be 0".to_string(),
            ));
        }

        let p = &self.pipeline;
        if p.worker_pool_size == 0 || p.worker_pool_size > 256 {
            return Err(PipelineError::ValidationError(format!(
                "pipeline.worker_pool_size must be within 1..=256, got {}",
                p.worker_pool_size
            )));
        }
        if p.max_changed_files == 0 {
            return Err(PipelineError::ValidationError(
                "pipeline.max_changed_files must be at least 1".to_string(),
            ));
        }
        if p.deploy_timeout_secs == 0 {
            return Err(PipelineError::ValidationError(
                "pipeline.deploy_timeout_secs must be at least 1".to_string(),
            ));
        }
        if p.retry_base_delay_ms > p.retry_max_delay_ms {
            return Err(PipelineError::ValidationError(
                "pipeline.retry_base_delay_ms must not exceed retry_max_delay_ms".to_string(),
            ));
        }

        if self.git.binary.trim().is_empty() {
            return Err(PipelineError::ValidationError(
                "git.binary must not be empty".to_string(),
            ));
        }
        for (project, path) in &self.repositories {
            if project.trim().is_empty() || path.as_os_str().is_empty() {
                return Err(PipelineError::ValidationError(format!(
                    "Invalid repository mapping: {:?} -> {:?}",
                    project, path
                )));
            }
        }

        Ok(())
    }

    /// Fields that differ from `next` but are only read at startup
    pub fn restart_required(&self, next: &Settings) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.log_level != next.log_level {
            fields.push("log_level");
        }
        if self.log_json != next.log_json {
            fields.push("log_json");
        }
        if self.log_dir != next.log_dir {
            fields.push("log_dir");
        }
        if self.server.host != next.server.host {
            fields.push("server.host");
        }
        if self.server.port != next.server.port {
            fields.push("server.port");
        }
        if self.pipeline.worker_pool_size != next.pipeline.worker_pool_size {
            fields.push("pipeline.worker_pool_size");
        }
        fields
    }
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Job pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Jobs allowed in flight at once
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Ceiling on the number of changed files in one job
    #[serde(default = "default_max_changed_files")]
    pub max_changed_files: usize,

    /// Deadline for a single deploy attempt
    #[serde(default = "default_deploy_timeout_secs")]
    pub deploy_timeout_secs: u64,

    /// Extra attempts after a connection failure
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_max_changed_files() -> usize {
    5000
}

fn default_deploy_timeout_secs() -> u64 {
    300
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            max_changed_files: default_max_changed_files(),
            deploy_timeout_secs: default_deploy_timeout_secs(),
            retry_count: default_retry_count(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl PipelineSettings {
    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_timeout_secs)
    }

    pub fn retry_backoff(&self) -> RetryBackoff {
        RetryBackoff::from_millis(self.retry_base_delay_ms, self.retry_max_delay_ms)
    }
}

/// Git settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitSettings {
    /// Git executable
    #[serde(default = "default_git_binary")]
    pub binary: String,
}

fn default_git_binary() -> String {
    "git".to_string()
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
        }
    }
}

/// Settings together with their version token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedSettings {
    #[serde(default)]
    pub version: u64,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub settings: Settings,
}

impl VersionedSettings {
    fn initial(settings: Settings) -> Self {
        Self {
            version: 1,
            updated_at: Utc::now(),
            settings,
        }
    }
}

/// Outcome of a settings update
#[derive(Debug, Clone, Serialize)]
pub struct SettingsUpdate {
    #[serde(flatten)]
    pub record: VersionedSettings,

    /// Changed fields that take effect after the next restart
    pub restart_required: Vec<&'static str>,
}

/// Versioned settings record with optimistic concurrency
pub struct SettingsStore {
    file: Option<File>,
    current: RwLock<VersionedSettings>,
}

impl SettingsStore {
    /// In-memory store, nothing is persisted
    pub fn in_memory(settings: Settings) -> Result<Self, PipelineError> {
        settings.validate()?;
        Ok(Self {
            file: None,
            current: RwLock::new(VersionedSettings::initial(settings)),
        })
    }

    /// Load the record from `file`, or create it with defaults
    pub async fn load_or_init(file: File) -> Result<Self, PipelineError> {
        let record = if file.exists().await {
            let mut record: VersionedSettings = file.read_json().await?;
            record.settings.validate()?;
            if record.version == 0 {
                record.version = 1;
            }
            record
        } else {
            let record = VersionedSettings::initial(Settings::default());
            file.write_json(&record).await?;
            info!("Created default settings at {}", file.path().display());
            record
        };

        Ok(Self {
            file: Some(file),
            current: RwLock::new(record),
        })
    }

    /// Current record
    pub async fn snapshot(&self) -> VersionedSettings {
        self.current.read().await.clone()
    }

    /// Current settings without the version
    pub async fn settings(&self) -> Settings {
        self.current.read().await.settings.clone()
    }

    /// Replace the settings if `expected_version` is still current.
    ///
    /// Every job started afterwards sees the new values; fields listed in
    /// [`SettingsUpdate::restart_required`] only apply after a restart.
    pub async fn update(
        &self,
        expected_version: u64,
        settings: Settings,
    ) -> Result<SettingsUpdate, PipelineError> {
        settings.validate()?;

        let mut current = self.current.write().await;
        if current.version != expected_version {
            return Err(PipelineError::VersionConflict {
                expected: expected_version,
                current: current.version,
            });
        }

        let next = VersionedSettings {
            version: current.version + 1,
            updated_at: Utc::now(),
            settings,
        };
        if let Some(file) = &self.file {
            file.write_json(&next).await?;
        }
        let restart_required = current.settings.restart_required(&next.settings);
        *current = next.clone();

        info!("Settings updated to version {}", next.version);
        if !restart_required.is_empty() {
            warn!(
                "Settings version {} changes {} which apply after a restart",
                next.version,
                restart_required.join(", ")
            );
        }
        Ok(SettingsUpdate {
            record: next,
            restart_required,
        })
    }
}
