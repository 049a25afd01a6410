//! Job API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error body returned for any rejected request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine readable error kind
    pub kind: String,

    /// Human readable message
    pub message: String,
}

/// A file named explicitly by the caller instead of a commit range diff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestedFile {
    pub path: String,

    /// `added`, `modified` or `deleted`
    pub status: String,
}

/// Explicit sign-off required before shipping to a production environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionConfirmation {
    /// Who confirmed the deployment
    pub confirmed_by: String,

    /// Strategy the confirmer agreed to
    pub strategy: String,

    /// Whether the confirmer agreed to apply environment overrides
    pub apply_overrides: bool,
}

/// Job submission request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub project_id: String,
    pub branch: String,
    pub version: String,

    /// Target environment; absent for build-only jobs
    #[serde(default)]
    pub environment_id: Option<String>,

    /// `diff` or `full`
    #[serde(default = "default_strategy")]
    pub strategy: String,

    pub base_commit: String,
    pub head_commit: String,

    #[serde(default)]
    pub apply_overrides: bool,

    /// Explicit file list, bypasses the commit range diff
    #[serde(default)]
    pub files: Option<Vec<RequestedFile>>,

    #[serde(default)]
    pub production_confirmation: Option<ProductionConfirmation>,
}

fn default_strategy() -> String {
    "diff".to_string()
}

/// Job submission response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
}

/// Packaged archive produced by a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub location: String,
    pub digest: String,
    pub size_bytes: u64,
    pub file_count: usize,
}

/// Terminal error of a failed job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobErrorSummary {
    pub kind: String,
    pub stage: String,
    pub message: String,
    pub retryable: bool,
}

/// Job status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub project_id: String,
    pub branch: String,
    pub version: String,
    pub environment_id: Option<String>,
    pub strategy: String,
    pub state: String,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Set only once the job succeeded
    pub archive_location: Option<String>,

    /// Archive built by this job, kept visible even when deployment failed
    pub built_archive: Option<ArchiveSummary>,

    pub error: Option<JobErrorSummary>,

    #[serde(default)]
    pub warnings: Vec<String>,

    pub cancel_requested: bool,
}

/// A single job log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub stage: String,
    pub text: String,
}

/// Incremental log response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub job_id: String,
    pub lines: Vec<LogLine>,

    /// Pass back as `since` to continue tailing
    pub next_since: u64,

    /// No further lines will be appended
    pub terminal: bool,
}

/// Cancellation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: String,

    /// `cancelled`, `pending`, `ignored` or `finished`
    pub outcome: String,

    pub state: String,
    pub message: String,
}
