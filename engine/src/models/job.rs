//! Deployment job models

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, PipelineError};
use crate::models::change::{validate_relative_path, ChangeKind};
use crate::models::log::{LogEntry, LogStage};
use crate::pipeline::fsm::JobState;
use crate::utils::new_job_id;

/// Which files go into the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// The entire head tree
    Full,

    /// Only files changed between base and head
    Diff,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Full => "full",
            Strategy::Diff => "diff",
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(Strategy::Full),
            "diff" => Ok(Strategy::Diff),
            _ => Err(PipelineError::ValidationError(format!(
                "Invalid strategy: {}",
                s
            ))),
        }
    }
}

/// A file named explicitly in the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedFile {
    pub path: String,
    pub status: ChangeKind,
}

/// Sign-off required for production-flagged environments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionConfirmation {
    pub confirmed_by: String,
    pub strategy: Strategy,
    pub apply_overrides: bool,
}

/// A validated job submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub project_id: String,
    pub branch: String,
    pub version: String,
    pub environment_id: Option<String>,
    pub strategy: Strategy,
    pub base_commit: String,
    pub head_commit: String,
    pub apply_overrides: bool,
    pub files: Option<Vec<RequestedFile>>,
    pub production_confirmation: Option<ProductionConfirmation>,
}

impl JobRequest {
    /// Check the request before it is accepted
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (name, value) in [
            ("project_id", &self.project_id),
            ("branch", &self.branch),
            ("version", &self.version),
            ("base_commit", &self.base_commit),
            ("head_commit", &self.head_commit),
        ] {
            if value.trim().is_empty() {
                return Err(PipelineError::ValidationError(format!(
                    "{} must not be empty",
                    name
                )));
            }
        }

        // The version becomes part of the archive path
        if !self
            .version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
            || self.version.starts_with('.')
        {
            return Err(PipelineError::ValidationError(format!(
                "Invalid version string: {}",
                self.version
            )));
        }

        if self.apply_overrides && self.environment_id.is_none() {
            return Err(PipelineError::ValidationError(
                "apply_overrides requires an environment_id".to_string(),
            ));
        }

        if let Some(files) = &self.files {
            let mut seen = HashSet::new();
            for file in files {
                validate_relative_path(&file.path)?;
                if !seen.insert(file.path.as_str()) {
                    return Err(PipelineError::ValidationError(format!(
                        "Duplicate file path: {}",
                        file.path
                    )));
                }
            }
        }

        Ok(())
    }

    /// Build-only jobs have no target environment
    pub fn is_build_only(&self) -> bool {
        self.environment_id.is_none()
    }
}

impl TryFrom<jobs_api::SubmitJobRequest> for JobRequest {
    type Error = PipelineError;

    fn try_from(req: jobs_api::SubmitJobRequest) -> Result<Self, Self::Error> {
        let files = req
            .files
            .map(|files| {
                files
                    .into_iter()
                    .map(|f| {
                        Ok(RequestedFile {
                            status: f.status.parse()?,
                            path: f.path,
                        })
                    })
                    .collect::<Result<Vec<_>, PipelineError>>()
            })
            .transpose()?;

        let production_confirmation = req
            .production_confirmation
            .map(|c| {
                Ok::<_, PipelineError>(ProductionConfirmation {
                    confirmed_by: c.confirmed_by,
                    strategy: c.strategy.parse()?,
                    apply_overrides: c.apply_overrides,
                })
            })
            .transpose()?;

        let request = JobRequest {
            project_id: req.project_id,
            branch: req.branch,
            version: req.version,
            environment_id: req.environment_id.filter(|id| !id.trim().is_empty()),
            strategy: req.strategy.parse()?,
            base_commit: req.base_commit,
            head_commit: req.head_commit,
            apply_overrides: req.apply_overrides,
            files,
            production_confirmation,
        };
        request.validate()?;
        Ok(request)
    }
}

/// Packaged archive metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub location: String,
    pub digest: String,
    pub size_bytes: u64,
    pub file_count: usize,
}

/// Terminal error recorded on a failed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub stage: LogStage,
    pub message: String,
    pub retryable: bool,
}

impl JobError {
    pub fn from_error(stage: LogStage, err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            stage,
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// One run of the build-and-deploy pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentJob {
    pub id: String,
    pub request: JobRequest,
    pub state: JobState,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Set exactly once, on entering `Succeeded`
    pub archive_location: Option<String>,

    /// Archive produced by the build stage, kept after a failed deploy
    pub built_archive: Option<ArchiveInfo>,

    pub error: Option<JobError>,

    #[serde(default)]
    pub warnings: Vec<String>,

    #[serde(default)]
    pub cancel_requested: bool,

    /// Stored separately by persistent stores
    #[serde(skip)]
    pub logs: Vec<LogEntry>,
}

impl DeploymentJob {
    /// Create a queued job for a validated request
    pub fn new(request: JobRequest) -> Self {
        Self {
            id: new_job_id(),
            request,
            state: JobState::Queued,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            archive_location: None,
            built_archive: None,
            error: None,
            warnings: Vec::new(),
            cancel_requested: false,
            logs: Vec::new(),
        }
    }

    /// Sequence number of the last log line, 0 when empty
    pub fn last_seq(&self) -> u64 {
        self.logs.last().map(|l| l.seq).unwrap_or(0)
    }

    /// Log lines appended after `since`
    pub fn logs_since(&self, since: u64) -> Vec<LogEntry> {
        // seq starts at 1 and is dense, so it doubles as an index
        let start = (since as usize).min(self.logs.len());
        self.logs[start..].to_vec()
    }
}

impl From<&ArchiveInfo> for jobs_api::ArchiveSummary {
    fn from(info: &ArchiveInfo) -> Self {
        jobs_api::ArchiveSummary {
            location: info.location.clone(),
            digest: info.digest.clone(),
            size_bytes: info.size_bytes,
            file_count: info.file_count,
        }
    }
}

impl From<&DeploymentJob> for jobs_api::JobStatusResponse {
    fn from(job: &DeploymentJob) -> Self {
        jobs_api::JobStatusResponse {
            job_id: job.id.clone(),
            project_id: job.request.project_id.clone(),
            branch: job.request.branch.clone(),
            version: job.request.version.clone(),
            environment_id: job.request.environment_id.clone(),
            strategy: job.request.strategy.as_str().to_string(),
            state: job.state.as_str().to_string(),
            progress: job.progress,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            archive_location: job.archive_location.clone(),
            built_archive: job.built_archive.as_ref().map(Into::into),
            error: job.error.as_ref().map(|e| jobs_api::JobErrorSummary {
                kind: e.kind.as_str().to_string(),
                stage: e.stage.as_str().to_string(),
                message: e.message.clone(),
                retryable: e.retryable,
            }),
            warnings: job.warnings.clone(),
            cancel_requested: job.cancel_requested,
        }
    }
}
