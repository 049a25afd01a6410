//! Job store
//!
//! Durable record of jobs, their state, progress and logs. All writes go
//! through [`JobStore`] so that state, progress and the matching log line
//! change together and readers only ever see consistent snapshots.

pub mod memory;
pub mod persistent;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::PipelineError;
use crate::models::job::{ArchiveInfo, DeploymentJob, JobError};
use crate::models::log::{LogEntry, LogStage};
use crate::pipeline::fsm::JobEvent;

pub use memory::MemoryJobStore;
pub use persistent::PersistentJobStore;

/// A state change applied atomically with its log line
#[derive(Debug, Clone)]
pub struct Transition {
    pub event: JobEvent,
    pub stage: LogStage,
    pub message: String,

    /// Recorded when the event is [`JobEvent::Fail`]
    pub error: Option<JobError>,

    /// Recorded when the transition enters `Succeeded`
    pub archive_location: Option<String>,
}

impl Transition {
    pub fn new(event: JobEvent, stage: LogStage, message: impl Into<String>) -> Self {
        Self {
            event,
            stage,
            message: message.into(),
            error: None,
            archive_location: None,
        }
    }

    pub fn fail(error: JobError, message: impl Into<String>) -> Self {
        Self {
            event: JobEvent::Fail,
            stage: error.stage,
            message: message.into(),
            error: Some(error),
            archive_location: None,
        }
    }

    pub fn with_archive_location(mut self, location: impl Into<String>) -> Self {
        self.archive_location = Some(location.into());
        self
    }
}

/// Result of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Job was still queued and will never start
    Cancelled,

    /// Job stops at its next stage checkpoint
    Pending,

    /// Job is deploying; the request is recorded but has no effect
    Ignored,

    /// Job had already finished
    Finished,
}

impl CancelOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelOutcome::Cancelled => "cancelled",
            CancelOutcome::Pending => "pending",
            CancelOutcome::Ignored => "ignored",
            CancelOutcome::Finished => "finished",
        }
    }
}

/// Durable job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a newly submitted job
    async fn insert(&self, job: DeploymentJob) -> Result<(), PipelineError>;

    /// Latest snapshot of a job, including its log
    async fn get(&self, job_id: &str) -> Result<DeploymentJob, PipelineError>;

    /// Advance the job's state machine and append the transition's log line
    async fn transition(
        &self,
        job_id: &str,
        transition: Transition,
    ) -> Result<DeploymentJob, PipelineError>;

    /// Append a log line, returning its sequence number
    async fn append_log(
        &self,
        job_id: &str,
        stage: LogStage,
        text: String,
    ) -> Result<u64, PipelineError>;

    /// Log lines with a sequence number greater than `since`
    async fn logs_since(&self, job_id: &str, since: u64) -> Result<Vec<LogEntry>, PipelineError>;

    /// Record the archive produced by the build stage
    async fn record_artifact(
        &self,
        job_id: &str,
        archive: ArchiveInfo,
    ) -> Result<(), PipelineError>;

    /// Attach a non-fatal warning to the job
    async fn add_warning(&self, job_id: &str, warning: String) -> Result<(), PipelineError>;

    /// Cancel a queued job outright, or flag a running one
    async fn request_cancel(
        &self,
        job_id: &str,
    ) -> Result<(CancelOutcome, DeploymentJob), PipelineError>;

    /// All jobs, oldest first
    async fn list(&self) -> Result<Vec<DeploymentJob>, PipelineError>;
}

/// Appends job log lines for one stage and mirrors them to tracing
#[derive(Clone)]
pub struct StageLogger {
    store: Arc<dyn JobStore>,
    job_id: String,
    stage: LogStage,
}

impl StageLogger {
    pub fn new(store: Arc<dyn JobStore>, job_id: impl Into<String>, stage: LogStage) -> Self {
        Self {
            store,
            job_id: job_id.into(),
            stage,
        }
    }

    /// Same job, different stage
    pub fn for_stage(&self, stage: LogStage) -> Self {
        Self {
            store: self.store.clone(),
            job_id: self.job_id.clone(),
            stage,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Append a line; store failures are logged, never propagated
    pub async fn line(&self, text: impl Into<String>) {
        let text = text.into();
        info!(job_id = %self.job_id, stage = %self.stage, "{}", text);
        if let Err(e) = self.store.append_log(&self.job_id, self.stage, text).await {
            warn!(job_id = %self.job_id, "Failed to append job log: {}", e);
        }
    }
}
