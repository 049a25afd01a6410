//! Job orchestrator
//!
//! Accepts job requests, queues them, and drives each job through the diff,
//! override, build and deploy stages. Every state change goes through the
//! job store together with its log line.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::errors::{ErrorKind, PipelineError};
use crate::models::change::FileChange;
use crate::models::job::{ArchiveInfo, DeploymentJob, JobError, JobRequest, Strategy};
use crate::models::log::{LogEntry, LogStage};
use crate::pipeline::archive::ArchiveBuilder;
use crate::pipeline::deployer::{DeployPolicy, Deployer};
use crate::pipeline::diff::DiffResolver;
use crate::pipeline::fsm::{JobEvent, JobState};
use crate::pipeline::overrides::OverrideApplier;
use crate::storage::settings::{Settings, SettingsStore};
use crate::store::{CancelOutcome, JobStore, StageLogger, Transition};

/// Ids of submitted jobs waiting for a worker
pub struct JobQueue {
    receiver: mpsc::UnboundedReceiver<String>,
}

impl JobQueue {
    /// Next queued job id, `None` once every sender is gone
    pub async fn next(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

/// The stage components a job runs through
pub struct Stages {
    pub resolver: DiffResolver,
    pub applier: OverrideApplier,
    pub builder: ArchiveBuilder,
    pub deployer: Deployer,
}

/// A stage error together with the stage it came from
#[derive(Debug)]
struct StageFailure {
    stage: LogStage,
    error: PipelineError,
}

impl StageFailure {
    fn at(stage: LogStage) -> impl FnOnce(PipelineError) -> Self {
        move |error| Self { stage, error }
    }
}

pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    settings: Arc<SettingsStore>,
    stages: Stages,
    queue: mpsc::UnboundedSender<String>,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        settings: Arc<SettingsStore>,
        stages: Stages,
    ) -> (Arc<Self>, JobQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let orchestrator = Arc::new(Self {
            store,
            settings,
            stages,
            queue: sender,
        });
        (orchestrator, JobQueue { receiver })
    }

    /// Validate and persist a request, then queue it. Returns immediately.
    pub async fn submit(&self, request: JobRequest) -> Result<DeploymentJob, PipelineError> {
        request.validate()?;

        let accepted = describe_request(&request);
        let job = DeploymentJob::new(request);
        let job_id = job.id.clone();
        self.store.insert(job).await?;
        self.store
            .append_log(&job_id, LogStage::Orchestrator, accepted)
            .await?;

        if self.queue.send(job_id.clone()).is_err() {
            let err = PipelineError::ShutdownError("job dispatcher is not running".to_string());
            let error = JobError::from_error(LogStage::Orchestrator, &err);
            self.store
                .transition(&job_id, Transition::fail(error, "Job could not be queued"))
                .await?;
            return Err(err);
        }

        info!(job_id = %job_id, "Job queued");
        self.store.get(&job_id).await
    }

    /// Latest snapshot of a job
    pub async fn status(&self, job_id: &str) -> Result<DeploymentJob, PipelineError> {
        self.store.get(job_id).await
    }

    /// Log lines appended after `since`
    pub async fn logs(&self, job_id: &str, since: u64) -> Result<Vec<LogEntry>, PipelineError> {
        self.store.logs_since(job_id, since).await
    }

    pub async fn cancel(
        &self,
        job_id: &str,
    ) -> Result<(CancelOutcome, DeploymentJob), PipelineError> {
        let (outcome, job) = self.store.request_cancel(job_id).await?;
        info!(job_id = %job_id, "Cancellation requested: {}", outcome.as_str());
        Ok((outcome, job))
    }

    /// Run a queued job to a terminal state
    pub async fn execute(&self, job_id: &str) {
        if let Err(e) = self.run(job_id).await {
            error!(job_id = %job_id, "Job execution aborted: {}", e);
        }
    }

    async fn run(&self, job_id: &str) -> Result<(), PipelineError> {
        let job = self.store.get(job_id).await?;
        if job.state != JobState::Queued {
            debug!(job_id = %job_id, "Skipping job in state {}", job.state);
            return Ok(());
        }

        // One settings snapshot for the whole run
        let settings = self.settings.snapshot().await;
        let start = Transition::new(
            JobEvent::Start,
            LogStage::Orchestrator,
            format!("Job started with settings version {}", settings.version),
        );
        match self.store.transition(job_id, start).await {
            Ok(_) => {}
            // cancelled between dequeue and start
            Err(PipelineError::InvalidTransition(_)) => return Ok(()),
            Err(e) => return Err(e),
        }

        let log = StageLogger::new(self.store.clone(), job_id, LogStage::Orchestrator);
        match self.run_stages(&job.request, &settings.settings, &log).await {
            Ok(()) => Ok(()),
            Err(failure) => self.fail(job_id, failure).await,
        }
    }

    async fn run_stages(
        &self,
        request: &JobRequest,
        settings: &Settings,
        log: &StageLogger,
    ) -> Result<(), StageFailure> {
        let job_id = log.job_id();

        // Resolving
        let changes = self
            .stages
            .resolver
            .resolve(
                request,
                settings.pipeline.max_changed_files,
                &log.for_stage(LogStage::Diff),
            )
            .await
            .map_err(StageFailure::at(LogStage::Diff))?;
        let next = if request.apply_overrides { "override" } else { "build" };
        self.checkpoint(job_id, next).await?;
        self.advance(
            job_id,
            Transition::new(
                JobEvent::Resolved {
                    apply_overrides: request.apply_overrides,
                },
                LogStage::Diff,
                format!("Resolved {} change(s)", changes.len()),
            ),
        )
        .await?;

        // Overriding
        let changes = if request.apply_overrides {
            self.apply_overrides(request, changes, log).await?
        } else {
            changes
        };

        // Building
        let build_only = request.is_build_only();
        let archive = self
            .stages
            .builder
            .build(
                &changes,
                &request.version,
                request.strategy,
                build_only,
                &log.for_stage(LogStage::Build),
            )
            .await
            .map_err(StageFailure::at(LogStage::Build))?;
        self.store
            .record_artifact(job_id, archive.clone())
            .await
            .map_err(StageFailure::at(LogStage::Build))?;
        if archive.file_count == 0 && request.strategy == Strategy::Diff {
            self.store
                .add_warning(
                    job_id,
                    format!(
                        "{}: no files selected, the archive only holds the manifest",
                        ErrorKind::EmptyChangeSet
                    ),
                )
                .await
                .map_err(StageFailure::at(LogStage::Build))?;
        }

        if build_only {
            self.advance(
                job_id,
                Transition::new(
                    JobEvent::Built { deploy: false },
                    LogStage::Build,
                    "Build-only job finished",
                )
                .with_archive_location(archive.location.clone()),
            )
            .await?;
            return Ok(());
        }

        self.checkpoint(job_id, "deploy").await?;
        self.deploy(request, &archive, settings, log).await
    }

    async fn apply_overrides(
        &self,
        request: &JobRequest,
        changes: Vec<FileChange>,
        log: &StageLogger,
    ) -> Result<Vec<FileChange>, StageFailure> {
        let job_id = log.job_id();
        let environment_id = request.environment_id.as_deref().ok_or_else(|| StageFailure {
            stage: LogStage::Override,
            error: PipelineError::ValidationError(
                "apply_overrides requires an environment".to_string(),
            ),
        })?;

        let changes = self
            .stages
            .applier
            .apply(
                &changes,
                environment_id,
                request.strategy,
                &log.for_stage(LogStage::Override),
            )
            .await
            .map_err(StageFailure::at(LogStage::Override))?;
        self.checkpoint(job_id, "build").await?;
        self.advance(
            job_id,
            Transition::new(
                JobEvent::OverridesApplied,
                LogStage::Override,
                format!("{} change(s) after overrides", changes.len()),
            ),
        )
        .await?;
        Ok(changes)
    }

    /// Hold the environment lock for the whole deploying stage, including
    /// the terminal transition
    async fn deploy(
        &self,
        request: &JobRequest,
        archive: &ArchiveInfo,
        settings: &Settings,
        log: &StageLogger,
    ) -> Result<(), StageFailure> {
        let job_id = log.job_id();
        let deploy_log = log.for_stage(LogStage::Deploy);
        let environment_id = request.environment_id.clone().unwrap_or_default();

        let _guard = self
            .stages
            .deployer
            .locks()
            .acquire(&environment_id, &deploy_log)
            .await;
        self.checkpoint(job_id, "deploy").await?;

        self.advance(
            job_id,
            Transition::new(
                JobEvent::Built { deploy: true },
                LogStage::Build,
                format!("Archive {} built", archive.digest),
            ),
        )
        .await?;

        let policy = DeployPolicy::from(&settings.pipeline);
        let result = self
            .stages
            .deployer
            .deploy(job_id, request, archive, &policy, &deploy_log)
            .await;

        let cancel_requested = self
            .store
            .get(job_id)
            .await
            .map(|job| job.cancel_requested)
            .unwrap_or(false);
        if cancel_requested {
            log.line("Cancellation requested during deployment was ignored")
                .await;
        }

        match result {
            Ok(_) => {
                self.advance(
                    job_id,
                    Transition::new(JobEvent::Deployed, LogStage::Deploy, "Job succeeded")
                        .with_archive_location(archive.location.clone()),
                )
                .await
            }
            Err(error) => {
                let failure = StageFailure {
                    stage: LogStage::Deploy,
                    error,
                };
                self.fail(job_id, failure)
                    .await
                    .map_err(StageFailure::at(LogStage::Orchestrator))
            }
        }
    }

    /// Stop between stages when cancellation was requested
    async fn checkpoint(&self, job_id: &str, next: &str) -> Result<(), StageFailure> {
        let job = self
            .store
            .get(job_id)
            .await
            .map_err(StageFailure::at(LogStage::Orchestrator))?;
        if job.cancel_requested {
            return Err(StageFailure {
                stage: LogStage::Orchestrator,
                error: PipelineError::Cancelled(format!(
                    "stopped before the {} stage",
                    next
                )),
            });
        }
        Ok(())
    }

    async fn advance(&self, job_id: &str, transition: Transition) -> Result<(), StageFailure> {
        self.store
            .transition(job_id, transition)
            .await
            .map(|_| ())
            .map_err(StageFailure::at(LogStage::Orchestrator))
    }

    async fn fail(&self, job_id: &str, failure: StageFailure) -> Result<(), PipelineError> {
        let StageFailure { stage, error } = failure;
        let job_error = JobError::from_error(stage, &error);
        error!(job_id = %job_id, stage = %stage, kind = %job_error.kind, "Job failed: {}", error);

        let message = match &error {
            PipelineError::Cancelled(_) => format!("Job cancelled: {}", error),
            _ => format!("{} stage failed: {}", stage, error),
        };
        self.store
            .transition(job_id, Transition::fail(job_error, message))
            .await
            .map(|_| ())
    }
}

fn describe_request(request: &JobRequest) -> String {
    let target = request
        .environment_id
        .as_deref()
        .map(|env| format!("environment {}", env))
        .unwrap_or_else(|| "build only".to_string());
    let range = match &request.files {
        Some(files) => format!("{} explicit file(s)", files.len()),
        None => format!("{}..{}", request.base_commit, request.head_commit),
    };
    format!(
        "Job accepted: {} {} version {} ({} strategy, {}, {}, overrides {})",
        request.project_id,
        request.branch,
        request.version,
        request.strategy.as_str(),
        range,
        target,
        if request.apply_overrides { "on" } else { "off" }
    )
}
