//! In-memory job store

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::errors::PipelineError;
use crate::models::job::{ArchiveInfo, DeploymentJob, JobError};
use crate::models::log::{LogEntry, LogStage};
use crate::pipeline::fsm::{JobFsm, JobState};
use crate::store::{CancelOutcome, JobStore, Transition};

/// Job records held in memory
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, DeploymentJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore previously persisted jobs
    pub async fn restore(&self, jobs: Vec<DeploymentJob>) {
        let mut map = self.jobs.write().await;
        for job in jobs {
            map.insert(job.id.clone(), job);
        }
    }

    async fn with_job<T>(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut DeploymentJob) -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;
        f(job)
    }
}

fn push_log(job: &mut DeploymentJob, stage: LogStage, text: String) -> u64 {
    let seq = job.last_seq() + 1;
    job.logs.push(LogEntry {
        seq,
        timestamp: Utc::now(),
        stage,
        text,
    });
    seq
}

/// Apply a transition to a job record in place
pub(crate) fn apply_transition(
    job: &mut DeploymentJob,
    transition: Transition,
) -> Result<(), PipelineError> {
    let mut fsm = JobFsm::resume(job.state, job.progress);
    let next = fsm
        .process(transition.event.clone())
        .map_err(PipelineError::InvalidTransition)?;

    if transition.archive_location.is_some() && next != JobState::Succeeded {
        return Err(PipelineError::InvalidTransition(format!(
            "Archive location can only be set on success, not on {}",
            next
        )));
    }
    if next == JobState::Failed && transition.error.is_none() {
        return Err(PipelineError::InvalidTransition(
            "Failing a job requires an error".to_string(),
        ));
    }

    let now = Utc::now();
    if job.state == JobState::Queued && next != JobState::Failed {
        job.started_at = Some(now);
    }
    if next.is_terminal() {
        job.completed_at = Some(now);
    }
    if next == JobState::Failed {
        job.error = transition.error;
    }
    if next == JobState::Succeeded {
        job.archive_location = transition.archive_location;
    }

    job.state = fsm.state();
    job.progress = fsm.progress();
    push_log(job, transition.stage, transition.message);
    Ok(())
}

/// Flag or cancel a job in place
pub(crate) fn apply_cancel(job: &mut DeploymentJob) -> Result<CancelOutcome, PipelineError> {
    let outcome = match job.state {
        JobState::Queued => {
            let error = JobError::from_error(
                LogStage::Orchestrator,
                &PipelineError::Cancelled("cancelled before start".to_string()),
            );
            job.cancel_requested = true;
            apply_transition(job, Transition::fail(error, "Job cancelled before it started"))?;
            CancelOutcome::Cancelled
        }
        JobState::Resolving | JobState::Overriding | JobState::Building => {
            if !job.cancel_requested {
                job.cancel_requested = true;
                push_log(
                    job,
                    LogStage::Orchestrator,
                    "Cancellation requested; the job stops at the next stage checkpoint"
                        .to_string(),
                );
            }
            CancelOutcome::Pending
        }
        JobState::Deploying => {
            if !job.cancel_requested {
                job.cancel_requested = true;
                push_log(
                    job,
                    LogStage::Orchestrator,
                    "Cancellation requested during deployment; deployment continues".to_string(),
                );
            }
            CancelOutcome::Ignored
        }
        JobState::Succeeded | JobState::Failed => CancelOutcome::Finished,
    };
    Ok(outcome)
}

fn ensure_mutable(job: &DeploymentJob) -> Result<(), PipelineError> {
    if job.state.is_terminal() {
        return Err(PipelineError::InvalidTransition(format!(
            "Job {} is {} and can no longer change",
            job.id, job.state
        )));
    }
    Ok(())
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: DeploymentJob) -> Result<(), PipelineError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(PipelineError::StorageError(format!(
                "Job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<DeploymentJob, PipelineError> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))
    }

    async fn transition(
        &self,
        job_id: &str,
        transition: Transition,
    ) -> Result<DeploymentJob, PipelineError> {
        self.with_job(job_id, |job| {
            apply_transition(job, transition)?;
            Ok(job.clone())
        })
        .await
    }

    async fn append_log(
        &self,
        job_id: &str,
        stage: LogStage,
        text: String,
    ) -> Result<u64, PipelineError> {
        self.with_job(job_id, |job| {
            ensure_mutable(job)?;
            Ok(push_log(job, stage, text))
        })
        .await
    }

    async fn logs_since(&self, job_id: &str, since: u64) -> Result<Vec<LogEntry>, PipelineError> {
        let jobs = self.jobs.read().await;
        let job = jobs
            .get(job_id)
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;
        Ok(job.logs_since(since))
    }

    async fn record_artifact(
        &self,
        job_id: &str,
        archive: ArchiveInfo,
    ) -> Result<(), PipelineError> {
        self.with_job(job_id, |job| {
            ensure_mutable(job)?;
            job.built_archive = Some(archive);
            Ok(())
        })
        .await
    }

    async fn add_warning(&self, job_id: &str, warning: String) -> Result<(), PipelineError> {
        self.with_job(job_id, |job| {
            ensure_mutable(job)?;
            job.warnings.push(warning);
            Ok(())
        })
        .await
    }

    async fn request_cancel(
        &self,
        job_id: &str,
    ) -> Result<(CancelOutcome, DeploymentJob), PipelineError> {
        self.with_job(job_id, |job| {
            let outcome = apply_cancel(job)?;
            Ok((outcome, job.clone()))
        })
        .await
    }

    async fn list(&self) -> Result<Vec<DeploymentJob>, PipelineError> {
        let mut jobs: Vec<DeploymentJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{JobRequest, Strategy};
    use crate::pipeline::fsm::JobEvent;

    fn request() -> JobRequest {
        JobRequest {
            project_id: "shop".to_string(),
            branch: "main".to_string(),
            version: "1.0.0".to_string(),
            environment_id: None,
            strategy: Strategy::Diff,
            base_commit: "a1".to_string(),
            head_commit: "b2".to_string(),
            apply_overrides: false,
            files: None,
            production_confirmation: None,
        }
    }

    async fn store_with_job() -> (MemoryJobStore, String) {
        let store = MemoryJobStore::new();
        let job = DeploymentJob::new(request());
        let id = job.id.clone();
        store.insert(job).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_transition_updates_state_progress_and_log_together() {
        let (store, id) = store_with_job().await;

        let job = store
            .transition(&id, Transition::new(JobEvent::Start, LogStage::Orchestrator, "started"))
            .await
            .unwrap();

        assert_eq!(job.state, JobState::Resolving);
        assert_eq!(job.progress, 20);
        assert!(job.started_at.is_some());
        assert_eq!(job.logs.last().unwrap().text, "started");
        assert_eq!(job.logs.last().unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_archive_location_only_on_success() {
        let (store, id) = store_with_job().await;
        store
            .transition(&id, Transition::new(JobEvent::Start, LogStage::Orchestrator, "started"))
            .await
            .unwrap();

        let early = Transition::new(
            JobEvent::Resolved { apply_overrides: false },
            LogStage::Diff,
            "resolved",
        )
        .with_archive_location("/tmp/a.zip");
        assert!(store.transition(&id, early).await.is_err());

        let job = store.get(&id).await.unwrap();
        assert_eq!(job.state, JobState::Resolving);
        assert!(job.archive_location.is_none());
    }

    #[tokio::test]
    async fn test_terminal_jobs_are_immutable() {
        let (store, id) = store_with_job().await;
        let (outcome, job) = store.request_cancel(&id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);
        assert_eq!(job.state, JobState::Failed);

        assert!(store
            .append_log(&id, LogStage::Orchestrator, "late".to_string())
            .await
            .is_err());
        assert!(store
            .transition(&id, Transition::new(JobEvent::Start, LogStage::Orchestrator, "start"))
            .await
            .is_err());

        let (outcome, _) = store.request_cancel(&id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Finished);
    }

    #[tokio::test]
    async fn test_logs_since_is_incremental() {
        let (store, id) = store_with_job().await;
        for i in 0..5 {
            store
                .append_log(&id, LogStage::Build, format!("line {i}"))
                .await
                .unwrap();
        }
        let tail = store.logs_since(&id, 3).await.unwrap();
        assert_eq!(tail.iter().map(|l| l.seq).collect::<Vec<_>>(), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let store = MemoryJobStore::new();
        assert!(matches!(
            store.get("missing").await,
            Err(PipelineError::JobNotFound(_))
        ));
    }
}
