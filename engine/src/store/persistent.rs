//! File-backed job store
//!
//! One `<id>.json` record per job plus an append-only `<id>.log.jsonl`.
//! Reads are served from memory; every mutation is written through before
//! the call returns.

use std::future::Future;

use async_trait::async_trait;
use futures::future::try_join_all;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::errors::PipelineError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::job::{ArchiveInfo, DeploymentJob, JobError};
use crate::models::log::{LogEntry, LogStage};
use crate::store::memory::{apply_transition, MemoryJobStore};
use crate::store::{CancelOutcome, JobStore, Transition};

const RECORD_SUFFIX: &str = ".json";
const LOG_SUFFIX: &str = ".log.jsonl";

pub struct PersistentJobStore {
    dir: Dir,
    inner: MemoryJobStore,

    /// Serializes mutations so records hit the disk in the order applied
    write_lock: Mutex<()>,
}

impl PersistentJobStore {
    /// Open the store, reloading every job found in `dir`.
    ///
    /// Jobs that were still running when the process stopped are failed
    /// with `Interrupted`; nothing resumes them.
    pub async fn open(dir: Dir) -> Result<Self, PipelineError> {
        dir.create().await?;

        let mut jobs: Vec<DeploymentJob> = Vec::new();
        for path in dir.list_files_with_suffix(RECORD_SUFFIX).await? {
            match File::new(&path).read_json().await {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping unreadable job record {}: {}", path.display(), e),
            }
        }

        let logs = try_join_all(
            jobs.iter().map(|job| Self::load_log(Self::log_file(&dir, &job.id))),
        )
        .await?;
        for (job, lines) in jobs.iter_mut().zip(logs) {
            job.logs = lines;
        }

        let store = Self {
            dir,
            inner: MemoryJobStore::new(),
            write_lock: Mutex::new(()),
        };

        let mut interrupted = Vec::new();
        for job in jobs.iter_mut() {
            if job.state.is_terminal() {
                continue;
            }
            let before = job.last_seq();
            let err = PipelineError::Interrupted(format!(
                "engine stopped while the job was {}",
                job.state
            ));
            let error = JobError::from_error(job.state.stage(), &err);
            apply_transition(job, Transition::fail(error, "Job interrupted by an engine restart"))?;
            interrupted.push((job.clone(), before));
        }

        info!(
            "Loaded {} job(s) from {}, {} interrupted",
            jobs.len(),
            store.dir.path().display(),
            interrupted.len()
        );
        store.inner.restore(jobs).await;

        for (job, before) in interrupted {
            store.write_through(&job, before).await?;
        }

        Ok(store)
    }

    /// Read a job log back as a dense `1..=n` sequence.
    ///
    /// Unparseable lines are dropped. A line whose seq was already seen
    /// replaces that line and everything after it, since it was written
    /// after a failed write was rolled back. The file is rewritten when
    /// anything was dropped so later appends land on a clean line.
    async fn load_log(file: File) -> Result<Vec<LogEntry>, PipelineError> {
        let lines = file.read_json_lines::<LogEntry>().await?;
        let read = lines.values.len();

        let mut entries: Vec<LogEntry> = Vec::with_capacity(read);
        let mut gaps = 0;
        for entry in lines.values {
            let next = entries.len() as u64 + 1;
            if entry.seq == 0 || entry.seq > next {
                gaps += 1;
                continue;
            }
            entries.truncate(entry.seq as usize - 1);
            entries.push(entry);
        }

        if lines.malformed > 0 || entries.len() != read {
            warn!(
                "Repairing job log {}: {} malformed, {} out of sequence, {} superseded",
                file.path().display(),
                lines.malformed,
                gaps,
                read - gaps - entries.len()
            );
            file.write_json_lines(&entries).await?;
        }
        Ok(entries)
    }

    fn record_file(dir: &Dir, job_id: &str) -> File {
        dir.file(&format!("{}{}", job_id, RECORD_SUFFIX))
    }

    fn log_file(dir: &Dir, job_id: &str) -> File {
        dir.file(&format!("{}{}", job_id, LOG_SUFFIX))
    }

    /// Write the record and any log lines after `persisted_seq`
    async fn write_through(
        &self,
        job: &DeploymentJob,
        persisted_seq: u64,
    ) -> Result<(), PipelineError> {
        let log = Self::log_file(&self.dir, &job.id);
        for entry in job.logs_since(persisted_seq) {
            log.append_json_line(&entry).await?;
        }
        Self::record_file(&self.dir, &job.id).write_json(job).await
    }

    /// Await a mutation of the in-memory store, then persist its effect.
    /// A failed write restores the record as it was before `op`.
    ///
    /// `op` must not have been polled yet; it runs under the write lock.
    async fn mutate<T>(
        &self,
        job_id: &str,
        op: impl Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.inner.get(job_id).await?;
        let result = op.await?;
        let job = self.inner.get(job_id).await?;
        if let Err(e) = self.write_through(&job, snapshot.last_seq()).await {
            warn!(job_id = %job_id, "Job write failed, keeping the previous record: {}", e);
            self.inner.restore(vec![snapshot]).await;
            return Err(e);
        }
        Ok(result)
    }
}

#[async_trait]
impl JobStore for PersistentJobStore {
    async fn insert(&self, job: DeploymentJob) -> Result<(), PipelineError> {
        let _guard = self.write_lock.lock().await;
        self.write_through(&job, 0).await?;
        self.inner.insert(job).await
    }

    async fn get(&self, job_id: &str) -> Result<DeploymentJob, PipelineError> {
        self.inner.get(job_id).await
    }

    async fn transition(
        &self,
        job_id: &str,
        transition: Transition,
    ) -> Result<DeploymentJob, PipelineError> {
        self.mutate(job_id, self.inner.transition(job_id, transition)).await
    }

    async fn append_log(
        &self,
        job_id: &str,
        stage: LogStage,
        text: String,
    ) -> Result<u64, PipelineError> {
        self.mutate(job_id, self.inner.append_log(job_id, stage, text)).await
    }

    async fn logs_since(&self, job_id: &str, since: u64) -> Result<Vec<LogEntry>, PipelineError> {
        self.inner.logs_since(job_id, since).await
    }

    async fn record_artifact(
        &self,
        job_id: &str,
        archive: ArchiveInfo,
    ) -> Result<(), PipelineError> {
        self.mutate(job_id, self.inner.record_artifact(job_id, archive)).await
    }

    async fn add_warning(&self, job_id: &str, warning: String) -> Result<(), PipelineError> {
        self.mutate(job_id, self.inner.add_warning(job_id, warning)).await
    }

    async fn request_cancel(
        &self,
        job_id: &str,
    ) -> Result<(CancelOutcome, DeploymentJob), PipelineError> {
        self.mutate(job_id, self.inner.request_cancel(job_id)).await
    }

    async fn list(&self) -> Result<Vec<DeploymentJob>, PipelineError> {
        self.inner.list().await
    }
}
