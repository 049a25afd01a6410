//! Shared fakes and a wired-up engine for integration tests

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use jarsmith::catalog::{MemoryEnvironmentDirectory, MemoryOverrideStore};
use jarsmith::errors::PipelineError;
use jarsmith::filesys::dir::Dir;
use jarsmith::models::change::ChangeKind;
use jarsmith::models::environment::Environment;
use jarsmith::models::job::{DeploymentJob, JobRequest, Strategy};
use jarsmith::models::overrides::{FileOverride, OverrideFileType};
use jarsmith::pipeline::archive::ArchiveBuilder;
use jarsmith::pipeline::deployer::{ArchiveTransport, DeployReceipt, DeployRequest, Deployer};
use jarsmith::pipeline::diff::{DiffResolver, RepositoryDiffProvider};
use jarsmith::pipeline::orchestrator::{JobOrchestrator, JobQueue, Stages};
use jarsmith::pipeline::overrides::OverrideApplier;
use jarsmith::storage::settings::{Settings, SettingsStore};
use jarsmith::store::{JobStore, MemoryJobStore, StageLogger};
use jarsmith::workers::dispatcher;

// ================================ REPOSITORY ===================================== //

/// Commits as flat trees, branches as names pointing at commits
#[derive(Default)]
pub struct MemoryRepository {
    commits: HashMap<String, BTreeMap<String, Vec<u8>>>,
    branches: HashMap<String, String>,
    delay: Duration,
}

impl MemoryRepository {
    /// `a1` holds three sources and a config; `b2` modifies all three
    /// sources and `main` points at `b2`
    pub fn shop() -> Self {
        let mut repo = Self::default();
        repo.commit(
            "a1",
            &[
                ("src/Cart.java", "class Cart { v1 }"),
                ("src/Order.java", "class Order { v1 }"),
                ("src/Pay.java", "class Pay { v1 }"),
                ("conf/proxy.conf", "upstream app { server 127.0.0.1; }"),
            ],
        );
        repo.commit(
            "b2",
            &[
                ("src/Cart.java", "class Cart { v2 }"),
                ("src/Order.java", "class Order { v2 }"),
                ("src/Pay.java", "class Pay { v2 }"),
                ("conf/proxy.conf", "upstream app { server 127.0.0.1; }"),
            ],
        );
        repo.branches.insert("main".to_string(), "b2".to_string());
        repo
    }

    pub fn commit(&mut self, id: &str, files: &[(&str, &str)]) {
        let tree = files
            .iter()
            .map(|(path, content)| (path.to_string(), content.as_bytes().to_vec()))
            .collect();
        self.commits.insert(id.to_string(), tree);
    }

    /// Slow down diff computation so tests can act while a job is resolving
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn tree(&self, commit: &str) -> Result<&BTreeMap<String, Vec<u8>>, PipelineError> {
        self.commits
            .get(commit)
            .ok_or_else(|| PipelineError::InvalidReference(commit.to_string()))
    }
}

#[async_trait]
impl RepositoryDiffProvider for MemoryRepository {
    async fn resolve_commit(&self, _: &str, rev: &str) -> Result<String, PipelineError> {
        if let Some(commit) = self.branches.get(rev) {
            return Ok(commit.clone());
        }
        self.tree(rev).map(|_| rev.to_string())
    }

    async fn changed_paths(
        &self,
        _: &str,
        base: &str,
        head: &str,
    ) -> Result<Vec<(String, ChangeKind)>, PipelineError> {
        tokio::time::sleep(self.delay).await;
        let base = self.tree(base)?;
        let head = self.tree(head)?;

        let mut changed = Vec::new();
        for (path, content) in head {
            match base.get(path) {
                None => changed.push((path.clone(), ChangeKind::Added)),
                Some(old) if old != content => changed.push((path.clone(), ChangeKind::Modified)),
                Some(_) => {}
            }
        }
        for path in base.keys().filter(|p| !head.contains_key(*p)) {
            changed.push((path.clone(), ChangeKind::Deleted));
        }
        Ok(changed)
    }

    async fn read_file(
        &self,
        _: &str,
        commit: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, PipelineError> {
        Ok(self.tree(commit)?.get(path).cloned())
    }

    async fn patch(
        &self,
        _: &str,
        base: &str,
        head: &str,
        path: &str,
    ) -> Result<Option<String>, PipelineError> {
        Ok(Some(format!("--- {base}:{path}\n+++ {head}:{path}\n")))
    }

    async fn list_tree(&self, _: &str, commit: &str) -> Result<Vec<String>, PipelineError> {
        Ok(self.tree(commit)?.keys().cloned().collect())
    }
}

// ================================ TRANSPORT ===================================== //

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Accept,
    Reject,
}

/// Records every deploy call and how many ran at once
pub struct RecordingTransport {
    mode: TransportMode,
    delay: Duration,
    calls: Mutex<Vec<DeployRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingTransport {
    pub fn new(mode: TransportMode, delay: Duration) -> Self {
        Self {
            mode,
            delay,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> Vec<DeployRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveTransport for RecordingTransport {
    async fn deploy(
        &self,
        request: &DeployRequest,
        log: &StageLogger,
    ) -> Result<DeployReceipt, PipelineError> {
        self.calls.lock().unwrap().push(request.clone());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        log.line("[upload] archive received").await;
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.mode {
            TransportMode::Accept => Ok(DeployReceipt {
                status_lines: 1,
                message: "activated".to_string(),
            }),
            TransportMode::Reject => Err(PipelineError::DeployRejected(
                "archive failed verification".to_string(),
            )),
        }
    }
}

// ================================= ENGINE ====================================== //

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.pipeline.worker_pool_size = 4;
    settings.pipeline.retry_count = 1;
    settings.pipeline.retry_base_delay_ms = 1;
    settings.pipeline.retry_max_delay_ms = 5;
    settings
}

pub fn request(base: &str, head: &str, environment: Option<&str>) -> JobRequest {
    JobRequest {
        project_id: "shop".to_string(),
        branch: "main".to_string(),
        version: "2.1.0".to_string(),
        environment_id: environment.map(str::to_string),
        strategy: Strategy::Diff,
        base_commit: base.to_string(),
        head_commit: head.to_string(),
        apply_overrides: false,
        files: None,
        production_confirmation: None,
    }
}

pub fn proxy_override(environment: &str, path: &str, content: &str) -> FileOverride {
    FileOverride {
        environment_id: environment.to_string(),
        path: path.to_string(),
        file_type: OverrideFileType::ProxyConfig,
        content: content.to_string(),
        force_include: false,
        author: "ops".to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Orchestrator over in-memory collaborators
pub struct Engine {
    pub store: Arc<MemoryJobStore>,
    pub settings: Arc<SettingsStore>,
    pub environments: Arc<MemoryEnvironmentDirectory>,
    pub overrides: Arc<MemoryOverrideStore>,
    pub transport: Arc<RecordingTransport>,
    pub orchestrator: Arc<JobOrchestrator>,
    queue: Option<JobQueue>,
}

impl Engine {
    pub async fn new(repository: MemoryRepository, transport: RecordingTransport) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let settings = Arc::new(SettingsStore::in_memory(test_settings()).unwrap());
        let environments = Arc::new(MemoryEnvironmentDirectory::new());
        environments
            .insert(Environment::new("staging", "stage.local", 8080))
            .await;
        environments
            .insert(Environment::new("prod", "prod.local", 8443).with_production(true))
            .await;
        let overrides = Arc::new(MemoryOverrideStore::new());
        let transport = Arc::new(transport);
        let archives = Dir::create_temp_dir("jarsmith-archives").await.unwrap();

        let stages = Stages {
            resolver: DiffResolver::new(Arc::new(repository)),
            applier: OverrideApplier::new(overrides.clone(), environments.clone()),
            builder: ArchiveBuilder::new(archives),
            deployer: Deployer::new(transport.clone(), environments.clone()),
        };
        let (orchestrator, queue) = JobOrchestrator::new(store.clone(), settings.clone(), stages);

        Self {
            store,
            settings,
            environments,
            overrides,
            transport,
            orchestrator,
            queue: Some(queue),
        }
    }

    /// Engine with the dispatcher already running
    pub async fn running(repository: MemoryRepository, transport: RecordingTransport) -> Self {
        let mut engine = Self::new(repository, transport).await;
        engine.start();
        engine
    }

    pub fn start(&mut self) {
        if let Some(queue) = self.queue.take() {
            let orchestrator = self.orchestrator.clone();
            tokio::spawn(async move {
                dispatcher::run(
                    &dispatcher::Options::default(),
                    orchestrator,
                    queue,
                    Box::pin(std::future::pending::<()>()),
                )
                .await;
            });
        }
    }

    pub async fn submit(&self, request: JobRequest) -> String {
        self.orchestrator.submit(request).await.unwrap().id
    }

    /// Poll until the job is terminal
    pub async fn wait_terminal(&self, job_id: &str) -> DeploymentJob {
        self.wait_until(job_id, |job| job.state.is_terminal()).await
    }

    pub async fn wait_until(
        &self,
        job_id: &str,
        done: impl Fn(&DeploymentJob) -> bool,
    ) -> DeploymentJob {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let job = self.store.get(job_id).await.unwrap();
                if done(&job) {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not reach the expected state in time")
    }
}
