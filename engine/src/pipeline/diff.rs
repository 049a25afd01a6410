//! Diff resolver
//!
//! Turns a commit range (or an explicit file list) into the ordered change
//! set the rest of the pipeline works on.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::PipelineError;
use crate::models::change::{ChangeKind, FileChange};
use crate::models::job::{JobRequest, RequestedFile, Strategy};
use crate::store::StageLogger;

/// Read access to a project's repository
#[async_trait]
pub trait RepositoryDiffProvider: Send + Sync {
    /// Resolve a branch name or commit id to a full commit id
    async fn resolve_commit(&self, project_id: &str, rev: &str) -> Result<String, PipelineError>;

    /// Paths that differ between two commits
    async fn changed_paths(
        &self,
        project_id: &str,
        base: &str,
        head: &str,
    ) -> Result<Vec<(String, ChangeKind)>, PipelineError>;

    /// File content at `commit`, `None` when the path does not exist there
    async fn read_file(
        &self,
        project_id: &str,
        commit: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, PipelineError>;

    /// Unified diff of one path, `None` for binary files
    async fn patch(
        &self,
        project_id: &str,
        base: &str,
        head: &str,
        path: &str,
    ) -> Result<Option<String>, PipelineError>;

    /// Every file path in the tree at `commit`
    async fn list_tree(&self, project_id: &str, commit: &str) -> Result<Vec<String>, PipelineError>;
}

pub struct DiffResolver {
    provider: Arc<dyn RepositoryDiffProvider>,
}

impl DiffResolver {
    pub fn new(provider: Arc<dyn RepositoryDiffProvider>) -> Self {
        Self { provider }
    }

    /// Resolve the change set for a job.
    ///
    /// An explicit file list bypasses the commit range; `full` packages the
    /// whole head tree; `diff` returns the paths that changed, sorted.
    pub async fn resolve(
        &self,
        request: &JobRequest,
        max_changed_files: usize,
        log: &StageLogger,
    ) -> Result<Vec<FileChange>, PipelineError> {
        let project = request.project_id.as_str();

        let tip = self.provider.resolve_commit(project, &request.branch).await?;
        log.line(format!("Branch {} is at {}", request.branch, short(&tip)))
            .await;

        let head = self.provider.resolve_commit(project, &request.head_commit).await?;

        if let Some(files) = &request.files {
            return self
                .resolve_explicit(project, &head, files, max_changed_files, log)
                .await;
        }

        match request.strategy {
            Strategy::Full => self.resolve_full(project, &head, log).await,
            Strategy::Diff => {
                let base = self.provider.resolve_commit(project, &request.base_commit).await?;
                self.resolve_range(project, &base, &head, max_changed_files, log)
                    .await
            }
        }
    }

    async fn resolve_range(
        &self,
        project: &str,
        base: &str,
        head: &str,
        limit: usize,
        log: &StageLogger,
    ) -> Result<Vec<FileChange>, PipelineError> {
        if base == head {
            log.line(format!("Base and head are both {}, nothing changed", short(head)))
                .await;
            return Ok(Vec::new());
        }

        let mut paths = self.provider.changed_paths(project, base, head).await?;
        if paths.len() > limit {
            return Err(PipelineError::DiffTooLarge {
                changed: paths.len(),
                limit,
            });
        }
        paths.sort_by(|a, b| a.0.cmp(&b.0));
        paths.dedup_by(|a, b| a.0 == b.0);

        let mut changes = Vec::with_capacity(paths.len());
        for (path, kind) in paths {
            let change = match kind {
                ChangeKind::Deleted => FileChange::deleted(path),
                kind => {
                    let content = self.read_existing(project, head, &path).await?;
                    let patch = self.provider.patch(project, base, head, &path).await?;
                    FileChange::from_repository(path, kind, Some(content), patch)
                }
            };
            changes.push(change);
        }

        log.line(format!(
            "{} file(s) changed between {} and {} ({} added, {} modified, {} deleted)",
            changes.len(),
            short(base),
            short(head),
            count(&changes, ChangeKind::Added),
            count(&changes, ChangeKind::Modified),
            count(&changes, ChangeKind::Deleted),
        ))
        .await;
        Ok(changes)
    }

    async fn resolve_full(
        &self,
        project: &str,
        head: &str,
        log: &StageLogger,
    ) -> Result<Vec<FileChange>, PipelineError> {
        let mut paths = self.provider.list_tree(project, head).await?;
        paths.sort();
        paths.dedup();

        let mut changes = Vec::with_capacity(paths.len());
        for path in paths {
            let content = self.read_existing(project, head, &path).await?;
            changes.push(FileChange::from_repository(
                path,
                ChangeKind::Added,
                Some(content),
                None,
            ));
        }

        log.line(format!("Full tree at {}: {} file(s)", short(head), changes.len()))
            .await;
        Ok(changes)
    }

    async fn resolve_explicit(
        &self,
        project: &str,
        head: &str,
        files: &[RequestedFile],
        limit: usize,
        log: &StageLogger,
    ) -> Result<Vec<FileChange>, PipelineError> {
        if files.len() > limit {
            return Err(PipelineError::DiffTooLarge {
                changed: files.len(),
                limit,
            });
        }

        let mut changes = Vec::with_capacity(files.len());
        for file in files {
            let change = match file.status {
                ChangeKind::Deleted => FileChange::deleted(file.path.clone()),
                kind => {
                    let content = self.read_existing(project, head, &file.path).await?;
                    FileChange::from_repository(file.path.clone(), kind, Some(content), None)
                }
            };
            changes.push(change);
        }

        log.line(format!(
            "Using {} explicitly requested file(s) at {}",
            changes.len(),
            short(head)
        ))
        .await;
        Ok(changes)
    }

    async fn read_existing(
        &self,
        project: &str,
        commit: &str,
        path: &str,
    ) -> Result<Vec<u8>, PipelineError> {
        self.provider
            .read_file(project, commit, path)
            .await?
            .ok_or_else(|| {
                PipelineError::InvalidReference(format!(
                    "{} does not exist at {}",
                    path,
                    short(commit)
                ))
            })
    }
}

fn count(changes: &[FileChange], kind: ChangeKind) -> usize {
    changes.iter().filter(|c| c.kind == kind).count()
}

fn short(commit: &str) -> &str {
    commit.get(..10).unwrap_or(commit)
}
