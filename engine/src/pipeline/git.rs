//! Repository access through the git command line

use std::path::PathBuf;
use std::process::Output;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::PipelineError;
use crate::models::change::ChangeKind;
use crate::pipeline::diff::RepositoryDiffProvider;
use crate::storage::settings::SettingsStore;

/// Reads local clones configured under `repositories` in the settings
pub struct GitDiffProvider {
    settings: Arc<SettingsStore>,
}

impl GitDiffProvider {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self { settings }
    }

    async fn repository(&self, project_id: &str) -> Result<(String, PathBuf), PipelineError> {
        let settings = self.settings.settings().await;
        let path = settings.repositories.get(project_id).cloned().ok_or_else(|| {
            PipelineError::RepositoryUnavailable(format!(
                "No repository configured for project {}",
                project_id
            ))
        })?;

        if tokio::fs::metadata(&path).await.is_err() {
            return Err(PipelineError::RepositoryUnavailable(format!(
                "Repository path {} does not exist",
                path.display()
            )));
        }
        Ok((settings.git.binary, path))
    }

    async fn git(&self, project_id: &str, args: &[&str]) -> Result<Output, PipelineError> {
        let (binary, path) = self.repository(project_id).await?;
        debug!("Running {} {:?} in {}", binary, args, path.display());

        Command::new(&binary)
            .arg("-C")
            .arg(&path)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                PipelineError::RepositoryUnavailable(format!("Failed to run {}: {}", binary, e))
            })
    }
}

#[async_trait]
impl RepositoryDiffProvider for GitDiffProvider {
    async fn resolve_commit(&self, project_id: &str, rev: &str) -> Result<String, PipelineError> {
        let revision = format!("{}^{{commit}}", rev);
        let output = self
            .git(project_id, &["rev-parse", "--verify", "--quiet", &revision])
            .await?;

        if !output.status.success() {
            return Err(PipelineError::InvalidReference(format!(
                "{} does not resolve to a commit in {}",
                rev, project_id
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn changed_paths(
        &self,
        project_id: &str,
        base: &str,
        head: &str,
    ) -> Result<Vec<(String, ChangeKind)>, PipelineError> {
        let output = self
            .git(
                project_id,
                &["diff", "--name-status", "--no-renames", "-z", base, head],
            )
            .await?;

        if !output.status.success() {
            return Err(PipelineError::RepositoryUnavailable(format!(
                "git diff failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_name_status(&output.stdout))
    }

    async fn read_file(
        &self,
        project_id: &str,
        commit: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, PipelineError> {
        let object = format!("{}:{}", commit, path);
        let output = self.git(project_id, &["cat-file", "blob", &object]).await?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(output.stdout))
    }

    async fn patch(
        &self,
        project_id: &str,
        base: &str,
        head: &str,
        path: &str,
    ) -> Result<Option<String>, PipelineError> {
        let output = self
            .git(project_id, &["diff", "--no-color", base, head, "--", path])
            .await?;

        if !output.status.success() || output.stdout.is_empty() {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        if is_binary_patch(&text) {
            return Ok(None);
        }
        Ok(Some(text))
    }

    async fn list_tree(
        &self,
        project_id: &str,
        commit: &str,
    ) -> Result<Vec<String>, PipelineError> {
        let output = self
            .git(project_id, &["ls-tree", "-r", "-z", "--name-only", commit])
            .await?;

        if !output.status.success() {
            return Err(PipelineError::InvalidReference(format!(
                "Cannot list tree at {}",
                commit
            )));
        }
        Ok(output
            .stdout
            .split(|b| *b == 0)
            .filter(|p| !p.is_empty())
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect())
    }
}

/// Parse `git diff --name-status -z` output: status and path, NUL separated
fn parse_name_status(raw: &[u8]) -> Vec<(String, ChangeKind)> {
    let mut fields = raw.split(|b| *b == 0).filter(|f| !f.is_empty());
    let mut changes = Vec::new();

    while let (Some(status), Some(path)) = (fields.next(), fields.next()) {
        let kind = match status.first() {
            Some(b'A') => ChangeKind::Added,
            Some(b'D') => ChangeKind::Deleted,
            _ => ChangeKind::Modified,
        };
        changes.push((String::from_utf8_lossy(path).into_owned(), kind));
    }
    changes
}

fn is_binary_patch(text: &str) -> bool {
    text.lines()
        .any(|line| line.starts_with("Binary files ") || line == "GIT binary patch")
}
