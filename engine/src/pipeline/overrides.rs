//! Override applier

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::catalog::{EnvironmentDirectory, OverrideStore};
use crate::errors::PipelineError;
use crate::models::change::{ChangeKind, ContentSource, FileChange};
use crate::models::job::Strategy;
use crate::models::overrides::FileOverride;
use crate::store::StageLogger;

/// Result of merging one override snapshot into a change set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedOverrides {
    pub changes: Vec<FileChange>,

    /// One line per override that took effect
    pub applied: Vec<String>,
}

pub struct OverrideApplier {
    overrides: Arc<dyn OverrideStore>,
    environments: Arc<dyn EnvironmentDirectory>,
}

impl OverrideApplier {
    pub fn new(
        overrides: Arc<dyn OverrideStore>,
        environments: Arc<dyn EnvironmentDirectory>,
    ) -> Self {
        Self {
            overrides,
            environments,
        }
    }

    /// Merge the environment's overrides into `changes`.
    ///
    /// The override set is fetched once; later edits to the store do not
    /// affect this job.
    pub async fn apply(
        &self,
        changes: &[FileChange],
        environment_id: &str,
        strategy: Strategy,
        log: &StageLogger,
    ) -> Result<Vec<FileChange>, PipelineError> {
        if self.environments.get(environment_id).await?.is_none() {
            return Err(PipelineError::EnvironmentNotFound(environment_id.to_string()));
        }

        let snapshot = self.overrides.snapshot(environment_id).await?;
        log.line(format!(
            "{} override(s) defined for environment {}",
            snapshot.len(),
            environment_id
        ))
        .await;

        let result = apply_snapshot(changes, &snapshot, strategy)?;
        for line in &result.applied {
            log.line(line.clone()).await;
        }
        if result.applied.is_empty() {
            log.line("No overrides matched the change set").await;
        }
        Ok(result.changes)
    }
}

/// Merge a snapshot into a change set.
///
/// An override replaces the matching entry's content. Force-included
/// overrides for untouched paths are appended only under the diff strategy.
/// When a path has several overrides the most recently updated one wins.
/// Any override with a path escaping the archive root fails the whole set.
pub fn apply_snapshot(
    changes: &[FileChange],
    snapshot: &[FileOverride],
    strategy: Strategy,
) -> Result<AppliedOverrides, PipelineError> {
    let mut by_path: BTreeMap<&str, &FileOverride> = BTreeMap::new();
    for candidate in snapshot {
        candidate.validate()?;
        let replace = match by_path.get(candidate.path.as_str()) {
            Some(current) => candidate.updated_at >= current.updated_at,
            None => true,
        };
        if replace {
            by_path.insert(candidate.path.as_str(), candidate);
        }
    }

    let mut applied = Vec::new();
    let mut merged = Vec::with_capacity(changes.len());
    for change in changes {
        match by_path.remove(change.path.as_str()) {
            Some(file_override) => {
                merged.push(change.overridden(file_override.content_bytes()?));
                applied.push(describe("Applied", file_override));
            }
            None => merged.push(change.clone()),
        }
    }

    // by_path now only holds overrides for paths outside the change set
    for file_override in by_path.into_values() {
        if strategy == Strategy::Diff && file_override.force_include {
            let mut change = FileChange::from_repository(
                file_override.path.clone(),
                ChangeKind::Modified,
                Some(file_override.content_bytes()?),
                None,
            );
            change.source = ContentSource::Override;
            merged.push(change);
            applied.push(describe("Force-included", file_override));
        }
    }

    Ok(AppliedOverrides {
        changes: merged,
        applied,
    })
}

fn describe(action: &str, file_override: &FileOverride) -> String {
    let author = if file_override.author.is_empty() {
        "unknown"
    } else {
        file_override.author.as_str()
    };
    format!(
        "{} override for {} ({:?}, by {}, updated {})",
        action,
        file_override.path,
        file_override.file_type,
        author,
        file_override.updated_at.to_rfc3339()
    )
}
