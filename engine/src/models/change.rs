//! File change models

use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

/// How a path differs between two commits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        }
    }
}

impl std::str::FromStr for ChangeKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "added" | "a" => Ok(ChangeKind::Added),
            "modified" | "m" => Ok(ChangeKind::Modified),
            "deleted" | "d" => Ok(ChangeKind::Deleted),
            _ => Err(PipelineError::ValidationError(format!(
                "Invalid change kind: {}",
                s
            ))),
        }
    }
}

/// Where the content of a change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSource {
    Repository,
    Override,
}

/// A single changed path with its resolved content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,

    /// Unified diff for added or modified text files
    pub patch: Option<String>,

    /// File content at the head commit; `None` for deletions
    pub content: Option<Vec<u8>>,

    pub source: ContentSource,
}

impl FileChange {
    /// A change read from the repository
    pub fn from_repository(
        path: impl Into<String>,
        kind: ChangeKind,
        content: Option<Vec<u8>>,
        patch: Option<String>,
    ) -> Self {
        Self {
            path: path.into(),
            kind,
            patch,
            content,
            source: ContentSource::Repository,
        }
    }

    /// A deleted path
    pub fn deleted(path: impl Into<String>) -> Self {
        Self::from_repository(path, ChangeKind::Deleted, None, None)
    }

    /// Copy of this change with its content replaced by an override.
    ///
    /// A deleted entry comes back as modified since the override supplies
    /// the file again.
    pub fn overridden(&self, content: Vec<u8>) -> Self {
        let kind = match self.kind {
            ChangeKind::Deleted => ChangeKind::Modified,
            kind => kind,
        };
        Self {
            path: self.path.clone(),
            kind,
            patch: None,
            content: Some(content),
            source: ContentSource::Override,
        }
    }

    /// Whether the change contributes a file to the archive
    pub fn is_packaged(&self) -> bool {
        self.kind != ChangeKind::Deleted && self.content.is_some()
    }
}

/// Reject absolute paths, parent traversal and empty segments
pub fn validate_relative_path(path: &str) -> Result<(), PipelineError> {
    if path.is_empty() {
        return Err(PipelineError::ValidationError("Empty file path".to_string()));
    }
    if path.starts_with('/') || path.contains('\\') {
        return Err(PipelineError::ValidationError(format!(
            "File path must be relative with forward slashes: {}",
            path
        )));
    }
    if path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(PipelineError::ValidationError(format!(
            "File path contains an invalid segment: {}",
            path
        )));
    }
    Ok(())
}
