//! Error types for the jarsmith engine

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the jarsmith engine
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    // Diff resolver
    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Diff too large: {changed} changed files exceeds the limit of {limit}")]
    DiffTooLarge { changed: usize, limit: usize },

    // Override applier
    #[error("Environment not found: {0}")]
    EnvironmentNotFound(String),

    // Archive builder
    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Empty change set: no files selected for a diff build")]
    EmptyChangeSet,

    // Deployer
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Deploy rejected: {0}")]
    DeployRejected(String),

    #[error("Deploy timed out after {0:?}")]
    DeployTimeout(Duration),

    #[error("Production guard violation: {0}")]
    ProductionGuardViolation(String),

    // Job lifecycle
    #[error("Job cancelled: {0}")]
    Cancelled(String),

    #[error("Job interrupted: {0}")]
    Interrupted(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Version conflict: expected {expected}, current is {current}")]
    VersionConflict { expected: u64, current: u64 },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

impl From<zip::result::ZipError> for PipelineError {
    fn from(err: zip::result::ZipError) -> Self {
        PipelineError::BuildFailed(err.to_string())
    }
}

/// Serializable classification of a [`PipelineError`], stored on failed jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    RepositoryUnavailable,
    InvalidReference,
    DiffTooLarge,
    EnvironmentNotFound,
    BuildFailed,
    EmptyChangeSet,
    ConnectionFailed,
    DeployRejected,
    DeployTimeout,
    ProductionGuardViolation,
    Cancelled,
    Interrupted,
    NotFound,
    InvalidTransition,
    Validation,
    VersionConflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RepositoryUnavailable => "RepositoryUnavailable",
            ErrorKind::InvalidReference => "InvalidReference",
            ErrorKind::DiffTooLarge => "DiffTooLarge",
            ErrorKind::EnvironmentNotFound => "EnvironmentNotFound",
            ErrorKind::BuildFailed => "BuildFailed",
            ErrorKind::EmptyChangeSet => "EmptyChangeSet",
            ErrorKind::ConnectionFailed => "ConnectionFailed",
            ErrorKind::DeployRejected => "DeployRejected",
            ErrorKind::DeployTimeout => "DeployTimeout",
            ErrorKind::ProductionGuardViolation => "ProductionGuardViolation",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Interrupted => "Interrupted",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvalidTransition => "InvalidTransition",
            ErrorKind::Validation => "Validation",
            ErrorKind::VersionConflict => "VersionConflict",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PipelineError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::RepositoryUnavailable(_) => ErrorKind::RepositoryUnavailable,
            PipelineError::InvalidReference(_) => ErrorKind::InvalidReference,
            PipelineError::DiffTooLarge { .. } => ErrorKind::DiffTooLarge,
            PipelineError::EnvironmentNotFound(_) => ErrorKind::EnvironmentNotFound,
            PipelineError::BuildFailed(_) => ErrorKind::BuildFailed,
            PipelineError::EmptyChangeSet => ErrorKind::EmptyChangeSet,
            PipelineError::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            PipelineError::DeployRejected(_) => ErrorKind::DeployRejected,
            PipelineError::DeployTimeout(_) => ErrorKind::DeployTimeout,
            PipelineError::ProductionGuardViolation(_) => ErrorKind::ProductionGuardViolation,
            PipelineError::Cancelled(_) => ErrorKind::Cancelled,
            PipelineError::Interrupted(_) => ErrorKind::Interrupted,
            PipelineError::JobNotFound(_) => ErrorKind::NotFound,
            PipelineError::InvalidTransition(_) => ErrorKind::InvalidTransition,
            PipelineError::ValidationError(_) => ErrorKind::Validation,
            PipelineError::VersionConflict { .. } => ErrorKind::VersionConflict,
            PipelineError::IoError(_)
            | PipelineError::JsonError(_)
            | PipelineError::ConfigError(_)
            | PipelineError::StorageError(_)
            | PipelineError::ServerError(_)
            | PipelineError::ShutdownError(_) => ErrorKind::Internal,
        }
    }

    /// Only connection failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::ConnectionFailed(_))
    }
}
