//! Environment file override models

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::models::change::validate_relative_path;

/// Kind of artifact an override replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverrideFileType {
    /// Binary index file, content is base64 encoded
    BinaryIndex,

    /// Proxy configuration, content is UTF-8 text
    ProxyConfig,
}

/// An environment-specific replacement for a file's content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOverride {
    pub environment_id: String,

    pub path: String,

    pub file_type: OverrideFileType,

    /// Raw payload, see [`OverrideFileType`] for the encoding
    pub content: String,

    /// Add the file even when the diff did not touch it
    #[serde(default)]
    pub force_include: bool,

    #[serde(default)]
    pub author: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl FileOverride {
    /// The path must stay inside the archive root
    pub fn validate(&self) -> Result<(), PipelineError> {
        validate_relative_path(&self.path).map_err(|e| {
            PipelineError::ValidationError(format!(
                "Override for environment {} rejected: {}",
                self.environment_id, e
            ))
        })
    }

    /// Decode the payload into the bytes written to the archive
    pub fn content_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        match self.file_type {
            OverrideFileType::ProxyConfig => Ok(self.content.as_bytes().to_vec()),
            OverrideFileType::BinaryIndex => BASE64.decode(self.content.trim()).map_err(|e| {
                PipelineError::ValidationError(format!(
                    "Invalid base64 in override for {}: {e}",
                    self.path
                ))
            }),
        }
    }
}
