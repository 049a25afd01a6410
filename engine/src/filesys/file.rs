//! File operations

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::PipelineError;

/// Values read back from a JSON-lines file
#[derive(Debug)]
pub struct JsonLines<T> {
    pub values: Vec<T>,

    /// Lines that were not valid JSON for `T`
    pub malformed: usize,
}

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, PipelineError> {
        let mut file = fs::File::open(&self.path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;
        Ok(contents)
    }

    /// Read file contents as bytes
    pub async fn read_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        let mut file = fs::File::open(&self.path).await?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await?;
        Ok(contents)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, PipelineError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Read a JSON-lines file, one value per non-empty line.
    ///
    /// Lines that do not parse (a torn final write, for instance) are
    /// skipped and counted instead of failing the whole read.
    pub async fn read_json_lines<T: DeserializeOwned>(
        &self,
    ) -> Result<JsonLines<T>, PipelineError> {
        let mut lines = JsonLines {
            values: Vec::new(),
            malformed: 0,
        };
        if !self.exists().await {
            return Ok(lines);
        }
        let contents = self.read_bytes().await?;
        for raw in contents.split(|b| *b == b'\n') {
            if raw.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice(raw) {
                Ok(value) => lines.values.push(value),
                Err(_) => lines.malformed += 1,
            }
        }
        Ok(lines)
    }

    /// Replace a JSON-lines file atomically
    pub async fn write_json_lines<T: Serialize>(&self, values: &[T]) -> Result<(), PipelineError> {
        let mut contents = Vec::new();
        for value in values {
            serde_json::to_writer(&mut contents, value)?;
            contents.push(b'\n');
        }
        self.write_atomic(&contents).await
    }

    /// Write JSON to file, replacing it atomically
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), PipelineError> {
        let contents = serde_json::to_vec_pretty(value)?;
        self.write_atomic(&contents).await
    }

    /// Append one JSON value as a line
    pub async fn append_json_line<T: Serialize>(&self, value: &T) -> Result<(), PipelineError> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');

        self.ensure_parent().await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Atomic write using a temporary file
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), PipelineError> {
        self.ensure_parent().await?;

        let temp_path = self.path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));

        // Write to temp file
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        // Rename to target
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// Delete the file
    pub async fn delete(&self) -> Result<(), PipelineError> {
        if self.exists().await {
            fs::remove_file(&self.path).await?;
        }
        Ok(())
    }

    async fn ensure_parent(&self) -> Result<(), PipelineError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}
