//! Archive builder
//!
//! Packages the final change set into a zip archive with a manifest. The
//! output depends only on the (path, content) pairs and the version: entries
//! are sorted, timestamps are fixed and permissions are constant, so equal
//! inputs give byte-identical archives and the same storage location.

use std::io::{Cursor, Read, Write};

use serde::{Deserialize, Serialize};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::PipelineError;
use crate::filesys::dir::Dir;
use crate::models::change::{validate_relative_path, ChangeKind, ContentSource, FileChange};
use crate::models::job::{ArchiveInfo, Strategy};
use crate::store::StageLogger;
use crate::utils::sha256_hex;

pub const MANIFEST_PATH: &str = "META-INF/jarsmith-manifest.json";

/// Manifest stored inside every archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub version: String,
    pub strategy: Strategy,
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub kind: ChangeKind,
    pub source: ContentSource,

    /// Content size, 0 for deletions
    pub size: u64,

    /// Content digest, absent for deletions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ArchiveManifest {
    /// Read the manifest back out of archive bytes
    pub fn from_archive(bytes: &[u8]) -> Result<Self, PipelineError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut entry = archive.by_name(MANIFEST_PATH)?;
        let mut raw = Vec::new();
        entry.read_to_end(&mut raw)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Paths that carry content
    pub fn packaged_paths(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| e.kind != ChangeKind::Deleted)
            .map(|e| e.path.as_str())
    }
}

/// Read one file out of archive bytes
pub fn read_archive_file(bytes: &[u8], path: &str) -> Result<Vec<u8>, PipelineError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut entry = archive.by_name(path)?;
    let mut content = Vec::new();
    entry.read_to_end(&mut content)?;
    Ok(content)
}

pub struct ArchiveBuilder {
    archives_dir: Dir,
}

impl ArchiveBuilder {
    pub fn new(archives_dir: Dir) -> Self {
        Self { archives_dir }
    }

    /// Package `changes` for `version`.
    ///
    /// An empty selection under the diff strategy fails with
    /// `EmptyChangeSet` unless `allow_empty` is set, in which case a
    /// manifest-only archive is produced.
    pub async fn build(
        &self,
        changes: &[FileChange],
        version: &str,
        strategy: Strategy,
        allow_empty: bool,
        log: &StageLogger,
    ) -> Result<ArchiveInfo, PipelineError> {
        let mut selected: Vec<FileChange> = changes.to_vec();
        selected.sort_by(|a, b| a.path.cmp(&b.path));

        let file_count = selected.iter().filter(|c| c.is_packaged()).count();
        if file_count == 0 && strategy == Strategy::Diff && !allow_empty {
            return Err(PipelineError::EmptyChangeSet);
        }
        for change in &selected {
            validate_relative_path(&change.path)
                .map_err(|e| PipelineError::BuildFailed(format!("Unsafe archive entry: {}", e)))?;
        }
        if selected.iter().any(|c| c.path == MANIFEST_PATH) {
            return Err(PipelineError::BuildFailed(format!(
                "{} is reserved for the archive manifest",
                MANIFEST_PATH
            )));
        }

        log.line(format!(
            "Packaging {} file(s) for version {}",
            file_count, version
        ))
        .await;

        let manifest = ArchiveManifest {
            version: version.to_string(),
            strategy,
            entries: selected.iter().map(manifest_entry).collect(),
        };
        let bytes = tokio::task::spawn_blocking(move || pack(&manifest, &selected))
            .await
            .map_err(|e| PipelineError::BuildFailed(format!("Packaging task failed: {}", e)))??;

        let digest = sha256_hex(&bytes);
        let file = self
            .archives_dir
            .subdir(version)
            .file(&format!("{}.zip", digest));

        if file.exists().await {
            log.line(format!("Identical archive already stored, reusing {}", digest))
                .await;
        } else {
            file.write_atomic(&bytes).await.map_err(|e| {
                PipelineError::BuildFailed(format!("Failed to store archive: {}", e))
            })?;
            log.line(format!(
                "Stored {} byte archive at {}",
                bytes.len(),
                file.path().display()
            ))
            .await;
        }

        Ok(ArchiveInfo {
            location: file.path().display().to_string(),
            digest,
            size_bytes: bytes.len() as u64,
            file_count,
        })
    }
}

fn manifest_entry(change: &FileChange) -> ManifestEntry {
    let content = change.content.as_deref().filter(|_| change.is_packaged());
    ManifestEntry {
        path: change.path.clone(),
        kind: change.kind,
        source: change.source,
        size: content.map(|c| c.len() as u64).unwrap_or(0),
        sha256: content.map(sha256_hex),
    }
}

/// Write the zip in memory. `changes` must already be sorted by path.
fn pack(manifest: &ArchiveManifest, changes: &[FileChange]) -> Result<Vec<u8>, PipelineError> {
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    writer.start_file(MANIFEST_PATH, options)?;
    writer.write_all(&serde_json::to_vec_pretty(manifest)?)?;

    for change in changes.iter().filter(|c| c.is_packaged()) {
        if let Some(content) = &change.content {
            writer.start_file(change.path.as_str(), options)?;
            writer.write_all(content)?;
        }
    }

    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}
