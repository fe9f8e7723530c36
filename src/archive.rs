//! Bulk export of selected blobs into one ZIP archive.

use crate::datetime::now_millis;
use crate::errors::{AppError, AppResult};
use crate::session::SessionState;
use futures_util::future::join_all;
use log::{info, warn};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::write::{FileOptions, ZipWriter};

/// Result of fetching one requested blob.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOutcome {
    pub key: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ArchiveBundle {
    /// Suggested file name, `media_{ms}.zip`.
    pub file_name: String,
    pub data: Vec<u8>,
    /// Entry names in archive order.
    pub entries: Vec<String>,
    /// Keys that could not be downloaded and were left out.
    pub failures: Vec<DownloadOutcome>,
}

impl ArchiveBundle {
    /// Write the archive into `dir` under its suggested name.
    pub async fn write_to(&self, dir: &Path) -> AppResult<PathBuf> {
        let target = dir.join(&self.file_name);
        tokio::fs::write(&target, &self.data).await?;
        info!("Wrote {} ({} bytes)", target.display(), self.data.len());
        Ok(target)
    }
}

pub struct ArchiveExporter {
    session: Arc<SessionState>,
}

impl ArchiveExporter {
    pub fn new(session: Arc<SessionState>) -> Self {
        Self { session }
    }

    /// Download every key concurrently and pack the ones that arrived.
    /// Fails only when none of them could be fetched.
    pub async fn export(&self, keys: &[String]) -> AppResult<ArchiveBundle> {
        self.session.binding()?;
        if keys.is_empty() {
            return Err(AppError::InvalidInput("No files selected".to_string()));
        }

        let results = join_all(keys.iter().map(|key| async move {
            (key.clone(), self.session.download(key).await)
        }))
        .await;

        let mut downloaded = Vec::new();
        let mut failures = Vec::new();
        for (key, result) in results {
            match result {
                Ok(data) => downloaded.push((key, data)),
                Err(e) => {
                    warn!("Failed to download {}: {}", key, e);
                    failures.push(DownloadOutcome {
                        key,
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if downloaded.is_empty() {
            return Err(AppError::AllDownloadsFailed {
                attempted: keys.len(),
            });
        }
        if !failures.is_empty() {
            warn!(
                "{} of {} files failed to download and are left out of the archive",
                failures.len(),
                keys.len()
            );
        }

        let (data, entries) = tokio::task::spawn_blocking(move || build_zip(downloaded))
            .await
            .map_err(|e| AppError::Archive(format!("archive task failed: {}", e)))??;

        info!("Packed {} files into archive ({} bytes)", entries.len(), data.len());
        Ok(ArchiveBundle {
            file_name: format!("media_{}.zip", now_millis()),
            data,
            entries,
            failures,
        })
    }
}

fn build_zip(files: Vec<(String, Arc<Vec<u8>>)>) -> AppResult<(Vec<u8>, Vec<String>)> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut used = HashSet::new();
    let mut entries = Vec::with_capacity(files.len());

    for (index, (key, data)) in files.iter().enumerate() {
        let base = entry_name(key, &format!("file_{}", index + 1));
        let name = unique_name(&base, &mut used);
        zip.start_file(name.as_str(), options)?;
        zip.write_all(data)?;
        entries.push(name);
    }

    let cursor = zip.finish()?;
    Ok((cursor.into_inner(), entries))
}

/// Last path segment of a blob key.
fn entry_name(key: &str, fallback: &str) -> String {
    Path::new(key)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or(fallback)
        .to_string()
}

/// `name`, or `stem_1.ext`, `stem_2.ext`... when already taken.
fn unique_name(name: &str, used: &mut HashSet<String>) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    let mut counter = 1;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{}_{}.{}", stem, counter, ext),
            None => format!("{}_{}", stem, counter),
        };
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}
