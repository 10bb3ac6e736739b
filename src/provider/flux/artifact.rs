//! # Artifact Download
//!
//! Downloads a source artifact tarball, verifies it and extracts it into the
//! revision cache. Work happens in a staging directory that is renamed into
//! place once extraction succeeded, so a populated cache directory is always
//! a complete extraction.

use super::ArtifactInfo;
use crate::observability::metrics;
use crate::provider::source::SourceError;
use anyhow::{Context, Result};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

static STAGING_SEQUENCE: AtomicU64 = AtomicU64::new(0);

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn fetch_error(context: &str, e: impl std::fmt::Display) -> SourceError {
    SourceError::Fetch(format!("{context}: {e}"))
}

/// Unique sibling paths for the staging directory and the tarball
fn staging_paths(cache_path: &Path) -> Result<(PathBuf, PathBuf), SourceError> {
    let parent = cache_path
        .parent()
        .ok_or_else(|| SourceError::Fetch(format!("invalid cache path {}", cache_path.display())))?;
    let name = cache_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let sequence = STAGING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let stem = format!(".{name}.{}.{sequence}", std::process::id());
    Ok((
        parent.join(format!("{stem}.partial")),
        parent.join(format!("{stem}.tar.gz")),
    ))
}

/// Download, verify and extract an artifact into `cache_path`
pub async fn download_and_extract(
    http: &reqwest::Client,
    artifact: &ArtifactInfo,
    cache_path: &Path,
    cancel: &CancellationToken,
) -> Result<(), SourceError> {
    let (staging, tarball) = staging_paths(cache_path)?;
    tokio::fs::create_dir_all(&staging)
        .await
        .map_err(|e| fetch_error("failed to create staging directory", e))?;

    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SourceError::Cancelled),
        result = fetch_into(http, artifact, &tarball, &staging) => result,
    };

    let _ = tokio::fs::remove_file(&tarball).await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_dir_all(&staging).await;
        return Err(e);
    }

    // An empty directory left by an earlier crash would block the rename
    if cache_path.exists() && !super::is_populated(cache_path) {
        let _ = tokio::fs::remove_dir_all(cache_path).await;
    }
    if let Err(e) = tokio::fs::rename(&staging, cache_path).await {
        let _ = tokio::fs::remove_dir_all(&staging).await;
        // Another attempt extracted the same revision first
        if super::is_populated(cache_path) {
            debug!("Artifact already extracted at {}", cache_path.display());
            return Ok(());
        }
        return Err(fetch_error("failed to move artifact into cache", e));
    }

    info!(
        "Extracted artifact to {} (revision: {})",
        cache_path.display(),
        artifact.revision
    );
    Ok(())
}

async fn fetch_into(
    http: &reqwest::Client,
    artifact: &ArtifactInfo,
    tarball: &Path,
    staging: &Path,
) -> Result<(), SourceError> {
    let size = download(http, artifact, tarball).await?;
    extract(tarball, staging, size).await
}

async fn download(
    http: &reqwest::Client,
    artifact: &ArtifactInfo,
    tarball: &Path,
) -> Result<u64, SourceError> {
    let span = info_span!(
        "artifact.download",
        artifact.url = artifact.url.as_str(),
        artifact.revision = artifact.revision.as_str(),
        artifact.size_bytes = tracing::field::Empty,
        operation.success = tracing::field::Empty,
    );
    let span_clone = span.clone();
    let start = Instant::now();
    metrics::increment_artifact_downloads_total();

    let result = async move {
        let response = http.get(&artifact.url).send().await.map_err(|e| {
            error!("Failed to download artifact from {}: {}", artifact.url, e);
            fetch_error(&format!("failed to download {}", artifact.url), e)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Fetch(format!(
                "artifact download returned HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let expected_size = response.content_length();
        let mut file = tokio::fs::File::create(tarball)
            .await
            .map_err(|e| fetch_error("failed to create artifact file", e))?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut magic = Vec::<u8>::with_capacity(2);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| fetch_error("failed to read download stream", e))?;
            if magic.len() < 2 {
                magic.extend(chunk.iter().take(2 - magic.len()));
            }
            downloaded += chunk.len() as u64;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| fetch_error("failed to write artifact file", e))?;
        }
        file.flush()
            .await
            .map_err(|e| fetch_error("failed to write artifact file", e))?;
        drop(file);

        if downloaded == 0 {
            return Err(SourceError::Fetch("downloaded artifact is empty".to_string()));
        }
        if let Some(expected) = expected_size {
            if downloaded != expected {
                return Err(SourceError::Fetch(format!(
                    "partial download: expected {expected} bytes, got {downloaded} bytes"
                )));
            }
        }

        match artifact.digest.as_deref() {
            Some(digest) if digest.starts_with("sha256:") => {
                let computed = format!("sha256:{:x}", hasher.finalize());
                if digest != computed {
                    return Err(SourceError::Fetch(format!(
                        "checksum mismatch: expected {digest}, got {computed}"
                    )));
                }
                debug!("Checksum verified: {}", digest);
            }
            Some(digest) => debug!("Skipping verification of unsupported digest {}", digest),
            None => {}
        }

        check_gzip_magic(&magic)?;

        Ok(downloaded)
    }
    .instrument(span)
    .await;

    match &result {
        Ok(size) => {
            metrics::observe_artifact_download_duration(start.elapsed().as_secs_f64());
            span_clone.record("artifact.size_bytes", *size);
            span_clone.record("operation.success", true);
        }
        Err(_) => {
            metrics::increment_artifact_download_errors_total();
            span_clone.record("operation.success", false);
        }
    }
    result
}

async fn extract(tarball: &Path, staging: &Path, size: u64) -> Result<(), SourceError> {
    let span = info_span!(
        "artifact.extract",
        artifact.cache_path = staging.display().to_string(),
        artifact.size_bytes = size
    );
    metrics::increment_artifact_extractions_total();

    let result = async {
        // -C confines extraction to the staging directory
        let output = tokio::process::Command::new("tar")
            .arg("-xzf")
            .arg(tarball)
            .arg("-C")
            .arg(staging)
            .arg("--no-same-owner")
            .arg("--warning=no-unknown-keyword")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| fetch_error("failed to execute tar", e))?;

        if !output.status.success() {
            return Err(SourceError::Fetch(format!(
                "failed to extract artifact: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        if !super::is_populated(staging) {
            return Err(SourceError::Fetch(
                "artifact extraction produced an empty directory".to_string(),
            ));
        }
        Ok(())
    }
    .instrument(span)
    .await;

    if result.is_err() {
        metrics::increment_artifact_extraction_errors_total();
    }
    result
}

/// Keep only the `keep` newest revision directories under a source directory
/// Staging directories (dot-prefixed) are left alone.
pub async fn cleanup_old_revisions(parent_dir: &Path, keep: usize) -> Result<()> {
    let mut entries = Vec::new();
    let mut dir_entries = tokio::fs::read_dir(parent_dir)
        .await
        .context("Failed to read source directory for cleanup")?;

    while let Some(entry) = dir_entries.next_entry().await? {
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !path.is_dir() {
            continue;
        }
        let modified = tokio::fs::metadata(&path)
            .await?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((path, modified));
    }

    if entries.len() <= keep {
        return Ok(());
    }

    // Newest first
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    for (path, _) in entries.split_off(keep) {
        info!("Removing old revision cache: {}", path.display());
        if let Err(e) = tokio::fs::remove_dir_all(&path).await {
            warn!("Failed to remove old revision {}: {}", path.display(), e);
        }
    }

    Ok(())
}

fn check_gzip_magic(magic: &[u8]) -> Result<(), SourceError> {
    if magic != GZIP_MAGIC.as_slice() {
        return Err(SourceError::Fetch(format!(
            "invalid artifact format: expected gzip magic bytes 1f8b, got {}",
            magic.iter().map(|b| format!("{b:02x}")).collect::<String>()
        )));
    }
    Ok(())
}
