//! Crash-safe JSON codec for the usage file
//!
//! Saves go through a sibling `.tmp` file that is renamed over the live
//! path, so readers only ever see a complete file. Loads validate the
//! schema version and move unparsable files aside instead of failing on
//! them forever.

use super::types::{PersistedEnvelope, PersistenceError, Result, SUPPORTED_VERSION};
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

pub const TEMP_SUFFIX: &str = ".tmp";
pub const CORRUPT_SUFFIX: &str = ".corrupt.";

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// Write `envelope` to `path` atomically
pub async fn save(path: &Path, envelope: &PersistedEnvelope) -> Result<()> {
    let json = serde_json::to_vec_pretty(envelope)?;

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        create_private_dir(dir)
            .await
            .map_err(PersistenceError::file_op("create directory", dir))?;
    }

    let temp = temp_path(path);
    if let Err(source) = write_private_file(&temp, &json).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(PersistenceError::FileOp {
            action: "write temp file",
            path: temp,
            source,
        });
    }

    if let Err(source) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(PersistenceError::FileOp {
            action: "rename temp file",
            path: path.to_path_buf(),
            source,
        });
    }

    Ok(())
}

/// Read and validate the envelope stored at `path`.
///
/// Returns `Ok(None)` when there is nothing to restore.
pub async fn load(path: &Path) -> Result<Option<PersistedEnvelope>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistenceError::file_op("read file", path)(e)),
    };

    match parse(&bytes) {
        Ok(envelope) => Ok(Some(envelope)),
        Err(PersistenceError::SerializationError(reason)) => Err(quarantine(path, reason).await),
        Err(e) => Err(e),
    }
}

/// Decode an envelope without touching the filesystem.
///
/// The version is checked before the payload so a newer schema is reported
/// as [`PersistenceError::UnsupportedVersion`] rather than as garbage.
pub fn parse(bytes: &[u8]) -> Result<PersistedEnvelope> {
    let probe: VersionProbe = serde_json::from_slice(bytes)?;
    if probe.version != SUPPORTED_VERSION {
        return Err(PersistenceError::UnsupportedVersion {
            found: probe.version,
            expected: SUPPORTED_VERSION,
        });
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// Sibling temp file used while saving
pub fn temp_path(path: &Path) -> PathBuf {
    with_suffix(path, TEMP_SUFFIX)
}

/// Name a corrupt file is moved to, e.g. `usage.json.corrupt.20260314-093000`
pub fn quarantine_path(path: &Path, now: DateTime<Local>) -> PathBuf {
    let suffix = format!("{}{}", CORRUPT_SUFFIX, now.format("%Y%m%d-%H%M%S"));
    with_suffix(path, &suffix)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

async fn quarantine(path: &Path, reason: String) -> PersistenceError {
    let backup = quarantine_path(path, Local::now());
    let quarantined = match tokio::fs::rename(path, &backup).await {
        Ok(()) => {
            warn!("usage: corrupt file backed up to {}", backup.display());
            Some(backup)
        }
        Err(e) => {
            warn!(
                "usage: failed to back up corrupt file {}: {}",
                path.display(),
                e
            );
            None
        }
    };

    PersistenceError::Corrupted {
        path: path.to_path_buf(),
        quarantined,
        reason,
    }
}

async fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(dir).await
}

async fn write_private_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}
