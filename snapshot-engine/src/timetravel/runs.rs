//! Discovery of backup runs in a backup directory.

use crate::remote::Record;
use crate::snapshot::{self, BackupManifest, MANIFEST_FILE};
use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A run whose manifest was read successfully.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRun {
    /// Directory name
    pub name: String,
    pub path: PathBuf,
    /// Taken from the manifest, not the directory name
    pub timestamp: DateTime<Utc>,
    pub manifest: BackupManifest,
}

/// A run (or one of its files) that could not be read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReadError {
    pub run: String,
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunListing {
    /// Ascending by timestamp, then by name
    pub runs: Vec<BackupRun>,
    pub read_errors: Vec<RunReadError>,
}

/// List every run under `dir`.
///
/// Each immediate subdirectory is a candidate run; one without a readable
/// manifest is reported in `read_errors` and left out. A missing `dir` is an
/// empty listing.
pub async fn list_runs(dir: &Path) -> Result<RunListing> {
    let mut listing = RunListing::default();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Backup directory {} does not exist", dir.display());
            return Ok(listing);
        }
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        match read_manifest(&path).await {
            Ok(manifest) => listing.runs.push(BackupRun {
                name,
                timestamp: manifest.backup_info.timestamp,
                path,
                manifest,
            }),
            Err(message) => {
                warn!("Skipping run {}: {}", name, message);
                listing.read_errors.push(RunReadError { run: name, path, message });
            }
        }
    }

    listing
        .runs
        .sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.name.cmp(&b.name)));
    listing.read_errors.sort_by(|a, b| a.run.cmp(&b.run));
    Ok(listing)
}

async fn read_manifest(run_dir: &Path) -> std::result::Result<BackupManifest, String> {
    let path = run_dir.join(MANIFEST_FILE);
    let raw = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => format!("no {} (incomplete run)", MANIFEST_FILE),
        _ => format!("cannot read {}: {}", MANIFEST_FILE, e),
    })?;
    serde_json::from_slice(&raw).map_err(|e| format!("malformed {}: {}", MANIFEST_FILE, e))
}

/// The run current as of `target`: greatest timestamp not after it.
///
/// `runs` must be sorted as [`list_runs`] returns them. Among runs sharing
/// a timestamp the last one wins.
pub fn resolve_as_of(target: DateTime<Utc>, runs: &[BackupRun]) -> Option<&BackupRun> {
    runs_as_of(target, runs).last()
}

/// The prefix of `runs` taken at or before `target`, oldest first.
pub fn runs_as_of(target: DateTime<Utc>, runs: &[BackupRun]) -> &[BackupRun] {
    &runs[..runs.partition_point(|run| run.timestamp <= target)]
}

/// Records of `object_type` in `run`, in stored order.
///
/// A run that never captured the type yields an empty list.
pub async fn load_object_data(run: &BackupRun, object_type: &str) -> std::result::Result<Vec<Record>, RunReadError> {
    let path = snapshot::data_file(&run.path, object_type);
    let read_error = |message: String| RunReadError {
        run: run.name.clone(),
        path: path.clone(),
        message,
    };

    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(read_error(format!("cannot read {} data: {}", object_type, e))),
    };

    serde_json::from_slice(&raw).map_err(|e| {
        warn!("Malformed {} data in run {}: {}", object_type, run.name, e);
        read_error(format!("malformed {} data: {}", object_type, e))
    })
}
