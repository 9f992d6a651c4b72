//! On-disk layout of a backup run and the writer that fills it.
//!
//! ```text
//! <output>/<prefix>-<timestamp>/
//!   backup-manifest.json
//!   data/<ObjectType>.json
//!   files/<category>/<recordId>.<ext>
//!   logs/backup.log
//! ```

pub mod manifest;
pub mod writer;

pub use manifest::{BackupInfo, BackupManifest, CategoryStats, Directories, DownloadStats};
pub use writer::SnapshotWriter;

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "backup-manifest.json";
pub const DATA_DIR: &str = "data";
pub const FILES_DIR: &str = "files";
pub const LOGS_DIR: &str = "logs";
pub const LOG_FILE: &str = "backup.log";

/// Paths of one run directory.
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
    timestamp: DateTime<Utc>,
}

impl RunLayout {
    /// Place a run started at `timestamp` under `output_dir`.
    ///
    /// Only computes paths; nothing is created until [`RunLayout::create`].
    pub fn allocate(output_dir: &Path, prefix: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            root: output_dir.join(Self::dir_name(prefix, timestamp)),
            timestamp,
        }
    }

    /// `backup-2024-01-15T15-15-42-000Z` for a run at 2024-01-15T15:15:42Z.
    pub fn dir_name(prefix: &str, timestamp: DateTime<Utc>) -> String {
        let stamp = timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        format!("{}-{}", prefix, stamp)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn data_file(&self, object_type: &str) -> PathBuf {
        data_file(&self.root, object_type)
    }

    pub fn files_dir(&self, category: &str) -> PathBuf {
        self.root.join(FILES_DIR).join(file_component(category))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE)
    }

    /// Create the run directory and its data/files/logs subdirectories.
    pub async fn create(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.data_dir()).await?;
        tokio::fs::create_dir_all(self.root.join(FILES_DIR)).await?;
        tokio::fs::create_dir_all(self.logs_dir()).await?;
        Ok(())
    }
}

/// Data file of `object_type` inside the run directory `run_root`.
pub fn data_file(run_root: &Path, object_type: &str) -> PathBuf {
    run_root
        .join(DATA_DIR)
        .join(format!("{}.json", file_component(object_type)))
}

/// Make a remote name safe to use as a single path component.
pub fn file_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        s => s.to_string(),
    }
}
