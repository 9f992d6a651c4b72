//! Manifest types for backup runs.
//!
//! A manifest is written once, last, as `backup-manifest.json` in each run
//! directory. Its presence marks the run as complete.

use crate::executor::options::{BackupOptions, BackupType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub backup_info: BackupInfo,
    pub options: BackupOptions,
    pub download_stats: DownloadStats,
    #[serde(default)]
    pub directories: Directories,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    /// Wall-clock seconds
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub source_instance: Option<String>,
}

/// Statistics accumulated while the run was written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStats {
    /// Keyed by content category name (`files`, `attachments`, `documents`)
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryStats>,
    #[serde(default)]
    pub object_types: usize,
    #[serde(default)]
    pub records: usize,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub count: usize,
    pub bytes: u64,
}

/// Directory names relative to the run root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directories {
    pub data: String,
    pub files: String,
    pub logs: String,
}

impl Default for Directories {
    fn default() -> Self {
        Self {
            data: super::DATA_DIR.to_string(),
            files: super::FILES_DIR.to_string(),
            logs: super::LOGS_DIR.to_string(),
        }
    }
}

impl DownloadStats {
    pub fn files_downloaded(&self) -> usize {
        self.categories.values().map(|c| c.count).sum()
    }
}
