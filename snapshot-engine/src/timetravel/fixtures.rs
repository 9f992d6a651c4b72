//! On-disk run fixtures for the time-travel tests.

use crate::executor::options::BackupOptions;
use crate::remote::Record;
use crate::snapshot::{BackupInfo, BackupManifest, Directories, DownloadStats, RunLayout};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

pub(crate) fn at(ts: &str) -> DateTime<Utc> {
    ts.parse().unwrap()
}

pub(crate) fn records(values: Vec<serde_json::Value>) -> Vec<Record> {
    values
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
}

/// Write a complete run with the given object data; returns its directory.
pub(crate) fn write_run(dir: &Path, ts: &str, objects: &[(&str, Vec<Record>)]) -> PathBuf {
    let layout = RunLayout::allocate(dir, "backup", at(ts));
    std::fs::create_dir_all(layout.data_dir()).unwrap();
    for (object_type, data) in objects {
        std::fs::write(layout.data_file(object_type), serde_json::to_vec_pretty(data).unwrap()).unwrap();
    }

    let manifest = BackupManifest {
        backup_info: BackupInfo {
            timestamp: layout.timestamp(),
            backup_type: Default::default(),
            duration: 0.5,
            source_instance: None,
        },
        options: BackupOptions::full(),
        download_stats: DownloadStats {
            object_types: objects.len(),
            records: objects.iter().map(|(_, data)| data.len()).sum(),
            ..Default::default()
        },
        directories: Directories::default(),
    };
    std::fs::write(layout.manifest_path(), serde_json::to_vec_pretty(&manifest).unwrap()).unwrap();
    layout.root().to_path_buf()
}
