//! Progress tracking for running backup jobs.
//!
//! The orchestrator bumps atomic counters as it goes; job snapshots read
//! them without taking the job table lock for writing.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Live counters for one backup run.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    object_types_total: AtomicUsize,
    object_types_done: AtomicUsize,
    records: AtomicUsize,
    files_downloaded: AtomicUsize,
    bytes_downloaded: AtomicU64,
    errors: AtomicUsize,
    current: Mutex<Option<String>>,
}

/// Serializable copy of [`ProgressCounters`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub object_types_total: usize,
    pub object_types_done: usize,
    pub records: usize,
    pub files_downloaded: usize,
    pub bytes_downloaded: u64,
    pub errors: usize,
    pub current: Option<String>,
    /// Share of object types processed (0-100)
    pub percent_complete: f64,
}

impl ProgressCounters {
    pub fn set_object_types_total(&self, total: usize) {
        self.object_types_total.store(total, Ordering::Relaxed);
    }

    pub fn object_type_done(&self, records: usize) {
        self.records.fetch_add(records, Ordering::Relaxed);
        self.object_types_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_downloaded(&self, bytes: u64) {
        self.files_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Set what the run is currently working on
    pub fn set_current(&self, current: impl Into<String>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(current.into());
    }

    pub fn clear_current(&self) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let total = self.object_types_total.load(Ordering::Relaxed);
        let done = self.object_types_done.load(Ordering::Relaxed);
        ProgressSnapshot {
            object_types_total: total,
            object_types_done: done,
            records: self.records.load(Ordering::Relaxed),
            files_downloaded: self.files_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            current: self.current.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            percent_complete: if total > 0 {
                ((done as f64 / total as f64) * 100.0).min(100.0)
            } else {
                0.0
            },
        }
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
