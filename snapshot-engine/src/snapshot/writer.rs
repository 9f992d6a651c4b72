//! Snapshot writer - persists object data and binary payloads for one run.

use super::manifest::{BackupInfo, BackupManifest, Directories, DownloadStats};
use super::{file_component, RunLayout, MANIFEST_FILE};
use crate::executor::category::ContentCategory;
use crate::executor::options::BackupOptions;
use crate::fetcher::{ContentFetcher, Fetch, Retrying, SourceFetch};
use crate::remote::Record;
use crate::utils::errors::{EngineError, Result};
use chrono::{SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Statistics accumulator; every update goes through one mutex.
#[derive(Default)]
struct WriterState {
    stats: DownloadStats,
    /// Records per object type written so far. Rewriting a type replaces
    /// its count instead of adding to it.
    object_records: HashMap<String, usize>,
}

pub struct SnapshotWriter<F = Retrying<SourceFetch>> {
    layout: RunLayout,
    fetcher: Arc<ContentFetcher<F>>,
    state: Mutex<WriterState>,
    log_lock: Mutex<()>,
}

impl<F: Fetch> SnapshotWriter<F> {
    pub fn new(layout: RunLayout, fetcher: Arc<ContentFetcher<F>>) -> Self {
        Self {
            layout,
            fetcher,
            state: Mutex::new(WriterState::default()),
            log_lock: Mutex::new(()),
        }
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Create the run directory tree. Failure here invalidates the whole run.
    pub async fn prepare(&self) -> Result<()> {
        self.layout.create().await.map_err(|e| {
            EngineError::Io(std::io::Error::new(
                e.kind(),
                format!("cannot create run directory {}: {}", self.layout.root().display(), e),
            ))
        })
    }

    /// Write all records of one object type, replacing any earlier file for it.
    pub async fn write_object_data(&self, object_type: &str, records: &[Record]) -> Result<()> {
        let path = self.layout.data_file(object_type);
        let json = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(&path, &json).await?;

        let mut state = self.state.lock().await;
        state.object_records.insert(object_type.to_string(), records.len());
        state.stats.object_types = state.object_records.len();
        state.stats.records = state.object_records.values().sum();
        drop(state);

        debug!("Wrote {} {} records ({} bytes)", records.len(), object_type, json.len());
        Ok(())
    }

    /// Whether a data file for `object_type` was written in this run.
    pub async fn has_object_data(&self, object_type: &str) -> bool {
        self.state.lock().await.object_records.contains_key(object_type)
    }

    /// Download one payload and store it as `files/<category>/<id>.<ext>`.
    ///
    /// Failures are counted and logged before being returned, so callers may
    /// ignore the error.
    pub async fn write_binary(&self, category: ContentCategory, record: &Record, payload_url: &str) -> Result<u64> {
        let Some(record_id) = record.get("Id").and_then(|v| v.as_str()) else {
            let message = format!("record without Id, payload {}", payload_url);
            self.record_error(category.as_str(), &message).await;
            return Err(EngineError::Remote(message));
        };

        let bytes = match self.fetcher.fetch(payload_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.record_error(category.as_str(), &format!("{}: {}", record_id, e)).await;
                return Err(e.into());
            }
        };

        let dir = self.layout.files_dir(category.as_str());
        let path = dir.join(format!("{}.{}", file_component(record_id), category.extension(record)));
        let written = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, &bytes).await
        }
        .await;

        if let Err(e) = written {
            self.record_error(category.as_str(), &format!("{}: cannot write {}: {}", record_id, path.display(), e))
                .await;
            return Err(e.into());
        }

        let size = bytes.len() as u64;
        let mut state = self.state.lock().await;
        let entry = state.stats.categories.entry(category.as_str().to_string()).or_default();
        entry.count += 1;
        entry.bytes += size;
        state.stats.total_bytes += size;
        Ok(size)
    }

    /// Count a per-item error and append it to the run log.
    pub async fn record_error(&self, context: &str, message: &str) {
        warn!("[{}] {}", context, message);
        self.state.lock().await.stats.errors += 1;

        let line = format!(
            "{} ERROR [{}] {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            context,
            message
        );
        let _guard = self.log_lock.lock().await;
        if let Err(e) = append(&self.layout.log_file(), &line).await {
            warn!("Failed to append to run log: {}", e);
        }
    }

    /// Snapshot of the statistics accumulated so far.
    pub async fn stats(&self) -> DownloadStats {
        self.state.lock().await.stats.clone()
    }

    /// Write the manifest. Must be the last write of the run.
    pub async fn finalize(
        &self,
        options: &BackupOptions,
        duration: Duration,
        source_instance: Option<String>,
    ) -> Result<BackupManifest> {
        let manifest = BackupManifest {
            backup_info: BackupInfo {
                timestamp: self.layout.timestamp(),
                backup_type: options.backup_type,
                duration: duration.as_secs_f64(),
                source_instance,
            },
            options: options.clone(),
            download_stats: self.stats().await,
            directories: Directories::default(),
        };

        let json = serde_json::to_vec_pretty(&manifest)?;
        let tmp = self.layout.root().join(format!("{}.tmp", MANIFEST_FILE));
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, self.layout.manifest_path()).await?;

        info!("Manifest written: {}", self.layout.manifest_path().display());
        Ok(manifest)
    }
}

async fn append(path: &std::path::Path, line: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
