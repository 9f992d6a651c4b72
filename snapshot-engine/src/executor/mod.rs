//! Backup orchestrator - drives one run from schema listing to manifest.
//!
//! Per-item failures (one object type, one payload) are counted and logged
//! and the run carries on. Only failures that make the whole run meaningless
//! (schema listing, run directory, manifest) are returned as errors.

pub mod category;
pub mod options;

use crate::config::FetchConfig;
use crate::fetcher::ContentFetcher;
use crate::jobs::progress::{format_bytes, format_duration, ProgressCounters};
use crate::remote::{query_all, DataSource, FieldInfo, ObjectTypeInfo};
use crate::snapshot::{BackupManifest, RunLayout, SnapshotWriter};
use crate::utils::errors::Result;
use category::{soql_datetime, ContentCategory};
use chrono::{DateTime, Utc};
use futures_util::stream::{FuturesUnordered, StreamExt};
use options::BackupOptions;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Field types that cannot be selected alongside scalar fields.
const SKIPPED_FIELD_TYPES: &[&str] = &["address", "location", "base64"];

/// Field used for the incremental filter.
const LAST_MODIFIED_FIELD: &str = "LastModifiedDate";

/// Default download parallelism when neither options nor config set one.
const DEFAULT_PARALLEL_DOWNLOADS: usize = 3;

/// Outcome of a finished run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_directory: PathBuf,
    pub object_types: usize,
    pub records: usize,
    pub files_downloaded: usize,
    pub total_bytes: u64,
    pub errors: usize,
    pub duration_secs: f64,
    pub manifest: BackupManifest,
}

/// Main backup orchestrator
pub struct BackupOrchestrator {
    fetch_config: FetchConfig,
    progress: Arc<ProgressCounters>,
}

impl BackupOrchestrator {
    pub fn new(fetch_config: FetchConfig) -> Self {
        Self::with_progress(fetch_config, Arc::new(ProgressCounters::default()))
    }

    /// Report progress into counters owned by the caller
    pub fn with_progress(fetch_config: FetchConfig, progress: Arc<ProgressCounters>) -> Self {
        Self { fetch_config, progress }
    }

    pub fn progress(&self) -> Arc<ProgressCounters> {
        Arc::clone(&self.progress)
    }

    /// Execute one backup run into `layout`
    pub async fn run(
        &self,
        source: Arc<dyn DataSource>,
        options: &BackupOptions,
        layout: RunLayout,
    ) -> Result<RunResult> {
        options.validate()?;
        let start_time = std::time::Instant::now();
        let parallel = options.parallel_downloads.unwrap_or(DEFAULT_PARALLEL_DOWNLOADS);

        info!(
            "Starting {} backup into {} (parallel downloads: {})",
            options.backup_type,
            layout.root().display(),
            parallel
        );

        let fetcher = Arc::new(ContentFetcher::from_source(Arc::clone(&source), parallel, &self.fetch_config));
        let writer = SnapshotWriter::new(layout, fetcher);
        writer.prepare().await?;

        let object_types = match source.list_object_types().await {
            Ok(types) => queryable(types),
            Err(e) => {
                error!("Failed to list object types: {}", e);
                return Err(e);
            }
        };
        info!("Schema lists {} queryable object types", object_types.len());

        let since = options.effective_since();

        if options.backup_type.includes_object_data() {
            self.progress.set_object_types_total(object_types.len());
            for object_type in &object_types {
                self.progress.set_current(object_type.as_str());
                match capture_object(source.as_ref(), &writer, object_type, since).await {
                    Ok(count) => self.progress.object_type_done(count),
                    Err(e) => {
                        writer.record_error(object_type, &e.to_string()).await;
                        self.progress.error();
                        self.progress.object_type_done(0);
                    }
                }
            }
        }

        for category in options.categories() {
            self.progress.set_current(category.as_str());
            self.capture_category(source.as_ref(), &writer, category, since).await;
        }
        self.progress.clear_current();

        let duration = start_time.elapsed();
        let manifest = writer.finalize(options, duration, source.instance_url()).await?;
        let stats = &manifest.download_stats;

        info!(
            "Backup completed: {} object types, {} records, {} files ({}), {} errors, {}",
            stats.object_types,
            stats.records,
            stats.files_downloaded(),
            format_bytes(stats.total_bytes),
            stats.errors,
            format_duration(duration.as_secs())
        );

        Ok(RunResult {
            run_directory: writer.layout().root().to_path_buf(),
            object_types: stats.object_types,
            records: stats.records,
            files_downloaded: stats.files_downloaded(),
            total_bytes: stats.total_bytes,
            errors: stats.errors,
            duration_secs: duration.as_secs_f64(),
            manifest,
        })
    }

    /// Download every payload of one content category.
    ///
    /// All downloads are issued at once; the fetcher's gate bounds how many
    /// are actually in flight.
    async fn capture_category(
        &self,
        source: &dyn DataSource,
        writer: &SnapshotWriter,
        category: ContentCategory,
        since: Option<DateTime<Utc>>,
    ) {
        let query = category.metadata_query(since);
        let records = match query_all(source, &query).await {
            Ok(records) => records,
            Err(e) => {
                writer
                    .record_error(category.as_str(), &format!("metadata query failed: {}", e))
                    .await;
                self.progress.error();
                return;
            }
        };
        info!("Downloading {} {} payloads", records.len(), category);

        // Keep the metadata for point-in-time queries unless the object pass
        // already captured the full record set.
        if !writer.has_object_data(category.object_type()).await {
            if let Err(e) = writer.write_object_data(category.object_type(), &records).await {
                writer.record_error(category.object_type(), &e.to_string()).await;
                self.progress.error();
            }
        }

        let mut downloads = FuturesUnordered::new();
        for record in &records {
            match category.payload_url(record) {
                Some(url) => downloads.push(async move { writer.write_binary(category, record, &url).await }),
                None => {
                    let id = record.get("Id").and_then(|v| v.as_str()).unwrap_or("<no id>");
                    writer
                        .record_error(category.as_str(), &format!("{}: no download URL", id))
                        .await;
                    self.progress.error();
                }
            }
        }

        while let Some(result) = downloads.next().await {
            match result {
                Ok(bytes) => self.progress.file_downloaded(bytes),
                Err(_) => self.progress.error(),
            }
        }
    }
}

/// Queryable object type names, in schema order.
fn queryable(types: Vec<ObjectTypeInfo>) -> Vec<String> {
    types
        .into_iter()
        .filter(|t| t.queryable)
        .map(|t| t.name)
        .collect()
}

/// Query one object type in full and write its data file.
async fn capture_object(
    source: &dyn DataSource,
    writer: &SnapshotWriter,
    object_type: &str,
    since: Option<DateTime<Utc>>,
) -> Result<usize> {
    let fields = source.describe_fields(object_type).await?;
    let query = build_query(object_type, &fields, since);
    debug!("Querying {}: {}", object_type, query);

    let records = query_all(source, &query).await?;
    writer.write_object_data(object_type, &records).await?;
    Ok(records.len())
}

/// `SELECT <scalar fields> FROM <type> [WHERE LastModifiedDate >= since]`.
///
/// Types without a `LastModifiedDate` field are captured in full even for
/// incremental runs.
pub fn build_query(object_type: &str, fields: &[FieldInfo], since: Option<DateTime<Utc>>) -> String {
    let selected: Vec<&str> = fields
        .iter()
        .filter(|f| !SKIPPED_FIELD_TYPES.contains(&f.field_type.as_str()))
        .map(|f| f.name.as_str())
        .collect();
    let select = if selected.is_empty() { "Id".to_string() } else { selected.join(", ") };

    let mut query = format!("SELECT {} FROM {}", select, object_type);
    if let Some(since) = since {
        if fields.iter().any(|f| f.name == LAST_MODIFIED_FIELD) {
            query.push_str(&format!(" WHERE {} >= {}", LAST_MODIFIED_FIELD, soql_datetime(since)));
        } else {
            debug!("{} has no {}, capturing all records", object_type, LAST_MODIFIED_FIELD);
        }
    }
    query
}
