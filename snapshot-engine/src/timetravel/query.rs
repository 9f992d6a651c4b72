//! Point-in-time queries, comparisons and record histories over stored runs.

use super::runs::{list_runs, load_object_data, runs_as_of, BackupRun, RunListing, RunReadError};
use crate::remote::Record;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Field name to required value. Every entry must equal the record's value.
pub type Filters = BTreeMap<String, Value>;

/// Identifies the run a result was read from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRef {
    pub name: String,
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

impl From<&BackupRun> for RunRef {
    fn from(run: &BackupRun) -> Self {
        Self {
            name: run.name.clone(),
            path: run.path.clone(),
            timestamp: run.timestamp,
        }
    }
}

/// Records of one object type as of a requested time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotView {
    pub requested_time: DateTime<Utc>,
    /// `None` when no run with readable data precedes `requested_time`
    pub run: Option<RunRef>,
    pub records: Vec<Record>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointInTimeResult {
    pub object_type: String,
    #[serde(flatten)]
    pub snapshot: SnapshotView,
    pub read_errors: Vec<RunReadError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub object_type: String,
    pub start_snapshot: SnapshotView,
    pub end_snapshot: SnapshotView,
    /// `end.count - start.count`
    pub count_difference: i64,
    pub read_errors: Vec<RunReadError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub run: RunRef,
    pub record: Record,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordHistory {
    pub record_id: String,
    pub object_type: String,
    /// One entry per run containing the record, oldest first
    pub entries: Vec<HistoryEntry>,
    pub read_errors: Vec<RunReadError>,
}

/// Records of `object_type` from the run current at `target`, optionally
/// narrowed by exact-match `filters`.
pub async fn query_at_point_in_time(
    dir: &Path,
    target: DateTime<Utc>,
    object_type: &str,
    filters: Option<&Filters>,
) -> Result<PointInTimeResult> {
    let listing = readable_runs(dir).await?;
    let mut data_errors = Vec::new();
    let snapshot = snapshot_at(&listing.runs, target, object_type, filters, &mut data_errors).await;
    let read_errors = collect_read_errors(dir, &listing, object_type, data_errors)?;

    Ok(PointInTimeResult {
        object_type: object_type.to_string(),
        snapshot,
        read_errors,
    })
}

/// Compare the record counts of `object_type` as of two times.
///
/// Each time is resolved on its own; only counts are compared.
pub async fn compare_data_over_time(
    dir: &Path,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    object_type: &str,
) -> Result<ComparisonResult> {
    let listing = readable_runs(dir).await?;
    let mut data_errors = Vec::new();
    let start_snapshot = snapshot_at(&listing.runs, start, object_type, None, &mut data_errors).await;
    let end_snapshot = snapshot_at(&listing.runs, end, object_type, None, &mut data_errors).await;
    let read_errors = collect_read_errors(dir, &listing, object_type, data_errors)?;

    Ok(ComparisonResult {
        object_type: object_type.to_string(),
        count_difference: end_snapshot.count as i64 - start_snapshot.count as i64,
        start_snapshot,
        end_snapshot,
        read_errors,
    })
}

/// Every captured version of one record, in run order.
///
/// Runs without the record are gaps, not deletions, and produce no entry.
pub async fn get_record_history(dir: &Path, record_id: &str, object_type: &str) -> Result<RecordHistory> {
    let listing = readable_runs(dir).await?;
    let mut data_errors = Vec::new();
    let mut entries = Vec::new();

    for run in &listing.runs {
        match load_object_data(run, object_type).await {
            Ok(records) => {
                if let Some(record) = records.into_iter().find(|r| record_id_of(r) == Some(record_id)) {
                    entries.push(HistoryEntry {
                        run: run.into(),
                        record,
                    });
                }
            }
            Err(e) => data_errors.push(e),
        }
    }

    debug!(
        "{} {} found in {} of {} runs",
        object_type,
        record_id,
        entries.len(),
        listing.runs.len()
    );
    let read_errors = collect_read_errors(dir, &listing, object_type, data_errors)?;

    Ok(RecordHistory {
        record_id: record_id.to_string(),
        object_type: object_type.to_string(),
        entries,
        read_errors,
    })
}

/// Runs under `dir`, failing when there is nothing readable to query.
async fn readable_runs(dir: &Path) -> Result<RunListing> {
    let listing = list_runs(dir).await?;
    if listing.runs.is_empty() {
        return Err(EngineError::NoDataAvailable(if listing.read_errors.is_empty() {
            format!("no backup runs in {}", dir.display())
        } else {
            format!(
                "none of the {} backup runs in {} are readable",
                listing.read_errors.len(),
                dir.display()
            )
        }));
    }
    Ok(listing)
}

/// Merge manifest and data read errors, one entry per file.
///
/// Fails when every listed run had unreadable `object_type` data.
fn collect_read_errors(
    dir: &Path,
    listing: &RunListing,
    object_type: &str,
    data_errors: Vec<RunReadError>,
) -> Result<Vec<RunReadError>> {
    let failed_runs: HashSet<&str> = data_errors.iter().map(|e| e.run.as_str()).collect();
    if failed_runs.len() >= listing.runs.len() {
        return Err(EngineError::NoDataAvailable(format!(
            "{} data is unreadable in all {} backup runs in {}",
            object_type,
            listing.runs.len(),
            dir.display()
        )));
    }

    let mut seen = HashSet::new();
    let mut read_errors = listing.read_errors.clone();
    read_errors.extend(data_errors.into_iter().filter(|e| seen.insert(e.path.clone())));
    Ok(read_errors)
}

/// Records as of `target`. A run whose data cannot be read is skipped in
/// favour of the next older one.
async fn snapshot_at(
    runs: &[BackupRun],
    target: DateTime<Utc>,
    object_type: &str,
    filters: Option<&Filters>,
    read_errors: &mut Vec<RunReadError>,
) -> SnapshotView {
    for run in runs_as_of(target, runs).iter().rev() {
        let records = match load_object_data(run, object_type).await {
            Ok(records) => records,
            Err(e) => {
                read_errors.push(e);
                continue;
            }
        };
        let records: Vec<Record> = match filters {
            Some(filters) if !filters.is_empty() => {
                records.into_iter().filter(|r| matches_filters(r, filters)).collect()
            }
            _ => records,
        };

        return SnapshotView {
            requested_time: target,
            run: Some(run.into()),
            count: records.len(),
            records,
        };
    }

    debug!("No readable {} data at or before {}", object_type, target);
    SnapshotView {
        requested_time: target,
        run: None,
        records: Vec::new(),
        count: 0,
    }
}

/// Exact JSON equality on every filter field; a missing field never matches.
fn matches_filters(record: &Record, filters: &Filters) -> bool {
    filters.iter().all(|(field, expected)| record.get(field) == Some(expected))
}

fn record_id_of(record: &Record) -> Option<&str> {
    record.get("Id").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timetravel::fixtures::{at, records, write_run};
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_point_in_time_resolves_latest_earlier_run() {
        let temp_dir = TempDir::new().unwrap();
        write_run(
            temp_dir.path(),
            "2024-01-15T15:15:42Z",
            &[("Account", records(vec![json!({ "Id": "001A" })]))],
        );
        write_run(
            temp_dir.path(),
            "2024-01-15T16:00:00Z",
            &[("Account", records(vec![json!({ "Id": "001A" }), json!({ "Id": "001B" })]))],
        );

        let result = query_at_point_in_time(temp_dir.path(), at("2024-01-15T15:30:00Z"), "Account", None)
            .await
            .unwrap();

        assert_eq!(result.snapshot.count, 1);
        assert_eq!(result.snapshot.run.unwrap().timestamp, at("2024-01-15T15:15:42Z"));
        assert_eq!(result.snapshot.requested_time, at("2024-01-15T15:30:00Z"));
    }

    #[tokio::test]
    async fn test_point_in_time_before_first_run_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        write_run(temp_dir.path(), "2024-01-15T15:15:42Z", &[("Account", records(vec![json!({ "Id": "1" })]))]);

        let result = query_at_point_in_time(temp_dir.path(), at("2024-01-15T14:00:00Z"), "Account", None)
            .await
            .unwrap();

        assert!(result.snapshot.run.is_none());
        assert_eq!(result.snapshot.count, 0);
        assert!(result.read_errors.is_empty());
    }

    #[tokio::test]
    async fn test_filter_is_exact_and_case_sensitive() {
        let temp_dir = TempDir::new().unwrap();
        let versions = records(vec![
            json!({ "Id": "068A", "FileType": "pdf" }),
            json!({ "Id": "068B", "FileType": "PDF" }),
            json!({ "Id": "068C", "FileType": "png" }),
            json!({ "Id": "068D" }),
            json!({ "Id": "068E", "FileType": "pdf" }),
        ]);
        write_run(temp_dir.path(), "2024-01-15T15:15:42Z", &[("ContentVersion", versions)]);

        let filters = Filters::from([("FileType".to_string(), json!("pdf"))]);
        let result = query_at_point_in_time(
            temp_dir.path(),
            at("2024-01-16T00:00:00Z"),
            "ContentVersion",
            Some(&filters),
        )
        .await
        .unwrap();

        let ids: Vec<_> = result.snapshot.records.iter().map(|r| r["Id"].clone()).collect();
        assert_eq!(ids, vec![json!("068A"), json!("068E")]);
        assert_eq!(result.snapshot.count, 2);
    }

    #[tokio::test]
    async fn test_missing_object_type_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        write_run(temp_dir.path(), "2024-01-15T15:15:42Z", &[]);

        let result = query_at_point_in_time(temp_dir.path(), at("2024-01-16T00:00:00Z"), "Account", None)
            .await
            .unwrap();

        assert!(result.snapshot.run.is_some());
        assert_eq!(result.snapshot.count, 0);
        assert!(result.read_errors.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_data_file_falls_back_to_older_run() {
        let temp_dir = TempDir::new().unwrap();
        write_run(temp_dir.path(), "2024-01-15T15:00:00Z", &[("Account", records(vec![json!({ "Id": "1" })]))]);
        let run = write_run(temp_dir.path(), "2024-01-15T16:00:00Z", &[]);
        std::fs::write(run.join("data").join("Account.json"), "{\"Id\":").unwrap();

        let result = query_at_point_in_time(temp_dir.path(), at("2024-01-16T00:00:00Z"), "Account", None)
            .await
            .unwrap();

        assert_eq!(result.snapshot.run.unwrap().timestamp, at("2024-01-15T15:00:00Z"));
        assert_eq!(result.snapshot.count, 1);
        assert_eq!(result.read_errors.len(), 1);
        assert_eq!(result.read_errors[0].run, "backup-2024-01-15T16-00-00-000Z");
        assert!(result.read_errors[0].message.contains("malformed Account data"));
    }

    #[tokio::test]
    async fn test_only_unreadable_data_before_target_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let run = write_run(temp_dir.path(), "2024-01-15T15:00:00Z", &[]);
        std::fs::write(run.join("data").join("Account.json"), "{oops").unwrap();
        write_run(temp_dir.path(), "2024-01-15T16:00:00Z", &[("Account", records(vec![json!({ "Id": "1" })]))]);

        let result = query_at_point_in_time(temp_dir.path(), at("2024-01-15T15:30:00Z"), "Account", None)
            .await
            .unwrap();

        assert!(result.snapshot.run.is_none());
        assert_eq!(result.snapshot.count, 0);
        assert_eq!(result.read_errors.len(), 1);
    }

    #[tokio::test]
    async fn test_every_data_file_unreadable() {
        let temp_dir = TempDir::new().unwrap();
        for ts in ["2024-01-15T15:15:42Z", "2024-01-15T16:00:00Z"] {
            let run = write_run(temp_dir.path(), ts, &[]);
            std::fs::write(run.join("data").join("Account.json"), "{oops").unwrap();
        }

        let err = get_record_history(temp_dir.path(), "001A", "Account").await.unwrap_err();
        assert!(matches!(err, EngineError::NoDataAvailable(_)));

        let err = query_at_point_in_time(temp_dir.path(), at("2024-01-16T00:00:00Z"), "Account", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoDataAvailable(_)));

        let err = compare_data_over_time(
            temp_dir.path(),
            at("2024-01-15T15:30:00Z"),
            at("2024-01-16T00:00:00Z"),
            "Account",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::NoDataAvailable(msg) if msg.contains("Account")));

        // Other object types in the same runs are unaffected
        let history = get_record_history(temp_dir.path(), "003A", "Contact").await.unwrap();
        assert!(history.entries.is_empty());
    }

    #[tokio::test]
    async fn test_no_readable_runs() {
        let temp_dir = TempDir::new().unwrap();
        let err = query_at_point_in_time(temp_dir.path(), Utc::now(), "Account", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoDataAvailable(_)));

        std::fs::create_dir(temp_dir.path().join("backup-incomplete")).unwrap();
        let err = get_record_history(temp_dir.path(), "001A", "Account").await.unwrap_err();
        assert!(matches!(err, EngineError::NoDataAvailable(msg) if msg.contains("readable")));

        let err = compare_data_over_time(&temp_dir.path().join("missing"), Utc::now(), Utc::now(), "Account")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoDataAvailable(_)));
    }

    #[tokio::test]
    async fn test_unreadable_run_skipped_but_reported() {
        let temp_dir = TempDir::new().unwrap();
        write_run(temp_dir.path(), "2024-01-15T15:15:42Z", &[("Account", records(vec![json!({ "Id": "1" })]))]);
        std::fs::create_dir(temp_dir.path().join("backup-2024-01-15T16-00-00-000Z")).unwrap();

        let result = query_at_point_in_time(temp_dir.path(), at("2024-01-15T17:00:00Z"), "Account", None)
            .await
            .unwrap();

        assert_eq!(result.snapshot.run.unwrap().timestamp, at("2024-01-15T15:15:42Z"));
        assert_eq!(result.snapshot.count, 1);
        assert_eq!(result.read_errors.len(), 1);
        assert_eq!(result.read_errors[0].run, "backup-2024-01-15T16-00-00-000Z");
    }

    #[tokio::test]
    async fn test_compare_counts_only() {
        let temp_dir = TempDir::new().unwrap();
        write_run(
            temp_dir.path(),
            "2024-01-15T15:15:42Z",
            &[(
                "Account",
                records(vec![
                    json!({ "Id": "001A", "Type": "Prospect" }),
                    json!({ "Id": "001B", "Type": "Customer" }),
                ]),
            )],
        );
        write_run(
            temp_dir.path(),
            "2024-01-15T16:00:00Z",
            &[(
                "Account",
                records(vec![
                    json!({ "Id": "001A", "Type": "Customer" }),
                    json!({ "Id": "001B", "Type": "Customer" }),
                ]),
            )],
        );

        let result = compare_data_over_time(
            temp_dir.path(),
            at("2024-01-15T15:30:00Z"),
            at("2024-01-15T16:30:00Z"),
            "Account",
        )
        .await
        .unwrap();

        assert_eq!(result.count_difference, 0);
        assert_eq!(result.start_snapshot.records[0]["Type"], json!("Prospect"));
        assert_eq!(result.end_snapshot.records[0]["Type"], json!("Customer"));
    }

    #[tokio::test]
    async fn test_compare_reports_signed_difference() {
        let temp_dir = TempDir::new().unwrap();
        write_run(
            temp_dir.path(),
            "2024-01-15T15:15:42Z",
            &[("Contact", records(vec![json!({ "Id": "1" }), json!({ "Id": "2" }), json!({ "Id": "3" })]))],
        );
        write_run(temp_dir.path(), "2024-01-15T16:00:00Z", &[("Contact", records(vec![json!({ "Id": "1" })]))]);

        let shrink = compare_data_over_time(
            temp_dir.path(),
            at("2024-01-15T15:20:00Z"),
            at("2024-01-15T16:20:00Z"),
            "Contact",
        )
        .await
        .unwrap();
        assert_eq!(shrink.count_difference, -2);

        // A start time before every run compares against nothing
        let from_nothing = compare_data_over_time(
            temp_dir.path(),
            at("2024-01-01T00:00:00Z"),
            at("2024-01-15T15:20:00Z"),
            "Contact",
        )
        .await
        .unwrap();
        assert!(from_nothing.start_snapshot.run.is_none());
        assert_eq!(from_nothing.count_difference, 3);
    }

    #[tokio::test]
    async fn test_history_skips_gaps() {
        let temp_dir = TempDir::new().unwrap();
        write_run(
            temp_dir.path(),
            "2024-01-15T15:00:00Z",
            &[("Account", records(vec![json!({ "Id": "001A", "Name": "Acme" })]))],
        );
        write_run(
            temp_dir.path(),
            "2024-01-15T16:00:00Z",
            &[("Account", records(vec![json!({ "Id": "001B", "Name": "Globex" })]))],
        );
        write_run(
            temp_dir.path(),
            "2024-01-15T17:00:00Z",
            &[("Account", records(vec![json!({ "Id": "001A", "Name": "Acme Corp" })]))],
        );

        let history = get_record_history(temp_dir.path(), "001A", "Account").await.unwrap();

        assert_eq!(history.entries.len(), 2);
        assert_eq!(history.entries[0].run.timestamp, at("2024-01-15T15:00:00Z"));
        assert_eq!(history.entries[0].record["Name"], json!("Acme"));
        assert_eq!(history.entries[1].run.timestamp, at("2024-01-15T17:00:00Z"));
        assert_eq!(history.entries[1].record["Name"], json!("Acme Corp"));
        assert!(history.read_errors.is_empty());
    }

    #[tokio::test]
    async fn test_history_of_unknown_record_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        write_run(temp_dir.path(), "2024-01-15T15:00:00Z", &[("Account", records(vec![json!({ "Id": "001A" })]))]);

        let history = get_record_history(temp_dir.path(), "001Z", "Account").await.unwrap();
        assert!(history.entries.is_empty());
    }
}
