//! Read-only queries over completed backup runs.
//!
//! Every call re-reads the backup directory; nothing is cached between
//! calls. A run counts only once its manifest exists.

pub mod query;
pub mod runs;
pub mod time;

#[cfg(test)]
pub(crate) mod fixtures;

pub use query::{
    compare_data_over_time, get_record_history, query_at_point_in_time, ComparisonResult, Filters, HistoryEntry,
    PointInTimeResult, RecordHistory, RunRef, SnapshotView,
};
pub use runs::{list_runs, load_object_data, resolve_as_of, runs_as_of, BackupRun, RunListing, RunReadError};
pub use time::parse_timestamp;
