//! Snapshot Engine Library
//!
//! Captures timestamped backups of a remote record store (object data plus
//! binary content) and answers point-in-time questions over them.

pub mod config;
pub mod executor;
pub mod fetcher;
pub mod jobs;
pub mod remote;
pub mod snapshot;
pub mod timetravel;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::options::{BackupOptions, BackupType};
pub use executor::{BackupOrchestrator, RunResult};
pub use jobs::{JobHandle, JobManager, JobSnapshot, JobStatus};
pub use remote::{DataSource, RestClient};
pub use utils::errors::{EngineError, FetchError, Result};
