//! Job management for backup runs started by the host.
//!
//! `start` returns as soon as the job is registered; the run itself happens
//! on a spawned task. Job state lives only in memory and is lost on restart.

pub mod progress;

use crate::config::Config;
use crate::executor::options::{BackupOptions, BackupType};
use crate::executor::{BackupOrchestrator, RunResult};
use crate::remote::DataSource;
use crate::snapshot::RunLayout;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use progress::{ProgressCounters, ProgressSnapshot};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Returned by [`JobManager::start`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub job_id: String,
    pub status: JobStatus,
    pub run_directory: PathBuf,
}

/// Point-in-time copy of a job's state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub backup_type: BackupType,
    pub run_directory: PathBuf,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub progress: ProgressSnapshot,
}

struct JobEntry {
    status: JobStatus,
    backup_type: BackupType,
    run_directory: PathBuf,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    result: Option<RunResult>,
    error: Option<String>,
    progress: Arc<ProgressCounters>,
}

impl JobEntry {
    fn snapshot(&self, job_id: &str) -> JobSnapshot {
        JobSnapshot {
            job_id: job_id.to_string(),
            status: self.status,
            backup_type: self.backup_type,
            run_directory: self.run_directory.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            result: self.result.clone(),
            error: self.error.clone(),
            progress: self.progress.snapshot(),
        }
    }

    fn expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        match self.finished_at {
            Some(finished) => (now - finished).to_std().map(|age| age >= retention).unwrap_or(false),
            None => false,
        }
    }
}

/// Tracks backup jobs and drives each one on its own task
#[derive(Clone)]
pub struct JobManager {
    jobs: Arc<RwLock<HashMap<String, JobEntry>>>,
    config: Arc<Config>,
}

impl JobManager {
    pub fn new(config: Config) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a backup job and start it in the background.
    ///
    /// Invalid options are rejected here and no job is created. No network
    /// or disk I/O happens before this returns.
    pub async fn start(&self, source: Arc<dyn DataSource>, options: BackupOptions) -> Result<JobHandle> {
        let mut options = options;
        options.validate()?;
        let output_dir = options
            .output_directory
            .get_or_insert_with(|| self.config.backup.output_dir.clone())
            .clone();
        options
            .parallel_downloads
            .get_or_insert(self.config.backup.parallel_downloads);

        let job_id = Uuid::new_v4().to_string();
        let progress = Arc::new(ProgressCounters::default());

        let layout = {
            let mut jobs = self.jobs.write().await;
            prune(&mut jobs, self.config.jobs.retention());

            // Two jobs started within the same millisecond would share a run
            // directory; nudge the later one forward.
            let mut started_at = Utc::now();
            let layout = loop {
                let layout = RunLayout::allocate(&output_dir, &self.config.backup.run_prefix, started_at);
                if !jobs.values().any(|job| job.run_directory == layout.root()) {
                    break layout;
                }
                started_at += chrono::Duration::milliseconds(1);
            };

            jobs.insert(
                job_id.clone(),
                JobEntry {
                    status: JobStatus::Queued,
                    backup_type: options.backup_type,
                    run_directory: layout.root().to_path_buf(),
                    started_at,
                    finished_at: None,
                    result: None,
                    error: None,
                    progress: Arc::clone(&progress),
                },
            );
            layout
        };

        info!("Queued {} backup job {} -> {}", options.backup_type, job_id, layout.root().display());

        let handle = JobHandle {
            job_id: job_id.clone(),
            status: JobStatus::Queued,
            run_directory: layout.root().to_path_buf(),
        };

        let manager = self.clone();
        tokio::spawn(async move {
            manager.drive(job_id, source, options, layout, progress).await;
        });

        Ok(handle)
    }

    /// Run the orchestrator for one job and record the outcome.
    async fn drive(
        self,
        job_id: String,
        source: Arc<dyn DataSource>,
        options: BackupOptions,
        layout: RunLayout,
        progress: Arc<ProgressCounters>,
    ) {
        self.update(&job_id, |job| job.status = JobStatus::Running).await;

        let fetch_config = self.config.fetch.clone();
        let task = tokio::spawn(async move {
            BackupOrchestrator::with_progress(fetch_config, progress)
                .run(source, &options, layout)
                .await
        });

        // A panic inside the run surfaces as a JoinError and fails the job.
        let outcome = match task.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("backup task aborted: {}", e)),
        };

        match &outcome {
            Ok(result) => info!(
                "Job {} completed: {} records, {} files, {} errors",
                job_id, result.records, result.files_downloaded, result.errors
            ),
            Err(message) => error!("Job {} failed: {}", job_id, message),
        }

        self.update(&job_id, move |job| {
            job.finished_at = Some(Utc::now());
            match outcome {
                Ok(result) => {
                    job.status = JobStatus::Completed;
                    job.result = Some(result);
                }
                Err(message) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(message);
                }
            }
        })
        .await;
    }

    async fn update(&self, job_id: &str, apply: impl FnOnce(&mut JobEntry)) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            apply(job);
        }
    }

    /// Snapshot of one job
    pub async fn status(&self, job_id: &str) -> Result<JobSnapshot> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id)
            .map(|job| job.snapshot(job_id))
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))
    }

    /// Snapshots of all retained jobs, newest first
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let mut jobs = self.jobs.write().await;
        prune(&mut jobs, self.config.jobs.retention());

        let mut snapshots: Vec<JobSnapshot> = jobs.iter().map(|(id, job)| job.snapshot(id)).collect();
        snapshots.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        snapshots
    }

    /// Number of jobs not yet finished
    pub async fn running_count(&self) -> usize {
        let jobs = self.jobs.read().await;
        jobs.values().filter(|job| !job.status.is_finished()).count()
    }

    /// Poll until the job finishes and return its final snapshot
    pub async fn wait(&self, job_id: &str) -> Result<JobSnapshot> {
        loop {
            let snapshot = self.status(job_id).await?;
            if snapshot.status.is_finished() {
                return Ok(snapshot);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}

fn prune(jobs: &mut HashMap<String, JobEntry>, retention: Duration) {
    let now = Utc::now();
    jobs.retain(|_, job| !job.expired(now, retention));
}
