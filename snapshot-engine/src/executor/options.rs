//! Options accepted when starting a backup.

use super::category::ContentCategory;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    #[default]
    Full,
    Incremental,
    FilesOnly,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Incremental => "incremental",
            BackupType::FilesOnly => "files_only",
        }
    }

    /// Whether object data (as opposed to only binary content) is captured.
    pub fn includes_object_data(&self) -> bool {
        !matches!(self, BackupType::FilesOnly)
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOptions {
    #[serde(default)]
    pub backup_type: BackupType,

    /// Lower bound on `LastModifiedDate`; required for incremental runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since_date: Option<DateTime<Utc>>,

    /// Falls back to the configured output directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<PathBuf>,

    #[serde(default)]
    pub include_files: bool,

    #[serde(default)]
    pub include_attachments: bool,

    #[serde(default)]
    pub include_documents: bool,

    /// Falls back to the configured download parallelism
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_downloads: Option<usize>,
}

impl BackupOptions {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn incremental(since: DateTime<Utc>) -> Self {
        Self {
            backup_type: BackupType::Incremental,
            since_date: Some(since),
            ..Self::default()
        }
    }

    pub fn files_only() -> Self {
        Self {
            backup_type: BackupType::FilesOnly,
            ..Self::default()
        }
    }

    pub fn with_files(mut self) -> Self {
        self.include_files = true;
        self
    }

    pub fn with_attachments(mut self) -> Self {
        self.include_attachments = true;
        self
    }

    pub fn with_documents(mut self) -> Self {
        self.include_documents = true;
        self
    }

    pub fn with_output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = Some(dir.into());
        self
    }

    pub fn with_parallel_downloads(mut self, parallel: usize) -> Self {
        self.parallel_downloads = Some(parallel);
        self
    }

    /// Content categories selected by the include flags, in a fixed order.
    pub fn categories(&self) -> Vec<ContentCategory> {
        let mut categories = Vec::new();
        if self.include_files {
            categories.push(ContentCategory::Files);
        }
        if self.include_attachments {
            categories.push(ContentCategory::Attachments);
        }
        if self.include_documents {
            categories.push(ContentCategory::Documents);
        }
        categories
    }

    /// `since_date` only when it applies to this backup type.
    pub fn effective_since(&self) -> Option<DateTime<Utc>> {
        match self.backup_type {
            BackupType::Incremental => self.since_date,
            _ => None,
        }
    }

    /// Reject option combinations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.backup_type == BackupType::Incremental && self.since_date.is_none() {
            return Err(EngineError::InvalidOptions(
                "incremental backup requires sinceDate".to_string(),
            ));
        }
        if self.backup_type == BackupType::FilesOnly && self.categories().is_empty() {
            return Err(EngineError::InvalidOptions(
                "files_only backup requires at least one of includeFiles, includeAttachments, includeDocuments"
                    .to_string(),
            ));
        }
        if self.parallel_downloads == Some(0) {
            return Err(EngineError::InvalidOptions(
                "parallelDownloads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
