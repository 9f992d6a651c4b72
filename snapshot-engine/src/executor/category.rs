//! Binary content categories and where their payloads live remotely.

use crate::remote::Record;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentCategory {
    Files,
    Attachments,
    Documents,
}

impl ContentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCategory::Files => "files",
            ContentCategory::Attachments => "attachments",
            ContentCategory::Documents => "documents",
        }
    }

    /// Remote object type holding the metadata records.
    pub fn object_type(&self) -> &'static str {
        match self {
            ContentCategory::Files => "ContentVersion",
            ContentCategory::Attachments => "Attachment",
            ContentCategory::Documents => "Document",
        }
    }

    /// Field whose value is the download URL of the payload.
    pub fn url_field(&self) -> &'static str {
        match self {
            ContentCategory::Files => "VersionData",
            ContentCategory::Attachments | ContentCategory::Documents => "Body",
        }
    }

    fn metadata_fields(&self) -> &'static [&'static str] {
        match self {
            ContentCategory::Files => &[
                "Id",
                "ContentDocumentId",
                "Title",
                "FileExtension",
                "FileType",
                "ContentSize",
                "VersionData",
                "LastModifiedDate",
            ],
            ContentCategory::Attachments => &[
                "Id",
                "ParentId",
                "Name",
                "ContentType",
                "BodyLength",
                "Body",
                "LastModifiedDate",
            ],
            ContentCategory::Documents => &[
                "Id",
                "FolderId",
                "Name",
                "Type",
                "ContentType",
                "BodyLength",
                "Body",
                "LastModifiedDate",
            ],
        }
    }

    /// Query listing the metadata records of this category.
    pub fn metadata_query(&self, since: Option<DateTime<Utc>>) -> String {
        let mut conditions = Vec::new();
        if *self == ContentCategory::Files {
            conditions.push("IsLatest = true".to_string());
        }
        if let Some(since) = since {
            conditions.push(format!("LastModifiedDate >= {}", soql_datetime(since)));
        }

        let mut query = format!(
            "SELECT {} FROM {}",
            self.metadata_fields().join(", "),
            self.object_type()
        );
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query
    }

    /// Download URL of a record's payload.
    ///
    /// Uses the URL field when the query returned it, otherwise derives it
    /// from the record's `attributes.url`.
    pub fn payload_url(&self, record: &Record) -> Option<String> {
        if let Some(url) = record.get(self.url_field()).and_then(|v| v.as_str()) {
            if !url.is_empty() {
                return Some(url.to_string());
            }
        }
        record
            .get("attributes")
            .and_then(|a| a.get("url"))
            .and_then(|u| u.as_str())
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), self.url_field()))
    }

    /// File extension for a record's payload, `bin` when unknown.
    pub fn extension(&self, record: &Record) -> String {
        let raw = match self {
            ContentCategory::Files => record.get("FileExtension").and_then(|v| v.as_str()),
            ContentCategory::Attachments => record
                .get("Name")
                .and_then(|v| v.as_str())
                .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext)),
            ContentCategory::Documents => record.get("Type").and_then(|v| v.as_str()),
        };

        let cleaned: String = raw
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        if cleaned.is_empty() {
            "bin".to_string()
        } else {
            cleaned
        }
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SOQL datetime literal (unquoted, UTC).
pub fn soql_datetime(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
