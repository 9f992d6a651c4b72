//! Access to the remote object store.
//!
//! The engine never authenticates on its own: the host hands it a
//! [`DataSource`] that is already bound to a session. [`RestClient`] is the
//! HTTP implementation; tests use an in-memory mock.

pub mod rest;

#[cfg(test)]
pub(crate) mod mock;

pub use rest::RestClient;

use crate::utils::errors::{FetchError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One record as returned by the remote query: field name to value.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Entry of the remote schema listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectTypeInfo {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub queryable: bool,
}

/// A single field of an object type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
}

/// One page of query results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    #[serde(default)]
    pub total_size: u64,
    pub done: bool,
    #[serde(default)]
    pub records: Vec<Record>,
    #[serde(default)]
    pub next_records_url: Option<String>,
}

/// Authenticated data-access handle supplied by the host.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Base URL of the remote instance, recorded in run manifests.
    fn instance_url(&self) -> Option<String> {
        None
    }

    /// List every object type in the remote schema.
    async fn list_object_types(&self) -> Result<Vec<ObjectTypeInfo>>;

    /// Describe the fields of one object type.
    async fn describe_fields(&self, object_type: &str) -> Result<Vec<FieldInfo>>;

    /// Run a query and return its first page.
    async fn query(&self, query: &str) -> Result<QueryPage>;

    /// Fetch the page behind a `next_records_url` cursor.
    async fn query_more(&self, next_records_url: &str) -> Result<QueryPage>;

    /// Download binary content. `url` may be absolute or instance-relative.
    async fn fetch_content(&self, url: &str) -> std::result::Result<Bytes, FetchError>;
}

/// Run a query and follow pagination until the source reports `done`.
///
/// Records keep the order the source returned them in.
pub async fn query_all(source: &dyn DataSource, query: &str) -> Result<Vec<Record>> {
    let mut page = source.query(query).await?;
    let mut records = std::mem::take(&mut page.records);
    let mut pages = 1usize;

    while !page.done {
        let Some(next) = page.next_records_url.take() else {
            warn!("Query reported more results without a cursor, stopping after {} pages", pages);
            break;
        };
        page = source.query_more(&next).await?;
        records.append(&mut page.records);
        pages += 1;
    }

    debug!("Query returned {} records in {} pages", records.len(), pages);
    Ok(records)
}
