//! Content fetcher - bounded, retrying downloads of binary payloads.
//!
//! Layers, innermost first:
//! - [`SourceFetch`]: one plain request through the [`DataSource`]
//! - [`Retrying`]: retry with backoff, each attempt bounded by a timeout
//! - [`ContentFetcher`]: concurrency gate plus shared byte/error counters

pub mod retry;

pub use retry::{RetryPolicy, Retrying};

use crate::config::FetchConfig;
use crate::remote::DataSource;
use crate::utils::errors::FetchError;
use bytes::Bytes;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// A way of turning a URL into bytes.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Bytes, FetchError>> + Send;
}

/// Single attempt through the data source.
#[derive(Clone)]
pub struct SourceFetch {
    source: Arc<dyn DataSource>,
}

impl SourceFetch {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }
}

impl Fetch for SourceFetch {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        self.source.fetch_content(url).await
    }
}

/// Counters shared between the fetcher, the snapshot writer and job progress.
#[derive(Debug, Default)]
pub struct FetchCounters {
    bytes: AtomicU64,
    fetched: AtomicUsize,
    errors: AtomicUsize,
}

/// Point-in-time copy of [`FetchCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchTotals {
    pub bytes: u64,
    pub fetched: usize,
    pub errors: usize,
}

impl FetchCounters {
    pub fn snapshot(&self) -> FetchTotals {
        FetchTotals {
            bytes: self.bytes.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Gated fetcher: never more than `limit` fetches in flight.
pub struct ContentFetcher<F = Retrying<SourceFetch>> {
    inner: F,
    gate: Arc<Semaphore>,
    limit: usize,
    counters: Arc<FetchCounters>,
}

impl ContentFetcher {
    /// Standard stack over a data source: retrying, then gated.
    pub fn from_source(source: Arc<dyn DataSource>, limit: usize, config: &FetchConfig) -> Self {
        let retrying = Retrying::new(SourceFetch::new(source), RetryPolicy::from_config(config));
        ContentFetcher::new(retrying, limit)
    }
}

impl<F: Fetch> ContentFetcher<F> {
    pub fn new(inner: F, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            inner,
            gate: Arc::new(Semaphore::new(limit)),
            limit,
            counters: Arc::new(FetchCounters::default()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn counters(&self) -> Arc<FetchCounters> {
        Arc::clone(&self.counters)
    }

    /// Fetch one payload, waiting for a free slot first.
    ///
    /// A failure is counted here and returned to the caller; it never
    /// affects other in-flight fetches.
    pub async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let permit = self.gate.acquire().await.map_err(|e| FetchError::Network {
            url: url.to_string(),
            message: format!("fetch gate closed: {}", e),
        })?;

        let result = self.inner.fetch(url).await;
        drop(permit);

        match &result {
            Ok(bytes) => {
                self.counters.bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                self.counters.fetched.fetch_add(1, Ordering::Relaxed);
                debug!("Fetched {} bytes from {}", bytes.len(), url);
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Giving up on {}: {}", url, e);
            }
        }
        result
    }
}
