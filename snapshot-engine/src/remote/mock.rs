//! In-memory [`DataSource`] used by the unit tests.

use super::{DataSource, FieldInfo, ObjectTypeInfo, QueryPage, Record};
use crate::utils::errors::{EngineError, FetchError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct MockSource {
    objects: Vec<ObjectTypeInfo>,
    fields: HashMap<String, Vec<FieldInfo>>,
    records: HashMap<String, Vec<Record>>,
    failing_queries: HashSet<String>,
    fail_schema: bool,
    schema_delay: Duration,
    page_size: usize,
    content: HashMap<String, Bytes>,
    fetch_delay: Duration,
    /// Remaining forced failures per URL
    fetch_failures: Mutex<HashMap<String, u32>>,
    fetch_attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            page_size: 2000,
            ..Default::default()
        }
    }

    pub fn record(value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("record fixture must be an object, got {other}"),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_object(mut self, name: &str, fields: &[&str], records: Vec<Record>) -> Self {
        self.objects.push(ObjectTypeInfo {
            name: name.to_string(),
            label: None,
            queryable: true,
        });
        self.fields.insert(
            name.to_string(),
            fields
                .iter()
                .map(|f| FieldInfo {
                    name: f.to_string(),
                    field_type: "string".to_string(),
                })
                .collect(),
        );
        self.records.insert(name.to_string(), records);
        self
    }

    pub fn with_field(mut self, object: &str, name: &str, field_type: &str) -> Self {
        self.fields.entry(object.to_string()).or_default().push(FieldInfo {
            name: name.to_string(),
            field_type: field_type.to_string(),
        });
        self
    }

    pub fn with_unqueryable(mut self, name: &str) -> Self {
        self.objects.push(ObjectTypeInfo {
            name: name.to_string(),
            label: None,
            queryable: false,
        });
        self
    }

    pub fn failing_query(mut self, name: &str) -> Self {
        self.failing_queries.insert(name.to_string());
        self
    }

    pub fn failing_schema(mut self) -> Self {
        self.fail_schema = true;
        self
    }

    pub fn with_schema_delay(mut self, delay: Duration) -> Self {
        self.schema_delay = delay;
        self
    }

    pub fn with_content(mut self, url: &str, bytes: &'static [u8]) -> Self {
        self.content.insert(url.to_string(), Bytes::from_static(bytes));
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn failing_fetch(self, url: &str, times: u32) -> Self {
        self.fetch_failures
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
        self
    }

    pub fn fetch_attempts(&self) -> usize {
        self.fetch_attempts.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn page(&self, object: &str, offset: usize) -> QueryPage {
        let all = self.records.get(object).cloned().unwrap_or_default();
        let end = (offset + self.page_size).min(all.len());
        let done = end >= all.len();
        QueryPage {
            total_size: all.len() as u64,
            done,
            records: all[offset.min(all.len())..end].to_vec(),
            next_records_url: (!done).then(|| format!("mock://{object}/{end}")),
        }
    }
}

fn object_of(query: &str) -> Option<String> {
    let mut tokens = query.split_whitespace();
    while let Some(token) = tokens.next() {
        if token.eq_ignore_ascii_case("FROM") {
            return tokens.next().map(str::to_string);
        }
    }
    None
}

#[async_trait]
impl DataSource for MockSource {
    fn instance_url(&self) -> Option<String> {
        Some("https://mock.example.com".to_string())
    }

    async fn list_object_types(&self) -> Result<Vec<ObjectTypeInfo>> {
        if !self.schema_delay.is_zero() {
            tokio::time::sleep(self.schema_delay).await;
        }
        if self.fail_schema {
            return Err(EngineError::Authentication("session expired".to_string()));
        }
        Ok(self.objects.clone())
    }

    async fn describe_fields(&self, object_type: &str) -> Result<Vec<FieldInfo>> {
        self.fields
            .get(object_type)
            .cloned()
            .ok_or_else(|| EngineError::Remote(format!("unknown object type {object_type}")))
    }

    async fn query(&self, query: &str) -> Result<QueryPage> {
        self.queries.lock().unwrap().push(query.to_string());
        let object = object_of(query)
            .ok_or_else(|| EngineError::Remote(format!("malformed query: {query}")))?;
        if self.failing_queries.contains(&object) {
            return Err(EngineError::Remote(format!("INVALID_TYPE: {object}")));
        }
        Ok(self.page(&object, 0))
    }

    async fn query_more(&self, next_records_url: &str) -> Result<QueryPage> {
        let rest = next_records_url
            .strip_prefix("mock://")
            .ok_or_else(|| EngineError::Remote(format!("bad cursor {next_records_url}")))?;
        let (object, offset) = rest
            .split_once('/')
            .ok_or_else(|| EngineError::Remote(format!("bad cursor {next_records_url}")))?;
        let offset = offset
            .parse()
            .map_err(|_| EngineError::Remote(format!("bad cursor {next_records_url}")))?;
        Ok(self.page(object, offset))
    }

    async fn fetch_content(&self, url: &str) -> std::result::Result<Bytes, FetchError> {
        self.fetch_attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }

        let forced_failure = {
            let mut failures = self.fetch_failures.lock().unwrap();
            match failures.get_mut(url) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };

        let result = if forced_failure {
            Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: 503,
            })
        } else {
            self.content.get(url).cloned().ok_or_else(|| FetchError::HttpStatus {
                url: url.to_string(),
                status: 404,
            })
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
