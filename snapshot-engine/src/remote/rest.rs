//! REST implementation of [`DataSource`].
//!
//! Talks to a Salesforce-style `/services/data/vXX.X` API with a bearer
//! token obtained elsewhere.

use super::{DataSource, FieldInfo, ObjectTypeInfo, QueryPage};
use crate::config::RemoteConfig;
use crate::utils::errors::{EngineError, FetchError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// HTTP client bound to one instance and access token
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    instance_url: String,
    access_token: String,
    api_version: String,
    request_timeout: Duration,
}

#[derive(Deserialize)]
struct DescribeGlobal {
    sobjects: Vec<ObjectTypeInfo>,
}

#[derive(Deserialize)]
struct DescribeObject {
    fields: Vec<FieldInfo>,
}

impl RestClient {
    /// Create a client with default remote settings
    pub fn new(instance_url: impl Into<String>, access_token: impl Into<String>) -> Result<Self> {
        Self::with_config(instance_url, access_token, &RemoteConfig::default())
    }

    /// Create a client with explicit remote settings
    pub fn with_config(
        instance_url: impl Into<String>,
        access_token: impl Into<String>,
        config: &RemoteConfig,
    ) -> Result<Self> {
        let instance_url = instance_url.into().trim_end_matches('/').to_string();
        if instance_url.is_empty() {
            return Err(EngineError::Config("instance URL must not be empty".to_string()));
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("snapshot-engine/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            instance_url,
            access_token: access_token.into(),
            api_version: config.api_version.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/services/data/v{}{}", self.instance_url, self.api_version, path)
    }

    /// Absolute URLs pass through; anything else is relative to the instance.
    fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.instance_url, url)
        } else {
            format!("{}/{}", self.instance_url, url)
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let resp = request
            .bearer_auth(&self.access_token)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Authentication(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EngineError::Remote(format!("{status}: {body}")));
        }

        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl DataSource for RestClient {
    fn instance_url(&self) -> Option<String> {
        Some(self.instance_url.clone())
    }

    async fn list_object_types(&self) -> Result<Vec<ObjectTypeInfo>> {
        let url = self.api_url("/sobjects");
        let global: DescribeGlobal = self.send_json(self.http.get(&url)).await?;
        debug!("Schema lists {} object types", global.sobjects.len());
        Ok(global.sobjects)
    }

    async fn describe_fields(&self, object_type: &str) -> Result<Vec<FieldInfo>> {
        let url = self.api_url(&format!("/sobjects/{}/describe", object_type));
        let describe: DescribeObject = self.send_json(self.http.get(&url)).await?;
        Ok(describe.fields)
    }

    async fn query(&self, query: &str) -> Result<QueryPage> {
        let url = self.api_url("/query");
        self.send_json(self.http.get(&url).query(&[("q", query)])).await
    }

    async fn query_more(&self, next_records_url: &str) -> Result<QueryPage> {
        let url = self.resolve(next_records_url);
        self.send_json(self.http.get(&url)).await
    }

    async fn fetch_content(&self, url: &str) -> std::result::Result<Bytes, FetchError> {
        let resolved = self.resolve(url);
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout { url: url.to_string() }
            } else {
                FetchError::Network {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let resp = self
            .http
            .get(&resolved)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.bytes().await.map_err(classify)
    }
}
