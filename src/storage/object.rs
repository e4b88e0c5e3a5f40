//! HTTP object storage backend
//!
//! Speaks the common object-storage REST shape used by hosted storage services:
//!
//! - `POST {base_url}/object/{bucket}/{key}` with `x-upsert: true` to write
//! - `GET  {base_url}/object/{bucket}/{key}` to read
//!
//! Requests carry the API key as a bearer token. The key is read from the
//! environment variable named in configuration, never from the config file.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{StorageBackend, StorageError};
use crate::config::StorageConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    /// Storage API root, e.g. `https://project.example.co/storage/v1`
    pub base_url: String,
    /// Bearer token; kept out of serialized output
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl ObjectStorageConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout_secs: 10,
        }
    }

    /// Resolve from the `[storage]` config section and the environment
    pub fn from_storage_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let base_url = config
            .object_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| StorageError::Config("storage.object_url is not set".to_string()))?;

        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            info!(
                "{} is not set, object storage requests will be unauthenticated",
                config.api_key_env
            );
        }

        Ok(Self {
            base_url,
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/object/{}/{}",
            self.base_url.trim_end_matches('/'),
            bucket,
            key.trim_start_matches('/')
        )
    }
}

/// Object storage client
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    config: ObjectStorageConfig,
    http: Client,
}

impl ObjectStorage {
    pub fn new(config: ObjectStorageConfig) -> Result<Self, StorageError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, http })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }
}

/// Some services answer a missing object with 400 and a `not_found` body
fn is_not_found(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::NOT_FOUND {
        return true;
    }
    let body = body.to_lowercase();
    status == StatusCode::BAD_REQUEST && (body.contains("not_found") || body.contains("not found"))
}

#[async_trait]
impl StorageBackend for ObjectStorage {
    async fn upload(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let url = self.config.object_url(bucket, key);
        let len = bytes.len();

        let response = self
            .authorize(self.http.post(&url))
            .header("Content-Type", "application/json")
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!("Uploaded {} bytes to {}", len, url);
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(StorageError::Http { status: status.as_u16(), body })
        }
    }

    async fn download(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let url = self.config.object_url(bucket, key);

        let response = self.authorize(self.http.get(&url)).send().await?;
        let status = response.status();

        if status.is_success() {
            let bytes = response.bytes().await?;
            debug!("Downloaded {} bytes from {}", bytes.len(), url);
            return Ok(Some(bytes.to_vec()));
        }

        let body = response.text().await.unwrap_or_default();
        if is_not_found(status, &body) {
            Ok(None)
        } else {
            Err(StorageError::Http { status: status.as_u16(), body })
        }
    }

    fn name(&self) -> &'static str {
        "object"
    }
}
