//! Metadata persistence: a remote upload endpoint, or the in-process
//! [`MetadataStore`] when no endpoint is configured.

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::metadata::{encode_component, MetadataStore};

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UploadPayload {
    pub user: String,
    pub request_id: u64,
    pub metadata: Value,
}

pub trait MetadataUploader: Send + Sync {
    /// Persist `payload.metadata` and return a URI it can be fetched from.
    ///
    /// `base_url` is the public origin of this service, for uploaders that
    /// serve the record themselves.
    fn upload<'a>(&'a self, payload: &'a UploadPayload, base_url: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// Uploads to `METADATA_UPLOAD_URL`, which answers `{ "url": "..." }`.
pub struct HttpUploader {
    url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct UploadResponse {
    url: Option<String>,
}

impl HttpUploader {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            url: url.to_string(),
            http,
        })
    }

    async fn post(&self, payload: &UploadPayload) -> Result<String> {
        let resp = self
            .http
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .context("metadata upload request failed")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("metadata upload failed: {}", status.as_u16());
        }
        let body: UploadResponse = resp
            .json()
            .await
            .context("metadata upload response is not JSON")?;
        body.url
            .filter(|u| !u.is_empty())
            .context("metadata upload response missing url")
    }
}

impl MetadataUploader for HttpUploader {
    fn upload<'a>(&'a self, payload: &'a UploadPayload, _base_url: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.post(payload))
    }
}

/// Stores metadata in-process and serves it from `GET /metadata?id=`.
pub struct LocalUploader {
    store: Arc<dyn MetadataStore>,
}

impl LocalUploader {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

impl MetadataUploader for LocalUploader {
    fn upload<'a>(&'a self, payload: &'a UploadPayload, base_url: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let id = self.store.put(payload.metadata.clone());
            Ok(metadata_url_for_id(base_url, &id))
        })
    }
}

/// `{base}/metadata?id=<id>`
pub fn metadata_url_for_id(base_url: &str, id: &str) -> String {
    format!("{base_url}/metadata?id={}", encode_component(id))
}
