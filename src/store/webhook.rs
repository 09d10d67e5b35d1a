//! Upload webhook: multipart POST of one file, URL back in the response.
//!
//! The endpoint accepts parts `file` (the bytes) and `file_name`. Its
//! response is one of:
//!
//! * a JSON object with a `url` field
//! * a JSON string holding the URL
//! * a plain-text URL

use super::{content_type, ObjectStore};
use crate::config::PipelineConfig;
use crate::error::{StoreError, UploadError};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const BODY_LIMIT: usize = 500;

/// [`ObjectStore`] backed by an HTTP upload webhook.
#[derive(Debug, Clone)]
pub struct WebhookObjectStore {
    client: Client,
    url: String,
}

impl WebhookObjectStore {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Like [`new`](Self::new), with the timeout from `config.http_timeout_secs`.
    pub fn from_config(url: impl Into<String>, config: &PipelineConfig) -> Result<Self, StoreError> {
        Self::new(url, config.http_timeout())
    }
}

#[async_trait]
impl ObjectStore for WebhookObjectStore {
    async fn upload(&self, path: &Path, name: &str) -> Result<String, UploadError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| UploadError::Read {
            name: name.to_string(),
            detail: e.to_string(),
        })?;
        let size = bytes.len();

        let transport = |e: reqwest::Error| UploadError::Transport {
            name: name.to_string(),
            detail: e.to_string(),
        };

        let part = Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str(content_type(name))
            .map_err(transport)?;
        let form = Form::new()
            .part("file", part)
            .text("file_name", name.to_string());

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(UploadError::Rejected {
                name: name.to_string(),
                status: status.as_u16(),
                body: body.chars().take(BODY_LIMIT).collect(),
            });
        }

        let url = extract_url(&body).ok_or_else(|| UploadError::MissingUrl {
            name: name.to_string(),
        })?;
        debug!("Uploaded {} ({} bytes) -> {}", name, size, url);
        Ok(url)
    }
}

/// Pull the public URL out of a webhook response body.
pub fn extract_url(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("url") {
            Some(Value::String(url)) if !url.trim().is_empty() => Some(url.trim().to_string()),
            _ => None,
        },
        Ok(Value::String(url)) if !url.trim().is_empty() => Some(url.trim().to_string()),
        Ok(_) => None,
        Err(_) if body.starts_with("http://") || body.starts_with("https://") => {
            Some(body.to_string())
        }
        Err(_) => None,
    }
}
