//! Google Cloud Storage over the JSON API.
//!
//! The bearer token comes from `GOOGLE_OAUTH_ACCESS_TOKEN` or, failing that,
//! from `gcloud auth print-access-token`.

use super::{join_key, ListOptions, ListResult, ObjectInfo, Provider, Storage, StorageConfig, UploadOptions};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::OnceCell;

const API_BASE: &str = "https://storage.googleapis.com";
const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

#[derive(Debug)]
pub struct GcsStorage {
    client: reqwest::Client,
    bucket: String,
    prefix: String,
    base_url: String,
    token: OnceCell<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObject {
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GcsList {
    #[serde(default)]
    items: Vec<GcsObject>,
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl GcsStorage {
    pub fn new(config: &StorageConfig, token: Option<String>) -> Self {
        let cell = OnceCell::new();
        if let Some(token) = token {
            let _ = cell.set(token);
        }
        Self {
            client: reqwest::Client::new(),
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
            base_url: config
                .endpoint
                .clone()
                .unwrap_or_else(|| API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            token: cell,
        }
    }

    pub fn from_env(config: &StorageConfig) -> Result<Self> {
        Ok(Self::new(config, std::env::var(TOKEN_ENV).ok()))
    }

    async fn token(&self) -> Result<&str> {
        let token = self
            .token
            .get_or_try_init(|| async {
                let output = tokio::process::Command::new("gcloud")
                    .args(["auth", "print-access-token"])
                    .output()
                    .await
                    .map_err(|e| Error::Configuration {
                        reason: format!("no {} set and gcloud is unavailable: {}", TOKEN_ENV, e),
                    })?;
                if !output.status.success() {
                    return Err(Error::Configuration {
                        reason: format!(
                            "gcloud auth print-access-token failed: {}",
                            String::from_utf8_lossy(&output.stderr).trim()
                        ),
                    });
                }
                Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
            })
            .await?;
        Ok(token.as_str())
    }

    fn full_key(&self, key: &str) -> String {
        join_key(&[&self.prefix, key])
    }

    fn relative<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            return key;
        }
        key.strip_prefix(&self.prefix)
            .map(|k| k.trim_start_matches('/'))
            .unwrap_or(key)
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.base_url,
            self.bucket,
            urlencoding::encode(&self.full_key(key))
        )
    }

    async fn check(response: reqwest::Response, key: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(Error::not_found(key));
        }
        let message = response.text().await.unwrap_or_default();
        Err(Error::Remote {
            status: status.as_u16(),
            message,
        })
    }

    fn to_info(&self, object: GcsObject) -> ObjectInfo {
        ObjectInfo {
            key: self.relative(&object.name).to_string(),
            size: object.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            last_modified: object
                .updated
                .and_then(|d| DateTime::parse_from_rfc3339(&d).ok())
                .map(|d| d.with_timezone(&Utc)),
            etag: object.etag,
            content_type: object.content_type,
            metadata: object.metadata,
        }
    }
}

#[async_trait]
impl Storage for GcsStorage {
    async fn upload(&self, key: &str, data: Vec<u8>, opts: &UploadOptions) -> Result<()> {
        let total = data.len() as u64;
        let token = self.token().await?;
        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.base_url,
            self.bucket,
            urlencoding::encode(&self.full_key(key))
        );
        let content_type = opts
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("content-type", content_type)
            .body(data)
            .send()
            .await?;
        Self::check(response, key).await?;

        if !opts.metadata.is_empty() {
            let response = self
                .client
                .patch(self.object_url(key))
                .bearer_auth(token)
                .json(&serde_json::json!({ "metadata": opts.metadata }))
                .send()
                .await?;
            Self::check(response, key).await?;
        }
        opts.report(total, total);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let token = self.token().await?;
        let response = self
            .client
            .get(format!("{}?alt=media", self.object_url(key)))
            .bearer_auth(token)
            .send()
            .await?;
        let response = Self::check(response, key).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let token = self.token().await?;
        let response = self
            .client
            .delete(self.object_url(key))
            .bearer_auth(token)
            .send()
            .await?;
        Self::check(response, key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.get_info(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_info(&self, key: &str) -> Result<ObjectInfo> {
        let token = self.token().await?;
        let response = self
            .client
            .get(self.object_url(key))
            .bearer_auth(token)
            .send()
            .await?;
        let response = Self::check(response, key).await?;
        let object: GcsObject = response.json().await?;
        Ok(self.to_info(object))
    }

    async fn list(&self, opts: &ListOptions) -> Result<ListResult> {
        let token = self.token().await?;
        let prefix = if self.prefix.is_empty() {
            opts.prefix.clone()
        } else {
            format!("{}/{}", self.prefix, opts.prefix)
        };
        let mut query = vec![("prefix".to_string(), prefix)];
        if let Some(delim) = &opts.delimiter {
            query.push(("delimiter".to_string(), delim.clone()));
        }
        if let Some(max) = opts.max_keys {
            query.push(("maxResults".to_string(), max.to_string()));
        }
        if let Some(after) = &opts.start_after {
            query.push(("startOffset".to_string(), format!("{}\u{0}", self.full_key(after))));
        }
        if let Some(token) = &opts.continuation_token {
            query.push(("pageToken".to_string(), token.clone()));
        }
        let response = self
            .client
            .get(format!("{}/storage/v1/b/{}/o", self.base_url, self.bucket))
            .bearer_auth(token)
            .query(&query)
            .send()
            .await?;
        let response = Self::check(response, &self.bucket).await?;
        let listing: GcsList = response.json().await?;

        Ok(ListResult {
            is_truncated: listing.next_page_token.is_some(),
            next_marker: listing.next_page_token,
            common_prefixes: listing
                .prefixes
                .iter()
                .map(|p| self.relative(p).to_string())
                .collect(),
            objects: listing
                .items
                .into_iter()
                .map(|o| self.to_info(o))
                .collect(),
        })
    }

    async fn signed_url(&self, _key: &str, _expiry: Duration) -> Result<String> {
        Err(Error::unsupported("gcs signed URLs"))
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let token = self.token().await?;
        let url = format!(
            "{}/copyTo/b/{}/o/{}",
            self.object_url(src),
            self.bucket,
            urlencoding::encode(&self.full_key(dst))
        );
        let response = self.client.post(url).bearer_auth(token).send().await?;
        Self::check(response, src).await?;
        Ok(())
    }

    fn provider(&self) -> Provider {
        Provider::Gcs
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
