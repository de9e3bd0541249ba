//! Object storage abstraction used by MPC backups.
//!
//! Backends expose S3-like semantics (flat keys, `/` delimited listings) over
//! a local directory, Amazon S3 or compatible stores, and Google Cloud Storage.

pub mod gcs;
pub mod local;
pub mod s3;

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use gcs::GcsStorage;
pub use local::LocalStorage;
pub use s3::S3Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    S3,
    Gcs,
    Azure,
    Local,
    Sftp,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::S3 => "s3",
            Provider::Gcs => "gcs",
            Provider::Azure => "azure",
            Provider::Local => "local",
            Provider::Sftp => "sftp",
        };
        f.write_str(name)
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "s3" => Ok(Provider::S3),
            "gcs" | "gs" => Ok(Provider::Gcs),
            "azure" => Ok(Provider::Azure),
            "local" | "file" => Ok(Provider::Local),
            "sftp" => Ok(Provider::Sftp),
            other => Err(Error::invalid(format!(
                "unsupported storage provider: {}",
                other
            ))),
        }
    }
}

/// Called with `(bytes_done, bytes_total)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub progress: Option<ProgressFn>,
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("content_type", &self.content_type)
            .field("metadata", &self.metadata)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl UploadOptions {
    pub(crate) fn report(&self, done: u64, total: u64) {
        if let Some(progress) = &self.progress {
            progress(done, total);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: Option<usize>,
    pub start_after: Option<String>,
    /// `next_marker` of the previous page.
    pub continuation_token: Option<String>,
}

impl ListOptions {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn with_delimiter(mut self, delimiter: &str) -> Self {
        self.delimiter = Some(delimiter.to_string());
        self
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = Some(max_keys);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListResult {
    pub objects: Vec<ObjectInfo>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

/// Common interface over object stores.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn upload(&self, key: &str, data: Vec<u8>, opts: &UploadOptions) -> Result<()>;

    async fn upload_file(&self, key: &str, path: &Path, opts: &UploadOptions) -> Result<()> {
        let data = tokio::fs::read(path).await?;
        self.upload(key, data, opts).await
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>>;

    async fn download_file(&self, key: &str, path: &Path) -> Result<()> {
        let data = self.download(key).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every key, ignoring ones that are already gone.
    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            match self.delete(key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn get_info(&self, key: &str) -> Result<ObjectInfo>;

    async fn list(&self, opts: &ListOptions) -> Result<ListResult>;

    async fn signed_url(&self, key: &str, expiry: Duration) -> Result<String>;

    async fn copy(&self, src: &str, dst: &str) -> Result<()>;

    fn provider(&self) -> Provider;

    fn bucket(&self) -> &str;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub provider: Provider,
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub prefix: String,
    pub base_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn local(base_path: impl Into<PathBuf>) -> Self {
        Self {
            provider: Provider::Local,
            bucket: String::new(),
            region: None,
            endpoint: None,
            prefix: String::new(),
            base_path: Some(base_path.into()),
        }
    }

    fn remote(provider: Provider, rest: &str) -> Self {
        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix.trim_end_matches('/')),
            None => (rest, ""),
        };
        Self {
            provider,
            bucket: bucket.to_string(),
            region: None,
            endpoint: None,
            prefix: prefix.to_string(),
            base_path: None,
        }
    }
}

/// Parse a destination such as `s3://bucket/prefix` or `/var/backups`.
pub fn parse_uri(uri: &str) -> Result<StorageConfig> {
    let config = if let Some(rest) = uri.strip_prefix("s3://") {
        StorageConfig::remote(Provider::S3, rest)
    } else if let Some(rest) = uri.strip_prefix("gs://") {
        StorageConfig::remote(Provider::Gcs, rest)
    } else if let Some(rest) = uri.strip_prefix("azure://") {
        StorageConfig::remote(Provider::Azure, rest)
    } else if let Some(rest) = uri.strip_prefix("sftp://") {
        StorageConfig::remote(Provider::Sftp, rest)
    } else if let Some(path) = uri.strip_prefix("file://") {
        StorageConfig::local(path)
    } else if uri.contains("://") {
        return Err(Error::invalid(format!("unsupported URI scheme: {}", uri)));
    } else {
        StorageConfig::local(uri)
    };

    if config.provider != Provider::Local && config.bucket.is_empty() {
        return Err(Error::invalid(format!("missing bucket in {}", uri)));
    }
    Ok(config)
}

/// Build a backend for `config`.
pub fn new_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config.provider {
        Provider::Local => {
            let base = config
                .base_path
                .clone()
                .ok_or_else(|| Error::invalid("local base path is required"))?;
            Arc::new(LocalStorage::new(base.join(&config.prefix))?)
        }
        Provider::S3 => Arc::new(S3Storage::from_env(config)?),
        Provider::Gcs => Arc::new(GcsStorage::from_env(config)?),
        Provider::Azure => return Err(Error::unsupported("azure storage")),
        Provider::Sftp => return Err(Error::unsupported("sftp storage")),
    };
    Ok(storage)
}

pub fn compute_checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn verify_checksum(data: &[u8], expected: &str) -> Result<()> {
    let actual = compute_checksum(data);
    if actual != expected {
        return Err(Error::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Join key segments with `/`, skipping empty ones.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Follow `next_marker` until the listing is no longer truncated.
pub async fn list_all(storage: &dyn Storage, opts: &ListOptions) -> Result<ListResult> {
    let mut all = ListResult::default();
    let mut page_opts = opts.clone();
    loop {
        let page = storage.list(&page_opts).await?;
        all.objects.extend(page.objects);
        for prefix in page.common_prefixes {
            if !all.common_prefixes.contains(&prefix) {
                all.common_prefixes.push(prefix);
            }
        }
        match page.next_marker {
            Some(marker) if page.is_truncated => page_opts.continuation_token = Some(marker),
            _ => break,
        }
    }
    Ok(all)
}

/// Apply S3 delimiter semantics to a sorted list of keys under `prefix`.
///
/// Objects and common prefixes both count towards `max_keys`. The marker of a
/// truncated page is the last entry returned, resumable through
/// `continuation_token`.
pub(crate) fn group_by_delimiter(
    objects: Vec<ObjectInfo>,
    opts: &ListOptions,
) -> ListResult {
    let delimiter = opts.delimiter.as_deref().filter(|d| !d.is_empty());
    let marker = opts
        .continuation_token
        .as_deref()
        .or(opts.start_after.as_deref());
    let mut result = ListResult::default();
    let mut last: Option<String> = None;
    let mut entries = 0usize;
    for object in objects {
        if !object.key.starts_with(&opts.prefix) {
            continue;
        }
        if let Some(marker) = marker {
            let under_marker_prefix =
                delimiter.is_some_and(|d| marker.ends_with(d)) && object.key.starts_with(marker);
            if object.key.as_str() <= marker || under_marker_prefix {
                continue;
            }
        }
        let common = delimiter.and_then(|delim| {
            let rest = &object.key[opts.prefix.len()..];
            rest.find(delim)
                .map(|idx| format!("{}{}", opts.prefix, &rest[..idx + delim.len()]))
        });
        if common.is_some() && common == last {
            continue;
        }
        if let Some(max) = opts.max_keys {
            if entries >= max {
                result.is_truncated = true;
                result.next_marker = last;
                break;
            }
        }
        entries += 1;
        match common {
            Some(common) => {
                last = Some(common.clone());
                result.common_prefixes.push(common);
            }
            None => {
                last = Some(object.key.clone());
                result.objects.push(object);
            }
        }
    }
    result
}
