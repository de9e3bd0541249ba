//! Amazon S3 and S3-compatible storage over the REST API.
//!
//! Requests are signed with AWS Signature Version 4. Custom endpoints
//! (MinIO, R2, ...) use path-style addressing.

use super::{join_key, ListOptions, ListResult, ObjectInfo, Provider, Storage, StorageConfig, UploadOptions};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "s3";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID").ok();
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok();
        match (access_key, secret_key) {
            (Some(access_key), Some(secret_key)) => Ok(Self {
                access_key,
                secret_key,
                session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
            }),
            _ => Err(Error::Configuration {
                reason: "AWS credentials not found: set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY"
                    .to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Storage {
    client: reqwest::Client,
    bucket: String,
    prefix: String,
    region: String,
    endpoint: Option<String>,
    credentials: Credentials,
}

impl S3Storage {
    pub fn new(config: &StorageConfig, credentials: Credentials) -> Result<Self> {
        let region = config
            .region
            .clone()
            .or_else(|| std::env::var("AWS_REGION").ok())
            .or_else(|| std::env::var("AWS_DEFAULT_REGION").ok())
            .unwrap_or_else(|| "us-east-1".to_string());
        let endpoint = config
            .endpoint
            .clone()
            .or_else(|| std::env::var("AWS_ENDPOINT_URL").ok())
            .map(|e| e.trim_end_matches('/').to_string());
        Ok(Self {
            client: reqwest::Client::new(),
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
            region,
            endpoint,
            credentials,
        })
    }

    pub fn from_env(config: &StorageConfig) -> Result<Self> {
        Self::new(config, Credentials::from_env()?)
    }

    fn full_key(&self, key: &str) -> String {
        join_key(&[&self.prefix, key])
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            return key;
        }
        key.strip_prefix(&self.prefix)
            .map(|k| k.trim_start_matches('/'))
            .unwrap_or(key)
    }

    /// Host header value and URL base (scheme + authority).
    fn host_and_base(&self) -> (String, String) {
        match &self.endpoint {
            Some(endpoint) => {
                let host = endpoint
                    .split_once("://")
                    .map(|(_, rest)| rest)
                    .unwrap_or(endpoint)
                    .to_string();
                (host, endpoint.clone())
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                (host.clone(), format!("https://{}", host))
            }
        }
    }

    /// Canonical URI path for an object key (or the bucket root when empty).
    fn canonical_path(&self, key: &str) -> String {
        let encoded = encode_path(key);
        match &self.endpoint {
            Some(_) if key.is_empty() => format!("/{}", self.bucket),
            Some(_) => format!("/{}/{}", self.bucket, encoded),
            None => format!("/{}", encoded),
        }
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        query: Vec<(String, String)>,
        extra_headers: Vec<(String, String)>,
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let now = Utc::now();
        let (host, base) = self.host_and_base();
        let path = self.canonical_path(key);
        let payload_hash = hex::encode(Sha256::digest(&body));

        let mut headers = extra_headers;
        headers.push(("host".to_string(), host));
        headers.push(("x-amz-content-sha256".to_string(), payload_hash.clone()));
        headers.push(("x-amz-date".to_string(), amz_date(&now)));
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }

        let authorization = sign_headers(
            &self.credentials,
            &self.region,
            method.as_str(),
            &path,
            &query,
            &mut headers,
            &payload_hash,
            &now,
        )?;

        let query_string = canonical_query(&query);
        let url = if query_string.is_empty() {
            format!("{}{}", base, path)
        } else {
            format!("{}{}?{}", base, path, query_string)
        };
        debug!("s3 {} {}", method, url);

        let mut request = self.client.request(method, &url).body(body);
        for (name, value) in &headers {
            if name != "host" {
                request = request.header(name.as_str(), value.as_str());
            }
        }
        request = request.header("authorization", authorization);
        Ok(request.send().await?)
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
}

#[async_trait]
impl Storage for S3Storage {
    async fn upload(&self, key: &str, data: Vec<u8>, opts: &UploadOptions) -> Result<()> {
        let total = data.len() as u64;
        let mut headers = vec![(
            "content-type".to_string(),
            opts.content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
        )];
        for (k, v) in &opts.metadata {
            headers.push((format!("x-amz-meta-{}", k.to_ascii_lowercase()), v.clone()));
        }
        let full = self.full_key(key);
        let response = self.send(Method::PUT, &full, vec![], headers, data).await?;
        Self::check(response, key).await?;
        opts.report(total, total);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let full = self.full_key(key);
        let response = self.send(Method::GET, &full, vec![], vec![], vec![]).await?;
        let response = Self::check(response, key).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full = self.full_key(key);
        let response = self.send(Method::DELETE, &full, vec![], vec![], vec![]).await?;
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
        let full = self.full_key(key);
        let response = self.send(Method::HEAD, &full, vec![], vec![], vec![]).await?;
        let response = Self::check(response, key).await?;
        let headers = response.headers();
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };
        let metadata: BTreeMap<String, String> = headers
            .iter()
            .filter_map(|(name, value)| {
                let meta = name.as_str().strip_prefix("x-amz-meta-")?;
                Some((meta.to_string(), value.to_str().ok()?.to_string()))
            })
            .collect();
        Ok(ObjectInfo {
            key: key.to_string(),
            size: header("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            last_modified: header("last-modified")
                .and_then(|v| DateTime::parse_from_rfc2822(&v).ok())
                .map(|d| d.with_timezone(&Utc)),
            etag: header("etag").map(|e| e.trim_matches('"').to_string()),
            content_type: header("content-type"),
            metadata,
        })
    }

    async fn list(&self, opts: &ListOptions) -> Result<ListResult> {
        let full_prefix = if self.prefix.is_empty() {
            opts.prefix.clone()
        } else {
            format!("{}/{}", self.prefix, opts.prefix)
        };
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("prefix".to_string(), full_prefix),
        ];
        if let Some(delim) = &opts.delimiter {
            query.push(("delimiter".to_string(), delim.clone()));
        }
        if let Some(max) = opts.max_keys {
            query.push(("max-keys".to_string(), max.to_string()));
        }
        if let Some(after) = &opts.start_after {
            query.push(("start-after".to_string(), self.full_key(after)));
        }
        if let Some(token) = &opts.continuation_token {
            query.push(("continuation-token".to_string(), token.clone()));
        }

        let response = self.send(Method::GET, "", query, vec![], vec![]).await?;
        let response = Self::check(response, &self.bucket).await?;
        let body = response.text().await?;
        let parsed = parse_list_response(&body)?;

        Ok(ListResult {
            objects: parsed
                .contents
                .into_iter()
                .map(|c| ObjectInfo {
                    key: self.strip_prefix(&c.key).to_string(),
                    size: c.size,
                    last_modified: c
                        .last_modified
                        .and_then(|d| DateTime::parse_from_rfc3339(&d).ok())
                        .map(|d| d.with_timezone(&Utc)),
                    etag: c.etag.map(|e| e.trim_matches('"').to_string()),
                    ..Default::default()
                })
                .collect(),
            common_prefixes: parsed
                .common_prefixes
                .into_iter()
                .map(|p| self.strip_prefix(&p.prefix).to_string())
                .collect(),
            is_truncated: parsed.is_truncated,
            next_marker: parsed.next_continuation_token,
        })
    }

    async fn signed_url(&self, key: &str, expiry: Duration) -> Result<String> {
        let (host, base) = self.host_and_base();
        let path = self.canonical_path(&self.full_key(key));
        let query = presign_query(
            &self.credentials,
            &self.region,
            &path,
            &host,
            expiry.as_secs(),
            &Utc::now(),
        )?;
        Ok(format!("{}{}?{}", base, path, canonical_query(&query)))
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let source = format!("/{}/{}", self.bucket, encode_path(&self.full_key(src)));
        let headers = vec![("x-amz-copy-source".to_string(), source)];
        let full = self.full_key(dst);
        let response = self.send(Method::PUT, &full, vec![], headers, vec![]).await?;
        Self::check(response, src).await?;
        Ok(())
    }

    fn provider(&self) -> Provider {
        Provider::S3
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    contents: Vec<ListContents>,
    #[serde(default)]
    common_prefixes: Vec<CommonPrefix>,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListContents {
    key: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    last_modified: Option<String>,
    #[serde(default, rename = "ETag")]
    etag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CommonPrefix {
    prefix: String,
}

fn parse_list_response(body: &str) -> Result<ListBucketResult> {
    quick_xml::de::from_str(body)
        .map_err(|e| Error::invalid(format!("invalid ListObjectsV2 response: {}", e)))
}

fn amz_date(now: &DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

fn encode_path(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (urlencoding::encode(k).into_owned(), urlencoding::encode(v).into_owned()))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::invalid(format!("invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn signing_key(secret: &str, date: &str, region: &str) -> Result<Vec<u8>> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, SERVICE.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

fn scope(now: &DateTime<Utc>, region: &str) -> String {
    format!("{}/{}/{}/aws4_request", now.format("%Y%m%d"), region, SERVICE)
}

fn signature(
    credentials: &Credentials,
    region: &str,
    canonical_request: &str,
    now: &DateTime<Utc>,
) -> Result<String> {
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date(now),
        scope(now, region),
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );
    let key = signing_key(
        &credentials.secret_key,
        &now.format("%Y%m%d").to_string(),
        region,
    )?;
    Ok(hex::encode(hmac(&key, string_to_sign.as_bytes())?))
}

/// Sign a request and return the `Authorization` header value.
///
/// `headers` is normalized in place (lowercase names, trimmed values, sorted).
#[allow(clippy::too_many_arguments)]
fn sign_headers(
    credentials: &Credentials,
    region: &str,
    method: &str,
    path: &str,
    query: &[(String, String)],
    headers: &mut Vec<(String, String)>,
    payload_hash: &str,
    now: &DateTime<Utc>,
) -> Result<String> {
    for (name, value) in headers.iter_mut() {
        *name = name.to_ascii_lowercase();
        *value = value.trim().to_string();
    }
    headers.sort();

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method,
        path,
        canonical_query(query),
        canonical_headers,
        signed_headers,
        payload_hash
    );
    let sig = signature(credentials, region, &canonical_request, now)?;
    Ok(format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM,
        credentials.access_key,
        scope(now, region),
        signed_headers,
        sig
    ))
}

/// Query parameters for a presigned GET, including the signature.
fn presign_query(
    credentials: &Credentials,
    region: &str,
    path: &str,
    host: &str,
    expires_secs: u64,
    now: &DateTime<Utc>,
) -> Result<Vec<(String, String)>> {
    let mut query = vec![
        ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
        (
            "X-Amz-Credential".to_string(),
            format!("{}/{}", credentials.access_key, scope(now, region)),
        ),
        ("X-Amz-Date".to_string(), amz_date(now)),
        ("X-Amz-Expires".to_string(), expires_secs.to_string()),
        ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
    ];
    if let Some(token) = &credentials.session_token {
        query.push(("X-Amz-Security-Token".to_string(), token.clone()));
    }
    let canonical_request = format!(
        "GET\n{}\n{}\nhost:{}\n\nhost\n{}",
        path,
        canonical_query(&query),
        host,
        UNSIGNED_PAYLOAD
    );
    let sig = signature(credentials, region, &canonical_request, now)?;
    query.push(("X-Amz-Signature".to_string(), sig));
    Ok(query)
}
