//! Filesystem-backed storage.
//!
//! Content type and user metadata of an object live next to it in a
//! `<key>.meta.json` file, hidden from listings.

use super::{group_by_delimiter, ListOptions, ListResult, ObjectInfo, Provider, Storage, UploadOptions};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use walkdir::WalkDir;

const META_SUFFIX: &str = ".meta.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    bucket: String,
}

impl LocalStorage {
    /// Create the store, creating `base_path` if needed.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        let bucket = base_path.display().to_string();
        Ok(Self { base_path, bucket })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key.trim_start_matches('/'));
        if key.ends_with(META_SUFFIX)
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::invalid(format!("invalid storage key: {}", key)));
        }
        Ok(self.base_path.join(rel))
    }

    fn info_for(&self, key: &str, path: &Path, meta: &std::fs::Metadata) -> Result<ObjectInfo> {
        let object_meta = read_meta(path)?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: meta.len(),
            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
            etag: None,
            content_type: object_meta.content_type,
            metadata: object_meta.metadata,
        })
    }
}

fn meta_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(META_SUFFIX);
    PathBuf::from(name)
}

fn read_meta(path: &Path) -> Result<ObjectMeta> {
    match std::fs::read(meta_path(path)) {
        Ok(raw) => Ok(serde_json::from_slice(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ObjectMeta::default()),
        Err(e) => Err(Error::Io(e)),
    }
}

async fn remove_meta(path: &Path) -> Result<()> {
    match fs::remove_file(meta_path(path)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

fn not_found(key: &str, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::not_found(key)
    } else {
        Error::Io(e)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload(&self, key: &str, data: Vec<u8>, opts: &UploadOptions) -> Result<()> {
        let path = self.full_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let total = data.len() as u64;
        fs::write(&path, data).await?;
        if opts.content_type.is_some() || !opts.metadata.is_empty() {
            let object_meta = ObjectMeta {
                content_type: opts.content_type.clone(),
                metadata: opts.metadata.clone(),
            };
            fs::write(meta_path(&path), serde_json::to_vec_pretty(&object_meta)?).await?;
        } else {
            remove_meta(&path).await?;
        }
        opts.report(total, total);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.full_path(key)?;
        fs::read(&path).await.map_err(|e| not_found(key, e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.full_path(key)?;
        fs::remove_file(&path).await.map_err(|e| not_found(key, e))?;
        remove_meta(&path).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.full_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn get_info(&self, key: &str) -> Result<ObjectInfo> {
        let path = self.full_path(key)?;
        let meta = fs::metadata(&path).await.map_err(|e| not_found(key, e))?;
        self.info_for(key, &path, &meta)
    }

    async fn list(&self, opts: &ListOptions) -> Result<ListResult> {
        let mut objects = Vec::new();
        for entry in WalkDir::new(&self.base_path).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.base_path) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !key.starts_with(&opts.prefix) || key.ends_with(META_SUFFIX) {
                continue;
            }
            let meta = entry.metadata().map_err(|e| Error::Io(e.into()))?;
            objects.push(self.info_for(&key, entry.path(), &meta)?);
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(group_by_delimiter(objects, opts))
    }

    async fn signed_url(&self, key: &str, _expiry: Duration) -> Result<String> {
        let path = self.full_path(key)?;
        let abs = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()?.join(path)
        };
        Ok(format!("file://{}", abs.display()))
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let src_path = self.full_path(src)?;
        let dst_path = self.full_path(dst)?;
        if let Some(parent) = dst_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&src_path, &dst_path)
            .await
            .map_err(|e| not_found(src, e))?;
        match fs::copy(meta_path(&src_path), meta_path(&dst_path)).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => remove_meta(&dst_path).await,
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn provider(&self) -> Provider {
        Provider::Local
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_download_delete() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path().join("store")).unwrap();

        store
            .upload("a/b/c.txt", b"payload".to_vec(), &UploadOptions::default())
            .await
            .unwrap();
        assert!(store.exists("a/b/c.txt").await.unwrap());
        assert_eq!(store.download("a/b/c.txt").await.unwrap(), b"payload");
        assert_eq!(store.get_info("a/b/c.txt").await.unwrap().size, 7);

        store.delete("a/b/c.txt").await.unwrap();
        assert!(!store.exists("a/b/c.txt").await.unwrap());
        assert!(store.download("a/b/c.txt").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_many_ignores_missing() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path()).unwrap();
        store
            .upload("x", b"1".to_vec(), &UploadOptions::default())
            .await
            .unwrap();
        store
            .delete_many(&["x".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert!(!store.exists("x").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_with_delimiter() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path()).unwrap();
        let opts = UploadOptions::default();
        for key in [
            "mpc/devnet/n1_devnet_1/manifest.json",
            "mpc/devnet/n1_devnet_1/data.tar.zst",
            "mpc/devnet/n2_devnet_2/manifest.json",
            "mpc/testnet/n3/manifest.json",
        ] {
            store.upload(key, b"{}".to_vec(), &opts).await.unwrap();
        }

        let result = store
            .list(&ListOptions::prefix("mpc/devnet/").with_delimiter("/"))
            .await
            .unwrap();
        assert_eq!(
            result.common_prefixes,
            vec!["mpc/devnet/n1_devnet_1/", "mpc/devnet/n2_devnet_2/"]
        );
        assert!(result.objects.is_empty());

        let flat = store
            .list(&ListOptions::prefix("mpc/devnet/n1_devnet_1/"))
            .await
            .unwrap();
        let keys: Vec<_> = flat.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "mpc/devnet/n1_devnet_1/data.tar.zst",
                "mpc/devnet/n1_devnet_1/manifest.json"
            ]
        );
    }

    #[tokio::test]
    async fn test_copy_and_progress() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path()).unwrap();
        let seen = Arc::new(AtomicU64::new(0));
        let seen_cb = seen.clone();
        let opts = UploadOptions {
            progress: Some(Arc::new(move |done, _total| {
                seen_cb.store(done, Ordering::SeqCst);
            })),
            ..Default::default()
        };
        store.upload("src", vec![7u8; 64], &opts).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 64);

        store.copy("src", "nested/dst").await.unwrap();
        assert_eq!(store.download("nested/dst").await.unwrap().len(), 64);

        let url = store.signed_url("src", Duration::from_secs(60)).await.unwrap();
        assert!(url.starts_with("file://"));
    }

    #[tokio::test]
    async fn test_metadata_kept_beside_object() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path()).unwrap();
        let mut metadata = BTreeMap::new();
        metadata.insert("mpc-node-id".to_string(), "n1".to_string());
        let opts = UploadOptions {
            content_type: Some("application/json".to_string()),
            metadata,
            ..Default::default()
        };
        store.upload("mpc/devnet/b1/manifest.json", b"{}".to_vec(), &opts).await.unwrap();
        assert!(dir.path().join("mpc/devnet/b1/manifest.json.meta.json").is_file());

        let info = store.get_info("mpc/devnet/b1/manifest.json").await.unwrap();
        assert_eq!(info.content_type.as_deref(), Some("application/json"));
        assert_eq!(info.metadata["mpc-node-id"], "n1");

        let listed = store.list(&ListOptions::prefix("mpc/")).await.unwrap();
        let keys: Vec<_> = listed.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["mpc/devnet/b1/manifest.json"]);
        assert_eq!(listed.objects[0].metadata["mpc-node-id"], "n1");

        store.copy("mpc/devnet/b1/manifest.json", "mpc/devnet/b2/manifest.json").await.unwrap();
        let copied = store.get_info("mpc/devnet/b2/manifest.json").await.unwrap();
        assert_eq!(copied.metadata["mpc-node-id"], "n1");

        assert!(store
            .upload("x.meta.json", vec![], &UploadOptions::default())
            .await
            .is_err());

        store.delete("mpc/devnet/b1/manifest.json").await.unwrap();
        assert!(!dir.path().join("mpc/devnet/b1/manifest.json.meta.json").exists());
    }

    #[tokio::test]
    async fn test_rejects_parent_traversal() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path()).unwrap();
        assert!(store.download("../etc/passwd").await.is_err());
    }
}
