//! MPC node backups.
//!
//! A backup is a tar of the node data directory, compressed (zstd by default),
//! optionally age-encrypted, checksummed and uploaded to a [`Storage`] backend
//! under `mpc/<network>/<name>/` together with a JSON manifest.

pub mod archive;
pub mod manifest;

pub use archive::Compression;
pub use manifest::{BackupManifest, EncryptionInfo};

use crate::restore::{self, RestoreOptions};
use crate::storage::{compute_checksum, join_key, list_all, ListOptions, Storage, UploadOptions};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, span, warn, Instrument, Level};
use walkdir::WalkDir;

pub const MANIFEST_FILE: &str = "manifest.json";
const DATA_PREFIX: &str = "data";

/// Receives stage names such as `archiving` or `uploading`.
pub type StageFn = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct BackupOptions {
    pub node_id: String,
    pub node_name: String,
    pub data_dir: PathBuf,
    pub incremental: bool,
    /// Unix seconds of the base backup; files older than this are skipped.
    pub base_version: Option<u64>,
    pub compression: Compression,
    pub encrypt: bool,
    pub recipients: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub progress: Option<StageFn>,
}

impl BackupOptions {
    fn stage(&self, name: &str) {
        if let Some(progress) = &self.progress {
            progress(name);
        }
    }
}

pub struct BackupManager {
    storage: Arc<dyn Storage>,
    network: String,
}

impl BackupManager {
    pub fn new(storage: Arc<dyn Storage>, network: &str) -> Self {
        Self {
            storage,
            network: network.to_string(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn backup_prefix(&self, name: &str) -> String {
        format!("{}/", join_key(&["mpc", &self.network, name]))
    }

    pub fn manifest_key(&self, name: &str) -> String {
        join_key(&["mpc", &self.network, name, MANIFEST_FILE])
    }

    pub fn data_key(&self, name: &str, compression: Compression, encrypted: bool) -> String {
        let mut file = format!("{}{}", DATA_PREFIX, compression.extension());
        if encrypted {
            file.push_str(archive::ENCRYPTED_SUFFIX);
        }
        join_key(&["mpc", &self.network, name, &file])
    }

    pub fn backup_name(node_id: &str, network: &str, timestamp: &DateTime<Utc>) -> String {
        format!("{}_{}_{}", node_id, network, timestamp.format("%Y%m%d-%H%M%S"))
    }

    /// Archive, compress, encrypt and upload a node's data directory.
    pub async fn create(&self, opts: &BackupOptions) -> Result<BackupManifest> {
        let span = span!(Level::INFO, "backup_create", node = %opts.node_name);
        self.create_in_span(opts).instrument(span).await
    }

    async fn create_in_span(&self, opts: &BackupOptions) -> Result<BackupManifest> {
        if !opts.data_dir.is_dir() {
            bail!("data directory {} does not exist", opts.data_dir.display());
        }
        if opts.encrypt && opts.recipients.is_empty() {
            bail!("encryption requested but no recipients provided");
        }

        let timestamp = Utc::now();
        let name = Self::backup_name(&opts.node_id, &self.network, &timestamp);
        let mut manifest =
            BackupManifest::new(&opts.node_id, &opts.node_name, &self.network, timestamp);
        manifest.incremental = opts.incremental;
        manifest.base_version = opts.base_version.filter(|_| opts.incremental);
        manifest.metadata = opts.metadata.clone();
        manifest.compression = opts.compression;
        manifest.wallet_count = count_files(&opts.data_dir.join("wallets"));
        manifest.key_count = count_files(&opts.data_dir.join("keys"));
        manifest.name = name.clone();

        info!("Creating backup {} from {}", name, opts.data_dir.display());

        opts.stage("archiving");
        let data_dir = opts.data_dir.clone();
        let since = manifest.base_version;
        let tarball = tokio::task::spawn_blocking(move || archive_since(&data_dir, since))
            .await
            .context("archive task panicked")??;
        debug!("archive size: {} bytes", tarball.len());

        opts.stage("compressing");
        let compression = opts.compression;
        let mut payload = tokio::task::spawn_blocking(move || archive::compress(&tarball, compression))
            .await
            .context("compression task panicked")??;

        if opts.encrypt {
            opts.stage("encrypting");
            payload = archive::encrypt(&payload, &opts.recipients)?;
            manifest.encryption = Some(EncryptionInfo::age(&opts.recipients));
        }

        let checksum = compute_checksum(&payload);
        manifest
            .checksums
            .insert(manifest::DATA_CHECKSUM.to_string(), checksum);
        manifest.size = payload.len() as u64;

        opts.stage("uploading");
        let mut metadata = BTreeMap::new();
        metadata.insert("mpc-node-id".to_string(), opts.node_id.clone());
        metadata.insert("mpc-network".to_string(), self.network.clone());
        metadata.insert("mpc-timestamp".to_string(), timestamp.to_rfc3339());
        let data_key = self.data_key(&name, opts.compression, opts.encrypt);
        self.storage
            .upload(
                &data_key,
                payload,
                &UploadOptions {
                    content_type: Some("application/octet-stream".to_string()),
                    metadata,
                    progress: None,
                },
            )
            .await
            .with_context(|| format!("failed to upload backup data to {}", data_key))?;

        let manifest_json = serde_json::to_vec_pretty(&manifest)?;
        self.storage
            .upload(
                &self.manifest_key(&name),
                manifest_json,
                &UploadOptions {
                    content_type: Some("application/json".to_string()),
                    ..Default::default()
                },
            )
            .await
            .context("failed to upload manifest")?;

        opts.stage("done");
        info!("Backup {} uploaded ({} bytes)", name, manifest.size);
        Ok(manifest)
    }

    /// Manifests of every backup for this network, newest first.
    pub async fn list(&self) -> Result<Vec<BackupManifest>> {
        let prefix = format!("{}/", join_key(&["mpc", &self.network]));
        let listing = list_all(
            self.storage.as_ref(),
            &ListOptions::prefix(prefix).with_delimiter("/"),
        )
        .await
        .context("failed to list backups")?;

        let mut manifests = Vec::new();
        for dir in listing.common_prefixes {
            let name = dir.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
            match self.load_manifest(name).await {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => debug!("skipping {}: {:#}", dir, e),
            }
        }
        manifests.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(manifests)
    }

    pub async fn load_manifest(&self, name: &str) -> Result<BackupManifest> {
        let raw = self
            .storage
            .download(&self.manifest_key(name))
            .await
            .with_context(|| format!("failed to download manifest for {}", name))?;
        let mut manifest: BackupManifest =
            serde_json::from_slice(&raw).context("failed to parse manifest")?;
        manifest.name = name.to_string();
        Ok(manifest)
    }

    /// Download, verify and unpack a backup.
    pub async fn restore(&self, name: &str, opts: &RestoreOptions) -> Result<BackupManifest> {
        restore::restore_backup(self, name, opts).await
    }

    /// Download and verify the checksum without extracting.
    pub async fn verify(&self, name: &str) -> Result<BackupManifest> {
        let opts = RestoreOptions {
            verify_only: true,
            ..Default::default()
        };
        restore::restore_backup(self, name, &opts).await
    }

    /// Remove every object belonging to a backup.
    pub async fn delete(&self, name: &str) -> Result<usize> {
        let listing = list_all(self.storage.as_ref(), &ListOptions::prefix(self.backup_prefix(name)))
            .await
            .context("failed to list backup files")?;
        let keys: Vec<String> = listing.objects.into_iter().map(|o| o.key).collect();
        if keys.is_empty() {
            bail!("backup not found: {}", name);
        }
        self.storage.delete_many(&keys).await?;
        info!("Deleted backup {} ({} objects)", name, keys.len());
        Ok(keys.len())
    }

    /// Find the uploaded data object for `name`.
    pub(crate) async fn find_data_key(&self, name: &str) -> Result<(String, Compression, bool)> {
        for compression in Compression::all() {
            for encrypted in [false, true] {
                let key = self.data_key(name, compression, encrypted);
                match self.storage.exists(&key).await {
                    Ok(true) => return Ok((key, compression, encrypted)),
                    Ok(false) => {}
                    Err(e) => warn!("failed to check {}: {}", key, e),
                }
            }
        }
        bail!("backup data not found for {}", name)
    }
}

fn archive_since(dir: &Path, since: Option<u64>) -> Result<Vec<u8>> {
    match since {
        None => archive::tar_directory(dir),
        Some(secs) => archive::write_tar(Vec::new(), dir, move |_, meta| {
            meta.modified()
                .ok()
                .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() >= secs)
                .unwrap_or(true)
        }),
    }
}

fn count_files(dir: &Path) -> usize {
    if !dir.is_dir() {
        return 0;
    }
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn node_data(root: &Path) -> PathBuf {
        let data = root.join("node");
        fs::create_dir_all(data.join("db")).unwrap();
        fs::create_dir_all(data.join("keys")).unwrap();
        fs::create_dir_all(data.join("wallets")).unwrap();
        fs::write(data.join("db/MANIFEST-000001"), b"badger").unwrap();
        fs::write(data.join("keys/k1"), b"share-1").unwrap();
        fs::write(data.join("keys/k2"), b"share-2").unwrap();
        fs::write(data.join("wallets/w1.json"), b"{}").unwrap();
        data
    }

    fn manager(root: &Path) -> BackupManager {
        let storage = Arc::new(LocalStorage::new(root.join("store")).unwrap());
        BackupManager::new(storage, "devnet")
    }

    #[tokio::test]
    async fn test_create_uploads_data_and_manifest() {
        let dir = TempDir::new().unwrap();
        let data = node_data(dir.path());
        let manager = manager(dir.path());

        let stages = Arc::new(Mutex::new(Vec::new()));
        let seen = stages.clone();
        let opts = BackupOptions {
            node_id: "node1".to_string(),
            node_name: "mpc-node-1".to_string(),
            data_dir: data,
            progress: Some(Arc::new(move |s: &str| seen.lock().unwrap().push(s.to_string()))),
            ..Default::default()
        };
        let manifest = manager.create(&opts).await.unwrap();

        assert!(manifest.name.starts_with("node1_devnet_"));
        assert_eq!(manifest.key_count, 2);
        assert_eq!(manifest.wallet_count, 1);
        assert!(manifest.data_checksum().is_some());
        assert_eq!(
            *stages.lock().unwrap(),
            vec!["archiving", "compressing", "uploading", "done"]
        );

        let data_key = manager.data_key(&manifest.name, Compression::Zstd, false);
        assert!(data_key.ends_with("/data.tar.zst"));
        assert!(manager.storage().exists(&data_key).await.unwrap());

        let listed = manager.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, manifest.name);
    }

    #[tokio::test]
    async fn test_encrypt_without_recipients_fails() {
        let dir = TempDir::new().unwrap();
        let data = node_data(dir.path());
        let opts = BackupOptions {
            node_id: "n".to_string(),
            data_dir: data,
            encrypt: true,
            ..Default::default()
        };
        let err = manager(dir.path()).create(&opts).await.unwrap_err();
        assert_eq!(err.to_string(), "encryption requested but no recipients provided");
    }

    #[tokio::test]
    async fn test_delete_removes_all_objects() {
        let dir = TempDir::new().unwrap();
        let data = node_data(dir.path());
        let manager = manager(dir.path());
        let opts = BackupOptions {
            node_id: "n".to_string(),
            data_dir: data,
            compression: Compression::Gzip,
            ..Default::default()
        };
        let manifest = manager.create(&opts).await.unwrap();

        assert_eq!(manager.delete(&manifest.name).await.unwrap(), 2);
        assert!(manager.list().await.unwrap().is_empty());
        let err = manager.delete(&manifest.name).await.unwrap_err();
        assert_eq!(err.to_string(), format!("backup not found: {}", manifest.name));
    }

    /// Local storage that never returns more than one entry per page.
    struct OnePerPage(LocalStorage);

    #[async_trait::async_trait]
    impl Storage for OnePerPage {
        async fn upload(&self, key: &str, data: Vec<u8>, opts: &UploadOptions) -> crate::error::Result<()> {
            self.0.upload(key, data, opts).await
        }
        async fn download(&self, key: &str) -> crate::error::Result<Vec<u8>> {
            self.0.download(key).await
        }
        async fn delete(&self, key: &str) -> crate::error::Result<()> {
            self.0.delete(key).await
        }
        async fn exists(&self, key: &str) -> crate::error::Result<bool> {
            self.0.exists(key).await
        }
        async fn get_info(&self, key: &str) -> crate::error::Result<crate::storage::ObjectInfo> {
            self.0.get_info(key).await
        }
        async fn list(&self, opts: &ListOptions) -> crate::error::Result<crate::storage::ListResult> {
            let mut opts = opts.clone();
            opts.max_keys = Some(1);
            self.0.list(&opts).await
        }
        async fn signed_url(&self, key: &str, expiry: std::time::Duration) -> crate::error::Result<String> {
            self.0.signed_url(key, expiry).await
        }
        async fn copy(&self, src: &str, dst: &str) -> crate::error::Result<()> {
            self.0.copy(src, dst).await
        }
        fn provider(&self) -> crate::storage::Provider {
            self.0.provider()
        }
        fn bucket(&self) -> &str {
            self.0.bucket()
        }
    }

    #[tokio::test]
    async fn test_list_and_delete_span_pages() {
        use chrono::TimeZone;
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(OnePerPage(LocalStorage::new(dir.path().join("store")).unwrap()));
        let manager = BackupManager::new(storage.clone(), "devnet");
        for hour in 1..=3 {
            let ts = Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap();
            let name = BackupManager::backup_name("n", "devnet", &ts);
            let manifest = BackupManifest::new("n", "node", "devnet", ts);
            storage
                .upload(
                    &manager.manifest_key(&name),
                    serde_json::to_vec(&manifest).unwrap(),
                    &UploadOptions::default(),
                )
                .await
                .unwrap();
            storage
                .upload(&manager.data_key(&name, Compression::Zstd, false), vec![hour as u8], &UploadOptions::default())
                .await
                .unwrap();
        }

        let listed = manager.list().await.unwrap();
        let names: Vec<&str> = listed.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["n_devnet_20250101-030000", "n_devnet_20250101-020000", "n_devnet_20250101-010000"]
        );

        assert_eq!(manager.delete("n_devnet_20250101-020000").await.unwrap(), 2);
        assert_eq!(manager.list().await.unwrap().len(), 2);
    }

    #[test]
    fn test_backup_name_format() {
        use chrono::TimeZone;
        let ts = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            BackupManager::backup_name("abc", "mainnet", &ts),
            "abc_mainnet_20250304-050607"
        );
    }
}
