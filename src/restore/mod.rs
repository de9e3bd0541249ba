//! Restore of MPC node backups produced by [`crate::backup::BackupManager`].

use crate::backup::{archive, BackupManager, BackupManifest};
use crate::storage::verify_checksum;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing::{info, span, Instrument, Level};

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub target_dir: PathBuf,
    /// Stop after the checksum has been verified.
    pub verify_only: bool,
    /// Path to an age identity file, needed for encrypted backups.
    pub identity: Option<PathBuf>,
}

/// Download, verify, decrypt, decompress and extract a backup.
pub async fn restore_backup(
    manager: &BackupManager,
    name: &str,
    opts: &RestoreOptions,
) -> Result<BackupManifest> {
    let span = span!(Level::INFO, "backup_restore", backup = %name);
    restore_in_span(manager, name, opts).instrument(span).await
}

async fn restore_in_span(
    manager: &BackupManager,
    name: &str,
    opts: &RestoreOptions,
) -> Result<BackupManifest> {
    let manifest = manager.load_manifest(name).await?;
    let (data_key, compression, encrypted) = manager.find_data_key(name).await?;

    let data = manager
        .storage()
        .download(&data_key)
        .await
        .with_context(|| format!("failed to download {}", data_key))?;

    match manifest.data_checksum() {
        Some(expected) => verify_checksum(&data, expected)?,
        None => bail!("manifest for {} has no data checksum", name),
    }
    info!("Checksum verified for {}", name);

    if opts.verify_only {
        return Ok(manifest);
    }

    let data = if encrypted || manifest.is_encrypted() {
        let identity = opts
            .identity
            .as_ref()
            .with_context(|| format!("backup {} is encrypted: pass an age identity file", name))?;
        let identities = archive::load_identities(identity)?;
        archive::decrypt(&data, &identities)?
    } else {
        data
    };

    let target = opts.target_dir.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let tarball = archive::decompress(&data, compression)?;
        archive::extract_tar(&tarball[..], &target)
    })
    .await
    .context("restore task panicked")??;

    info!("Restored {} into {}", name, opts.target_dir.display());
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupOptions, Compression};
    use crate::storage::{LocalStorage, UploadOptions};
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn seed(root: &Path) -> PathBuf {
        let data = root.join("node");
        fs::create_dir_all(data.join("keys")).unwrap();
        fs::write(data.join("keys/share"), b"threshold share").unwrap();
        fs::write(data.join("config.json"), b"{\"nodeIndex\":0}").unwrap();
        data
    }

    async fn backed_up(root: &Path, compression: Compression) -> (BackupManager, BackupManifest) {
        let storage = Arc::new(LocalStorage::new(root.join("store")).unwrap());
        let manager = BackupManager::new(storage, "testnet");
        let opts = BackupOptions {
            node_id: "abc".to_string(),
            node_name: "mpc-node-1".to_string(),
            data_dir: seed(root),
            compression,
            ..Default::default()
        };
        let manifest = manager.create(&opts).await.unwrap();
        (manager, manifest)
    }

    #[tokio::test]
    async fn test_restore_extracts_files() {
        let dir = TempDir::new().unwrap();
        for compression in Compression::all() {
            let (manager, manifest) = backed_up(dir.path(), compression).await;
            let target = dir.path().join(format!("restored-{}", compression));
            let opts = RestoreOptions {
                target_dir: target.clone(),
                ..Default::default()
            };
            manager.restore(&manifest.name, &opts).await.unwrap();
            assert_eq!(fs::read(target.join("keys/share")).unwrap(), b"threshold share");
            manager.delete(&manifest.name).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_verify_only_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let (manager, manifest) = backed_up(dir.path(), Compression::Zstd).await;
        let target = dir.path().join("restored");

        let checked = manager.verify(&manifest.name).await.unwrap();
        assert_eq!(checked.node_id, "abc");
        assert!(!target.exists());

        let key = manager.data_key(&manifest.name, Compression::Zstd, false);
        manager
            .storage()
            .upload(&key, b"corrupted".to_vec(), &UploadOptions::default())
            .await
            .unwrap();
        let err = manager.verify(&manifest.name).await.unwrap_err();
        assert!(err.to_string().starts_with("checksum mismatch: expected"));
    }

    #[cfg(feature = "encryption")]
    #[tokio::test]
    async fn test_encrypted_restore_needs_identity() {
        use age::secrecy::ExposeSecret;

        let dir = TempDir::new().unwrap();
        let identity = age::x25519::Identity::generate();
        let identity_file = dir.path().join("age.key");
        fs::write(&identity_file, identity.to_string().expose_secret()).unwrap();

        let storage = Arc::new(LocalStorage::new(dir.path().join("store")).unwrap());
        let manager = BackupManager::new(storage, "mainnet");
        let opts = BackupOptions {
            node_id: "abc".to_string(),
            data_dir: seed(dir.path()),
            encrypt: true,
            recipients: vec![identity.to_public().to_string()],
            ..Default::default()
        };
        let manifest = manager.create(&opts).await.unwrap();
        assert!(manifest.is_encrypted());

        let target = dir.path().join("restored");
        let mut restore = RestoreOptions {
            target_dir: target.clone(),
            ..Default::default()
        };
        let err = manager.restore(&manifest.name, &restore).await.unwrap_err();
        assert!(err.to_string().contains("is encrypted"));

        restore.identity = Some(identity_file);
        manager.restore(&manifest.name, &restore).await.unwrap();
        assert!(target.join("config.json").exists());
    }
}
