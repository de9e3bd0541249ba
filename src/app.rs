//! On-disk layout of the CLI state directory.

use crate::constants::*;
use crate::models::{Network, NetworkData, Sidecar};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Handle to the CLI base directory (`~/.lux` by default).
#[derive(Debug, Clone)]
pub struct Application {
    base_dir: PathBuf,
}

impl Application {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Application rooted at `$LUX_HOME` or `~/.lux`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(crate::config::base_dir()?))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn subnet_dir(&self) -> PathBuf {
        self.base_dir.join(SUBNET_DIR)
    }

    pub fn blockchain_dir(&self, name: &str) -> PathBuf {
        self.subnet_dir().join(name)
    }

    pub fn sidecar_path(&self, name: &str) -> PathBuf {
        self.blockchain_dir(name).join(SIDECAR_FILE_NAME)
    }

    pub fn genesis_path(&self, name: &str) -> PathBuf {
        self.blockchain_dir(name).join(GENESIS_FILE_NAME)
    }

    pub fn chain_config_path(&self, name: &str) -> PathBuf {
        self.blockchain_dir(name).join(CHAIN_CONFIG_FILE_NAME)
    }

    pub fn subnet_config_path(&self, name: &str) -> PathBuf {
        self.blockchain_dir(name).join(SUBNET_CONFIG_FILE_NAME)
    }

    pub fn upgrade_path(&self, name: &str) -> PathBuf {
        self.blockchain_dir(name).join(UPGRADE_FILE_NAME)
    }

    pub fn custom_vm_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(VMS_DIR).join(name)
    }

    pub fn key_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(KEY_DIR).join(format!("{}{}", name, KEY_SUFFIX))
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.base_dir.join(SNAPSHOTS_DIR)
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.base_dir.join(RUNS_DIR)
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.base_dir.join(BIN_DIR)
    }

    /// MPC state directory, overridable with `MPC_DATA_DIR`.
    pub fn mpc_dir(&self) -> PathBuf {
        match std::env::var_os(MPC_DATA_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => self.base_dir.join(MPC_DIR),
        }
    }

    pub fn mpc_backup_dir(&self) -> PathBuf {
        self.mpc_dir().join("backups")
    }

    pub fn sidecar_exists(&self, name: &str) -> bool {
        self.sidecar_path(name).is_file()
    }

    pub fn genesis_exists(&self, name: &str) -> bool {
        self.genesis_path(name).is_file()
    }

    pub fn load_sidecar(&self, name: &str) -> Result<Sidecar> {
        let path = self.sidecar_path(name);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read sidecar {}", path.display()))?;
        let sc = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse sidecar {}", path.display()))?;
        Ok(sc)
    }

    pub fn create_sidecar(&self, sc: &mut Sidecar) -> Result<()> {
        if sc.name.is_empty() {
            bail!("sidecar has no name");
        }
        sc.version = crate::VERSION.to_string();
        fs::create_dir_all(self.blockchain_dir(&sc.name))?;
        write_json(&self.sidecar_path(&sc.name), sc)
    }

    pub fn update_sidecar(&self, sc: &mut Sidecar) -> Result<()> {
        self.create_sidecar(sc)
    }

    /// Record the deployment IDs of `sc` on `network` and persist it.
    pub fn update_sidecar_networks(
        &self,
        sc: &mut Sidecar,
        network: Network,
        subnet_id: &str,
        blockchain_id: &str,
        rpc_endpoints: Vec<String>,
    ) -> Result<()> {
        sc.networks.insert(
            network.name().to_string(),
            NetworkData {
                subnet_id: subnet_id.to_string(),
                blockchain_id: blockchain_id.to_string(),
                rpc_version: sc.rpc_version,
                rpc_endpoints,
            },
        );
        self.update_sidecar(sc)
    }

    pub fn write_genesis_file(&self, name: &str, genesis: &[u8]) -> Result<()> {
        fs::create_dir_all(self.blockchain_dir(name))?;
        fs::write(self.genesis_path(name), genesis)
            .with_context(|| format!("failed to write genesis for {}", name))?;
        Ok(())
    }

    pub fn load_genesis(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.genesis_path(name);
        fs::read(&path).with_context(|| format!("failed to read genesis {}", path.display()))
    }

    /// Names of every blockchain with a sidecar, sorted.
    pub fn get_sidecar_names(&self) -> Result<Vec<String>> {
        let dir = self.subnet_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if entry.path().join(SIDECAR_FILE_NAME).is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn remove_blockchain(&self, name: &str) -> Result<()> {
        let dir = self.blockchain_dir(name);
        fs::remove_dir_all(&dir)
            .with_context(|| format!("failed to remove {}", dir.display()))?;
        let vm = self.custom_vm_path(name);
        if vm.exists() {
            fs::remove_file(&vm)?;
        }
        Ok(())
    }
}

/// Write pretty JSON with four space indentation.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    fs::write(path, buf).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
