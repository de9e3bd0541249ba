//! Local MPC node lifecycle: network layout on disk, detached `mpcd`
//! processes and their pid files.

use super::{base_ports, validate_threshold};
use crate::constants::MPCD_BINARY;
use crate::process;
use crate::ux::format_duration;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

const NETWORK_FILE: &str = "network.json";
const NODE_CONFIG_FILE: &str = "config.json";
const PID_FILE: &str = "node.pid";
const START_TIME_FILE: &str = "start_time";
const NETWORK_DIR_PREFIX: &str = "mpc-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Stopped => "stopped",
            NodeStatus::Starting => "starting",
            NodeStatus::Running => "running",
            NodeStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    pub node_id: String,
    pub node_name: String,
    /// 0-based position in the network.
    pub node_index: usize,
    pub threshold: usize,
    pub total_nodes: usize,
    pub network: String,
    pub listen_addr: String,
    pub p2p_port: u16,
    pub api_port: u16,
    pub peers: Vec<String>,
    pub data_dir: PathBuf,
    pub keys_dir: PathBuf,
    pub log_level: String,
    pub created: DateTime<Utc>,
}

impl NodeConfig {
    pub fn pid_file(&self) -> PathBuf {
        self.data_dir.join(PID_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("logs").join("node.log")
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.listen_addr)
    }

    /// Arguments passed to `mpcd start`.
    pub fn mpcd_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "start".into(),
            "--node-id".into(),
            self.node_id.clone(),
            "--listen".into(),
            format!(":{}", self.p2p_port),
            "--api".into(),
            format!(":{}", self.api_port),
            "--data".into(),
            self.data_dir.join("db").display().to_string(),
            "--keys".into(),
            self.keys_dir.display().to_string(),
            "--threshold".into(),
            self.threshold.to_string(),
            "--log-level".into(),
            self.log_level.clone(),
            "--mode".into(),
            "consensus".into(),
        ];
        for peer in &self.peers {
            args.push("--peer".into());
            args.push(peer.clone());
        }
        args
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub network_id: String,
    pub network_name: String,
    pub network_type: String,
    pub threshold: usize,
    pub total_nodes: usize,
    pub nodes: Vec<NodeConfig>,
    pub created: DateTime<Utc>,
    pub base_dir: PathBuf,
}

impl NetworkConfig {
    pub fn node(&self, name: &str) -> Result<&NodeConfig> {
        self.nodes
            .iter()
            .find(|n| n.node_name == name)
            .with_context(|| format!("node {} not found in {}", name, self.network_name))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub config: NodeConfig,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Manages MPC networks under a base directory (`~/.lux/mpc`).
#[derive(Debug, Clone)]
pub struct NodeManager {
    base_dir: PathBuf,
    mpcd: Option<PathBuf>,
}

impl NodeManager {
    /// `binary_path` is the configured `mpc.binaryPath`, if any.
    pub fn new(base_dir: impl Into<PathBuf>, binary_path: Option<&Path>) -> Self {
        Self {
            base_dir: base_dir.into(),
            mpcd: find_mpcd(binary_path),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn mpcd(&self) -> Option<&Path> {
        self.mpcd.as_deref()
    }

    fn keys_root(&self) -> PathBuf {
        self.base_dir
            .parent()
            .unwrap_or(&self.base_dir)
            .join("keys")
            .join("mpc")
    }

    /// Lay out a new t-of-n network on disk.
    pub fn init_network(
        &self,
        network_type: &str,
        threshold: usize,
        total_nodes: usize,
    ) -> Result<NetworkConfig> {
        validate_threshold(threshold, total_nodes)?;
        let (p2p_base, api_base) = base_ports(network_type);
        let last_port = usize::from(p2p_base.max(api_base)) + total_nodes - 1;
        if last_port > usize::from(u16::MAX) {
            bail!("too many nodes: port {} would exceed {}", last_port, u16::MAX);
        }

        let network_id = Uuid::new_v4().simple().to_string()[..16].to_string();
        let network_name = format!("mpc-{}-{}", network_type, &network_id[..8]);
        let network_dir = self.base_dir.join(&network_name);
        create_dir_with_mode(&network_dir, 0o750)
            .context("failed to create network directory")?;
        let keys_dir = self.keys_root().join(&network_name);
        create_dir_with_mode(&keys_dir, 0o700).context("failed to create keys directory")?;

        let peers: Vec<String> = (0..total_nodes)
            .map(|i| format!("127.0.0.1:{}", p2p_base as usize + i))
            .collect();

        let mut nodes = Vec::with_capacity(total_nodes);
        for i in 0..total_nodes {
            let node_name = format!("mpc-node-{}", i + 1);
            let node_dir = network_dir.join(&node_name);
            for sub in ["db", "logs"] {
                create_dir_with_mode(&node_dir.join(sub), 0o750)
                    .with_context(|| format!("failed to create {} directory", sub))?;
            }

            let node = NodeConfig {
                node_id: Uuid::new_v4().simple().to_string(),
                node_name: node_name.clone(),
                node_index: i,
                threshold,
                total_nodes,
                network: network_type.to_string(),
                listen_addr: format!("127.0.0.1:{}", api_base as usize + i),
                p2p_port: p2p_base + i as u16,
                api_port: api_base + i as u16,
                peers: peers
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, p)| p.clone())
                    .collect(),
                data_dir: node_dir.clone(),
                keys_dir: keys_dir.join(&node_name),
                log_level: "info".to_string(),
                created: Utc::now(),
            };
            create_dir_with_mode(&node.keys_dir, 0o700)
                .context("failed to create node keys directory")?;
            write_config(&node_dir.join(NODE_CONFIG_FILE), &node)?;
            nodes.push(node);
        }

        let network = NetworkConfig {
            network_id,
            network_name,
            network_type: network_type.to_string(),
            threshold,
            total_nodes,
            nodes,
            created: Utc::now(),
            base_dir: network_dir.clone(),
        };
        write_config(&network_dir.join(NETWORK_FILE), &network)?;
        info!(
            "Initialized MPC network {} ({}-of-{})",
            network.network_name, threshold, total_nodes
        );
        Ok(network)
    }

    pub fn load_network(&self, name: &str) -> Result<NetworkConfig> {
        let path = self.base_dir.join(name).join(NETWORK_FILE);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read network config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse network config {}", path.display()))
    }

    /// Every readable network, oldest first.
    pub fn list_networks(&self) -> Result<Vec<NetworkConfig>> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut networks = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.file_type()?.is_dir() || !name.starts_with(NETWORK_DIR_PREFIX) {
                continue;
            }
            match self.load_network(&name) {
                Ok(network) => networks.push(network),
                Err(e) => debug!("skipping {}: {:#}", name, e),
            }
        }
        networks.sort_by_key(|n| n.created);
        Ok(networks)
    }

    /// Pick the named network, else the newest of `network_type`, else the newest.
    pub fn resolve_network(
        &self,
        name: Option<&str>,
        network_type: Option<&str>,
    ) -> Result<NetworkConfig> {
        if let Some(name) = name {
            return self.load_network(name);
        }
        let mut networks = self.list_networks()?;
        if let Some(kind) = network_type {
            if let Some(pos) = networks.iter().rposition(|n| n.network_type == kind) {
                return Ok(networks.swap_remove(pos));
            }
        }
        networks
            .pop()
            .context("no MPC networks found, run 'lux mpc node init' first")
    }

    /// Start every node, stopping at the first failure.
    pub fn start_network(&self, name: &str) -> Result<()> {
        let network = self.load_network(name)?;
        for node in &network.nodes {
            self.start_node(node)
                .with_context(|| format!("failed to start node {}", node.node_name))?;
        }
        Ok(())
    }

    pub fn start_node(&self, node: &NodeConfig) -> Result<u32> {
        if self.node_status(node).status == NodeStatus::Running {
            bail!("node {} is already running", node.node_name);
        }

        let log_file = node.log_file();
        let pid = match &self.mpcd {
            Some(binary) => process::spawn_detached(binary, &node.mpcd_args(), &log_file)?,
            None => {
                warn!("{} not found, starting placeholder for {}", MPCD_BINARY, node.node_name);
                let script = format!(
                    "echo 'MPC Node {} (placeholder) started at {}'; trap 'exit 0' TERM; while true; do sleep 1; done",
                    node.node_name,
                    Utc::now().to_rfc3339()
                );
                let sh = process::find_in_path("sh").unwrap_or_else(|| PathBuf::from("/bin/sh"));
                process::spawn_detached(&sh, &["-c".to_string(), script], &log_file)?
            }
        };

        if let Err(e) = fs::write(node.pid_file(), pid.to_string()) {
            let _ = process::terminate(pid);
            return Err(e).with_context(|| format!("failed to save PID for {}", node.node_name));
        }
        fs::write(node.data_dir.join(START_TIME_FILE), Utc::now().to_rfc3339())
            .context("failed to save start time")?;
        info!("Started {} (pid {})", node.node_name, pid);
        Ok(pid)
    }

    /// Stop every node; failures are logged and skipped.
    pub fn stop_network(&self, name: &str) -> Result<()> {
        let network = self.load_network(name)?;
        for node in &network.nodes {
            if let Err(e) = self.stop_node(node) {
                warn!("failed to stop node {}: {:#}", node.node_name, e);
            }
        }
        Ok(())
    }

    pub fn stop_node(&self, node: &NodeConfig) -> Result<()> {
        let pid = match process::read_pid_file(&node.pid_file())? {
            Some(pid) => pid,
            None => return Ok(()),
        };
        if !process::terminate(pid)? {
            debug!("{} (pid {}) was not running", node.node_name, pid);
        }
        let _ = fs::remove_file(node.pid_file());
        let _ = fs::remove_file(node.data_dir.join(START_TIME_FILE));
        info!("Stopped {}", node.node_name);
        Ok(())
    }

    pub fn node_status(&self, node: &NodeConfig) -> NodeInfo {
        let mut info = NodeInfo {
            config: node.clone(),
            status: NodeStatus::Stopped,
            pid: None,
            start_time: None,
            uptime: None,
            endpoint: node.endpoint(),
            error: None,
        };
        match process::read_pid_file(&node.pid_file()) {
            Ok(Some(pid)) if process::is_alive(pid) => {
                info.status = NodeStatus::Running;
                info.pid = Some(pid);
                info.start_time = fs::read_to_string(node.data_dir.join(START_TIME_FILE))
                    .ok()
                    .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
                    .map(|t| t.with_timezone(&Utc));
                info.uptime = info
                    .start_time
                    .map(|t| format_duration((Utc::now() - t).num_seconds()));
            }
            Ok(_) => {}
            Err(e) => {
                info.status = NodeStatus::Error;
                info.error = Some(format!("{:#}", e));
            }
        }
        info
    }

    pub fn network_status(&self, name: &str) -> Result<Vec<NodeInfo>> {
        let network = self.load_network(name)?;
        Ok(network.nodes.iter().map(|n| self.node_status(n)).collect())
    }

    /// Stop and remove a network and its key directory.
    pub fn delete_network(&self, name: &str, force: bool) -> Result<()> {
        let network = self.load_network(name)?;
        if let Err(e) = self.stop_network(name) {
            if !force {
                return Err(e.context("failed to stop network"));
            }
        }
        fs::remove_dir_all(&network.base_dir).with_context(|| {
            format!("failed to remove network directory {}", network.base_dir.display())
        })?;
        let keys_dir = self.keys_root().join(name);
        if keys_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&keys_dir) {
                warn!("failed to remove keys directory {}: {}", keys_dir.display(), e);
            }
        }
        info!("Deleted MPC network {}", name);
        Ok(())
    }
}

/// Locate `mpcd`: configured path, PATH, system dirs, then Go bin dirs.
pub fn find_mpcd(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        warn!("configured mpcd binary {} does not exist", path.display());
    }
    if let Some(path) = process::find_in_path(MPCD_BINARY) {
        return Some(path);
    }
    let mut candidates = vec![
        PathBuf::from("/usr/local/bin").join(MPCD_BINARY),
        PathBuf::from("/usr/bin").join(MPCD_BINARY),
    ];
    if let Some(gopath) = std::env::var_os("GOPATH") {
        candidates.push(PathBuf::from(gopath).join("bin").join(MPCD_BINARY));
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join("go").join("bin").join(MPCD_BINARY));
    }
    candidates.into_iter().find(|p| p.is_file())
}

fn write_config<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)?;
    fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))?;
    set_mode(path, 0o640)
}

fn create_dir_with_mode(path: &Path, mode: u32) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))?;
    set_mode(path, mode)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> NodeManager {
        NodeManager {
            base_dir: dir.path().join("mpc"),
            mpcd: None,
        }
    }

    #[test]
    fn test_init_network_layout() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        let network = m.init_network("testnet", 2, 3).unwrap();

        assert!(network.network_name.starts_with("mpc-testnet-"));
        assert_eq!(network.network_id.len(), 16);
        assert_eq!(network.nodes.len(), 3);

        let second = &network.nodes[1];
        assert_eq!(second.node_name, "mpc-node-2");
        assert_eq!(second.node_id.len(), 32);
        assert_eq!(second.p2p_port, 9711);
        assert_eq!(second.listen_addr, "127.0.0.1:9811");
        assert_eq!(second.peers, vec!["127.0.0.1:9710", "127.0.0.1:9712"]);
        assert!(second.data_dir.join("db").is_dir());
        assert!(second.data_dir.join("config.json").is_file());
        assert!(second.keys_dir.starts_with(dir.path().join("keys/mpc")));
        assert!(second.keys_dir.is_dir());

        assert_eq!(m.load_network(&network.network_name).unwrap(), network);
    }

    #[test]
    fn test_init_network_rejects_port_overflow() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        let err = m.init_network("mainnet", 2, 70_000).unwrap_err();
        assert_eq!(err.to_string(), "too many nodes: port 79799 would exceed 65535");
        assert!(!dir.path().join("mpc").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_keys_dir_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let network = manager(&dir).init_network("devnet", 2, 2).unwrap();
        let mode = fs::metadata(&network.nodes[0].keys_dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_mpcd_args() {
        let dir = TempDir::new().unwrap();
        let network = manager(&dir).init_network("mainnet", 2, 3).unwrap();
        let args = network.nodes[0].mpcd_args();
        assert_eq!(&args[..3], &["start", "--node-id", network.nodes[0].node_id.as_str()]);
        assert!(args.windows(2).any(|w| w == ["--listen", ":9700"]));
        assert!(args.windows(2).any(|w| w == ["--mode", "consensus"]));
        assert_eq!(args.iter().filter(|a| *a == "--peer").count(), 2);
    }

    #[test]
    fn test_resolve_network() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        let err = m.resolve_network(None, None).unwrap_err();
        assert_eq!(err.to_string(), "no MPC networks found, run 'lux mpc node init' first");

        let dev = m.init_network("devnet", 2, 2).unwrap();
        let test = m.init_network("testnet", 2, 2).unwrap();
        assert_eq!(m.list_networks().unwrap().len(), 2);
        assert_eq!(m.resolve_network(None, Some("devnet")).unwrap(), dev);
        assert_eq!(m.resolve_network(None, Some("mainnet")).unwrap(), test);
        assert_eq!(m.resolve_network(Some(&dev.network_name), None).unwrap(), dev);
    }

    #[test]
    fn test_start_status_stop_placeholder() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        let network = m.init_network("devnet", 2, 2).unwrap();
        let name = network.network_name.clone();

        m.start_network(&name).unwrap();
        let statuses = m.network_status(&name).unwrap();
        assert!(statuses.iter().all(|s| s.status == NodeStatus::Running));
        assert!(statuses[0].uptime.is_some());
        assert_eq!(statuses[0].endpoint, "http://127.0.0.1:9820");

        let err = m.start_node(&network.nodes[0]).unwrap_err();
        assert_eq!(err.to_string(), "node mpc-node-1 is already running");

        m.stop_network(&name).unwrap();
        let statuses = m.network_status(&name).unwrap();
        assert!(statuses.iter().all(|s| s.status == NodeStatus::Stopped));
        assert!(!network.nodes[0].pid_file().exists());

        m.delete_network(&name, false).unwrap();
        assert!(m.list_networks().unwrap().is_empty());
        assert!(!dir.path().join("keys/mpc").join(&name).exists());
    }

    #[test]
    fn test_invalid_pid_reports_error() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        let network = m.init_network("devnet", 2, 2).unwrap();
        fs::write(network.nodes[0].pid_file(), "garbage").unwrap();
        assert_eq!(m.node_status(&network.nodes[0]).status, NodeStatus::Error);
        assert!(m.stop_node(&network.nodes[0]).is_err());
        assert!(m.list_networks().unwrap()[0].nodes.len() == 2);
    }
}
