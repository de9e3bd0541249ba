//! Local multi-node networks run from detached `luxd` processes.
//!
//! Each network type owns `runs/<type>/` with one `run_<i>` data directory per
//! node and a `network.json` describing the live processes.

pub mod control;

pub use control::{clean, start, status, stop, CleanReport, NodeRow, StartOptions, StopOptions, StopOutcome};

use crate::app::{write_json, Application};
use crate::config::Config;
use crate::constants::{NETWORK_STATE_FILE, SERVER_RUN_DIR};
use crate::process;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mainnet,
    Testnet,
    Devnet,
    Custom,
}

impl NetworkType {
    pub fn all() -> [NetworkType; 4] {
        [
            NetworkType::Mainnet,
            NetworkType::Testnet,
            NetworkType::Devnet,
            NetworkType::Custom,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "mainnet",
            NetworkType::Testnet => "testnet",
            NetworkType::Devnet => "devnet",
            NetworkType::Custom => "custom",
        }
    }

    /// First HTTP port. Node `i` listens on `base + 2i` and stakes on `base + 2i + 1`.
    pub fn port_base(&self) -> u16 {
        match self {
            NetworkType::Custom => 9630,
            NetworkType::Devnet => 9730,
            NetworkType::Testnet => 9830,
            NetworkType::Mainnet => 9930,
        }
    }

    pub fn network_id(&self) -> u32 {
        use crate::models::network::{DEVNET_ID, LOCAL_NETWORK_ID, MAINNET_ID, TESTNET_ID};
        match self {
            NetworkType::Mainnet => MAINNET_ID,
            NetworkType::Testnet => TESTNET_ID,
            NetworkType::Devnet => DEVNET_ID,
            NetworkType::Custom => LOCAL_NETWORK_ID,
        }
    }

    pub fn default_nodes(&self, config: &Config) -> u32 {
        match self {
            NetworkType::Custom => config.local.num_nodes,
            NetworkType::Devnet => 5,
            NetworkType::Testnet => 11,
            NetworkType::Mainnet => 21,
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, NetworkType::Mainnet | NetworkType::Testnet)
    }

    /// Largest node count whose HTTP and staking ports all fit below 65536.
    pub fn max_nodes(&self) -> u32 {
        (u32::from(u16::MAX) + 1 - u32::from(self.port_base())) / 2
    }

    pub fn http_port(&self, index: u32) -> u16 {
        self.port_base() + 2 * index as u16
    }

    pub fn staking_port(&self, index: u32) -> u16 {
        self.http_port(index) + 1
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(NetworkType::Mainnet),
            "testnet" => Ok(NetworkType::Testnet),
            "devnet" => Ok(NetworkType::Devnet),
            "custom" | "local" => Ok(NetworkType::Custom),
            other => Err(format!(
                "unknown network type {:?}: expected mainnet, testnet, devnet or custom",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub index: u32,
    pub pid: u32,
    pub http_port: u16,
    pub staking_port: u16,
    pub data_dir: PathBuf,
}

impl NodeState {
    pub fn is_alive(&self) -> bool {
        process::is_alive(self.pid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    pub network_type: NetworkType,
    pub num_nodes: u32,
    pub nodes: Vec<NodeState>,
    pub started_at: DateTime<Utc>,
    pub session_log: PathBuf,
}

impl NetworkState {
    pub fn path(app: &Application, network_type: NetworkType) -> PathBuf {
        run_dir(app, network_type).join(NETWORK_STATE_FILE)
    }

    /// Saved state of `network_type`, if any.
    pub fn load(app: &Application, network_type: NetworkType) -> Result<Option<Self>> {
        let path = Self::path(app, network_type);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let state = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(state))
    }

    pub fn save(&self, app: &Application) -> Result<()> {
        let path = Self::path(app, self.network_type);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_json(&path, self)
    }

    pub fn remove(app: &Application, network_type: NetworkType) -> Result<()> {
        let path = Self::path(app, network_type);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
        }
    }

    /// A network is running while any of its node processes is alive.
    pub fn is_running(&self) -> bool {
        self.nodes.iter().any(NodeState::is_alive)
    }
}

pub fn run_dir(app: &Application, network_type: NetworkType) -> PathBuf {
    app.runs_dir().join(network_type.as_str())
}

pub fn node_data_dir(run_dir: &Path, index: u32) -> PathBuf {
    run_dir.join(format!("run_{}", index))
}

/// `runs/server/<type>`, parent of the per-start session directories.
pub fn sessions_dir(app: &Application, network_type: NetworkType) -> PathBuf {
    app.runs_dir().join(SERVER_RUN_DIR).join(network_type.as_str())
}

/// States of every network type with at least one live node.
pub fn running_networks(app: &Application) -> Result<Vec<NetworkState>> {
    let mut running = Vec::new();
    for network_type in NetworkType::all() {
        if let Some(state) = NetworkState::load(app, network_type)? {
            if state.is_running() {
                running.push(state);
            }
        }
    }
    Ok(running)
}
