//! Start, stop, inspect and clean local networks.

use super::{node_data_dir, run_dir, running_networks, sessions_dir, NetworkState, NetworkType, NodeState};
use crate::app::Application;
use crate::config::Config;
use crate::constants::{DEFAULT_SNAPSHOT_NAME, LUXD_BINARY, SERVER_LOG_FILE};
use crate::process;
use crate::snapshot;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tabled::Tabled;
use tracing::{info, span, warn, Level};

#[derive(Debug, Clone)]
pub struct StartOptions {
    pub network_type: NetworkType,
    pub num_nodes: Option<u32>,
    pub snapshot_name: Option<String>,
    pub luxd_path: Option<PathBuf>,
}

impl StartOptions {
    pub fn new(network_type: NetworkType) -> Self {
        Self {
            network_type,
            num_nodes: None,
            snapshot_name: None,
            luxd_path: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StopOptions {
    pub network_type: Option<NetworkType>,
    pub snapshot_name: Option<String>,
    pub force: bool,
    pub no_snapshot: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    NotRunning,
    Stopped {
        network_type: NetworkType,
        nodes: usize,
        snapshot: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct NodeRow {
    #[tabled(rename = "NODE")]
    pub node: String,
    #[tabled(rename = "PID")]
    pub pid: u32,
    #[tabled(rename = "HTTP")]
    pub http_port: u16,
    #[tabled(rename = "STAKING")]
    pub staking_port: u16,
    #[tabled(rename = "STATUS")]
    pub status: String,
}

impl NodeRow {
    fn from_node(node: &NodeState) -> Self {
        Self {
            node: format!("node{}", node.index + 1),
            pid: node.pid,
            http_port: node.http_port,
            staking_port: node.staking_port,
            status: if node.is_alive() {
                "✓ running".to_string()
            } else {
                "○ stopped".to_string()
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanReport {
    pub removed: Vec<PathBuf>,
    pub sidecars_updated: usize,
}

fn resolve_luxd(config: &Config, flag: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(path) = flag.or(config.network.luxd_path.as_ref()) {
        if !path.is_file() {
            bail!("luxd binary not found at {}", path.display());
        }
        return Ok(path.clone());
    }
    process::find_in_path(LUXD_BINARY).context(
        "luxd binary not found: pass --luxd-path, set network.luxdPath or add luxd to PATH",
    )
}

pub fn start(app: &Application, config: &Config, opts: &StartOptions) -> Result<NetworkState> {
    let network_type = opts.network_type;
    let span = span!(Level::INFO, "network_start", network = %network_type);
    let _enter = span.enter();

    if let Some(state) = NetworkState::load(app, network_type)? {
        if state.is_running() {
            bail!("{} network is already running", network_type);
        }
    }
    let luxd = resolve_luxd(config, opts.luxd_path.as_ref())?;

    if let Some(name) = &opts.snapshot_name {
        snapshot::restore(app, name, Some(network_type))?;
    }

    let num_nodes = opts
        .num_nodes
        .unwrap_or_else(|| network_type.default_nodes(config));
    if num_nodes == 0 {
        bail!("a network needs at least one node");
    }
    if num_nodes > network_type.max_nodes() {
        bail!(
            "too many nodes: {} network ports start at {} and fit at most {} nodes",
            network_type,
            network_type.port_base(),
            network_type.max_nodes()
        );
    }

    let session = sessions_dir(app, network_type).join(Utc::now().format("%Y%m%d-%H%M%S").to_string());
    fs::create_dir_all(&session)
        .with_context(|| format!("failed to create session dir {}", session.display()))?;
    let session_log = session.join(SERVER_LOG_FILE);

    let run = run_dir(app, network_type);
    let mut nodes: Vec<NodeState> = Vec::with_capacity(num_nodes as usize);
    for index in 0..num_nodes {
        let data_dir = node_data_dir(&run, index);
        fs::create_dir_all(&data_dir)?;
        let http_port = network_type.http_port(index);
        let staking_port = network_type.staking_port(index);
        let mut args = vec![
            format!("--network-id={}", network_type.network_id()),
            format!("--data-dir={}", data_dir.display()),
            format!("--log-dir={}", data_dir.join("logs").display()),
            format!("--http-port={}", http_port),
            format!("--staking-port={}", staking_port),
        ];
        if index > 0 {
            args.push(format!("--bootstrap-ips=127.0.0.1:{}", network_type.staking_port(0)));
        }

        match process::spawn_detached(&luxd, &args, &session_log) {
            Ok(pid) => {
                info!("node{} started with pid {} on port {}", index + 1, pid, http_port);
                nodes.push(NodeState {
                    index,
                    pid,
                    http_port,
                    staking_port,
                    data_dir,
                });
            }
            Err(e) => {
                for node in &nodes {
                    let _ = process::terminate(node.pid);
                }
                return Err(e.context(format!("failed to start node{}", index + 1)));
            }
        }
    }

    let state = NetworkState {
        network_type,
        num_nodes,
        nodes,
        started_at: Utc::now(),
        session_log,
    };
    state.save(app)?;
    info!("{} network started with {} nodes", network_type, num_nodes);
    Ok(state)
}

pub fn stop(app: &Application, opts: &StopOptions) -> Result<StopOutcome> {
    let mut running = running_networks(app)?;
    if let Some(network_type) = opts.network_type {
        running.retain(|s| s.network_type == network_type);
    }
    let state = match running.len() {
        0 => return Ok(StopOutcome::NotRunning),
        1 => running.remove(0),
        _ => {
            let names: Vec<&str> = running.iter().map(|s| s.network_type.as_str()).collect();
            bail!(
                "ambiguous: multiple networks running ({}), specify --network-type",
                names.join(", ")
            );
        }
    };
    let network_type = state.network_type;
    if network_type.is_public() && !opts.force {
        bail!("stopping {} requires --force flag for safety", network_type);
    }

    let snapshot = if opts.no_snapshot {
        None
    } else {
        let name = opts
            .snapshot_name
            .clone()
            .unwrap_or_else(|| DEFAULT_SNAPSHOT_NAME.to_string());
        let mut create = snapshot::CreateOptions::new(network_type);
        create.name = Some(name.clone());
        create.replace = true;
        snapshot::create(app, &create)
            .with_context(|| format!("failed to snapshot {} network, nodes left running", network_type))?;
        Some(name)
    };

    for node in &state.nodes {
        match process::terminate(node.pid) {
            Ok(true) => info!("stopped node{} (pid {})", node.index + 1, node.pid),
            Ok(false) => {}
            Err(e) => warn!("failed to stop node{} (pid {}): {:#}", node.index + 1, node.pid, e),
        }
    }
    NetworkState::remove(app, network_type)?;

    Ok(StopOutcome::Stopped {
        network_type,
        nodes: state.nodes.len(),
        snapshot,
    })
}

/// Node rows per requested network type. Types with no saved state are omitted.
pub fn status(app: &Application, types: &[NetworkType]) -> Result<Vec<(NetworkType, Vec<NodeRow>)>> {
    let mut networks = Vec::new();
    for network_type in types {
        if let Some(state) = NetworkState::load(app, *network_type)? {
            networks.push((*network_type, state.nodes.iter().map(NodeRow::from_node).collect()));
        }
    }
    Ok(networks)
}

/// Remove run data and the default snapshot, forgetting local deployments.
pub fn clean(app: &Application, hard: bool) -> Result<CleanReport> {
    if !running_networks(app)?.is_empty() {
        bail!("stop the running network before cleaning");
    }
    let mut report = CleanReport::default();
    let mut targets = vec![
        app.runs_dir(),
        snapshot::snapshot_dir(app, DEFAULT_SNAPSHOT_NAME),
    ];
    if hard {
        targets.push(app.bin_dir());
    }
    for dir in targets {
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
            report.removed.push(dir);
        }
    }

    let local = crate::models::Network::Local.name();
    for name in app.get_sidecar_names()? {
        let mut sc = app.load_sidecar(&name)?;
        if sc.networks.remove(local).is_some() {
            app.update_sidecar(&mut sc)?;
            report.sidecars_updated += 1;
        }
    }
    info!(
        "Cleaned {} directories and {} sidecars",
        report.removed.len(),
        report.sidecars_updated
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Network, Sidecar, VmType};
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_luxd(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("luxd");
        fs::write(
            &path,
            "#!/bin/sh\necho \"luxd $*\"\ntrap 'exit 0' TERM\nwhile true; do sleep 1; done\n",
        )
        .unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(dir.path().join("lux"));
        let mut opts = StartOptions::new(NetworkType::Custom);
        opts.num_nodes = Some(2);
        opts.luxd_path = Some(fake_luxd(dir.path()));

        let state = start(&app, &Config::default(), &opts).unwrap();
        assert_eq!(state.nodes.len(), 2);
        assert_eq!(state.nodes[1].http_port, 9632);
        assert!(state.is_running());
        assert!(state.nodes[1].data_dir.ends_with("runs/custom/run_1"));

        let err = start(&app, &Config::default(), &opts).unwrap_err();
        assert_eq!(err.to_string(), "custom network is already running");

        let rows = status(&app, &NetworkType::all()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1[0].status, "✓ running");

        let outcome = stop(&app, &StopOptions::default()).unwrap();
        assert_eq!(
            outcome,
            StopOutcome::Stopped {
                network_type: NetworkType::Custom,
                nodes: 2,
                snapshot: Some(DEFAULT_SNAPSHOT_NAME.to_string()),
            }
        );
        assert!(snapshot::snapshot_dir(&app, DEFAULT_SNAPSHOT_NAME)
            .join("node-1/node-data.tar.gz")
            .is_file());
        assert!(NetworkState::load(&app, NetworkType::Custom).unwrap().is_none());
        assert_eq!(stop(&app, &StopOptions::default()).unwrap(), StopOutcome::NotRunning);
    }

    #[test]
    fn test_stop_guards() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(dir.path());
        for network_type in [NetworkType::Mainnet, NetworkType::Devnet] {
            NetworkState {
                network_type,
                num_nodes: 1,
                nodes: vec![NodeState {
                    index: 0,
                    pid: std::process::id(),
                    http_port: network_type.http_port(0),
                    staking_port: network_type.staking_port(0),
                    data_dir: PathBuf::new(),
                }],
                started_at: Utc::now(),
                session_log: PathBuf::new(),
            }
            .save(&app)
            .unwrap();
        }

        let err = stop(&app, &StopOptions::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ambiguous: multiple networks running (mainnet, devnet), specify --network-type"
        );
        let opts = StopOptions {
            network_type: Some(NetworkType::Mainnet),
            ..Default::default()
        };
        let err = stop(&app, &opts).unwrap_err();
        assert_eq!(err.to_string(), "stopping mainnet requires --force flag for safety");

        let err = clean(&app, false).unwrap_err();
        assert_eq!(err.to_string(), "stop the running network before cleaning");
    }

    #[test]
    fn test_failed_snapshot_keeps_previous_and_state() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(dir.path());
        let previous = snapshot::snapshot_dir(&app, DEFAULT_SNAPSHOT_NAME);
        fs::create_dir_all(&previous).unwrap();
        fs::write(previous.join("snapshot_metadata.json"), "{}").unwrap();
        NetworkState {
            network_type: NetworkType::Custom,
            num_nodes: 1,
            nodes: vec![NodeState {
                index: 0,
                pid: std::process::id(),
                http_port: NetworkType::Custom.http_port(0),
                staking_port: NetworkType::Custom.staking_port(0),
                data_dir: PathBuf::new(),
            }],
            started_at: Utc::now(),
            session_log: PathBuf::new(),
        }
        .save(&app)
        .unwrap();

        // No run data, so the snapshot cannot be built.
        let err = stop(&app, &StopOptions::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("no node data found"));
        assert!(previous.join("snapshot_metadata.json").is_file());
        assert!(NetworkState::load(&app, NetworkType::Custom).unwrap().is_some());
    }

    #[test]
    fn test_start_rejects_port_overflow() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(dir.path());
        let mut opts = StartOptions::new(NetworkType::Mainnet);
        opts.num_nodes = Some(40_000);
        opts.luxd_path = Some(fake_luxd(dir.path()));
        let err = start(&app, &Config::default(), &opts).unwrap_err();
        assert_eq!(
            err.to_string(),
            "too many nodes: mainnet network ports start at 9930 and fit at most 27803 nodes"
        );
        assert_eq!(NetworkType::Custom.max_nodes(), 27953);
        assert_eq!(NetworkType::Custom.staking_port(27952), u16::MAX);
        assert!(NetworkState::load(&app, NetworkType::Mainnet).unwrap().is_none());
    }

    #[test]
    fn test_missing_luxd() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(dir.path());
        let mut opts = StartOptions::new(NetworkType::Devnet);
        opts.luxd_path = Some(dir.path().join("nope"));
        let err = start(&app, &Config::default(), &opts).unwrap_err();
        assert!(err.to_string().starts_with("luxd binary not found at"));
    }

    #[test]
    fn test_clean_removes_local_deployments() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(dir.path());
        fs::create_dir_all(run_dir(&app, NetworkType::Custom).join("run_0")).unwrap();
        fs::create_dir_all(snapshot::snapshot_dir(&app, DEFAULT_SNAPSHOT_NAME)).unwrap();
        fs::create_dir_all(app.bin_dir()).unwrap();

        let mut sc = Sidecar::new("alpha", VmType::Evm);
        app.create_sidecar(&mut sc).unwrap();
        app.update_sidecar_networks(&mut sc, Network::Local, "s", "c", vec![]).unwrap();
        app.update_sidecar_networks(&mut sc, Network::Testnet, "s", "c", vec![]).unwrap();

        let report = clean(&app, false).unwrap();
        assert_eq!(report.removed.len(), 2);
        assert_eq!(report.sidecars_updated, 1);
        assert!(app.bin_dir().exists());
        let sc = app.load_sidecar("alpha").unwrap();
        assert!(sc.network("Local Network").is_none());
        assert!(sc.network("Testnet").is_some());

        clean(&app, true).unwrap();
        assert!(!app.bin_dir().exists());
    }
}
