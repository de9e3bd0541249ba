//! `lux mpc` commands: local node networks, backups and remote deployments.

use super::Context;
use crate::backup::{BackupManager, BackupManifest, BackupOptions, Compression};
use crate::mpc::deploy::{RemoteNetworkConfig, RemoteNode};
use crate::mpc::{
    CloudProvider, Deployer, DeploymentConfig, NetworkConfig, NodeInfo, NodeManager, SshExecutor,
};
use crate::restore::RestoreOptions;
use crate::storage;
use crate::ux::{format_bytes, OutputFormatter};
use crate::Result;
use anyhow::Context as _;
use clap::{Args, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::Tabled;
use tracing::warn;

#[derive(Args)]
pub struct MpcArgs {
    #[command(subcommand)]
    pub command: MpcCommand,
}

#[derive(Subcommand)]
pub enum MpcCommand {
    /// Manage local MPC node networks
    Node(NodeArgs),
    /// Back up and restore MPC node data
    Backup(BackupArgs),
    /// Deploy MPC nodes to remote hosts
    Deploy(DeployArgs),
}

/// Network type flags shared by node and backup commands.
#[derive(Args, Clone, Default)]
#[group(multiple = false)]
pub struct NetworkTypeFlags {
    #[arg(long)]
    pub mainnet: bool,
    #[arg(long)]
    pub testnet: bool,
    #[arg(long)]
    pub devnet: bool,
}

impl NetworkTypeFlags {
    fn selected(&self) -> Option<&'static str> {
        if self.mainnet {
            Some("mainnet")
        } else if self.testnet {
            Some("testnet")
        } else if self.devnet {
            Some("devnet")
        } else {
            None
        }
    }
}

// ---- node ----

#[derive(Args)]
pub struct NodeArgs {
    #[command(subcommand)]
    pub command: NodeCommand,
}

#[derive(Subcommand)]
pub enum NodeCommand {
    /// Create a new t-of-n network on this machine
    Init {
        /// Signatures required
        #[arg(short, long, default_value_t = 2)]
        threshold: usize,
        /// Total nodes
        #[arg(short = 'n', long, default_value_t = 3)]
        nodes: usize,
        #[command(flatten)]
        network_type: NetworkTypeFlags,
    },
    /// Start every node of a network
    Start(NetworkSelector),
    /// Stop every node of a network
    Stop(NetworkSelector),
    /// Show node status
    Status(NetworkSelector),
    /// List networks
    List,
    /// Stop a network and remove its data and keys
    Clean {
        #[command(flatten)]
        selector: NetworkSelector,
        /// Confirm removal
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args, Clone, Default)]
pub struct NetworkSelector {
    /// Network name (default: most recent)
    #[arg(long)]
    pub network: Option<String>,
    #[command(flatten)]
    pub network_type: NetworkTypeFlags,
}

#[derive(Tabled)]
struct NodeStatusRow {
    #[tabled(rename = "NODE")]
    node: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "UPTIME")]
    uptime: String,
    #[tabled(rename = "ENDPOINT")]
    endpoint: String,
}

impl NodeStatusRow {
    fn new(info: &NodeInfo, out: &OutputFormatter) -> Self {
        let status = info.status.to_string();
        Self {
            node: info.config.node_name.clone(),
            status: format!("{} {}", out.status_glyph(&status), status),
            pid: info.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            uptime: info.uptime.clone().unwrap_or_else(|| "-".to_string()),
            endpoint: info.endpoint.clone(),
        }
    }
}

#[derive(Serialize, Tabled)]
struct NetworkRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "TYPE")]
    network_type: String,
    #[tabled(rename = "THRESHOLD")]
    threshold: String,
    #[tabled(rename = "CREATED")]
    created: String,
}

impl From<&NetworkConfig> for NetworkRow {
    fn from(n: &NetworkConfig) -> Self {
        Self {
            name: n.network_name.clone(),
            network_type: n.network_type.clone(),
            threshold: format!("{}-of-{}", n.threshold, n.total_nodes),
            created: n.created.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

fn node_manager(ctx: &Context) -> NodeManager {
    let base = ctx
        .config
        .mpc
        .data_dir
        .clone()
        .unwrap_or_else(|| ctx.app.mpc_dir());
    NodeManager::new(base, ctx.config.mpc.binary_path.as_deref())
}

fn resolve(manager: &NodeManager, selector: &NetworkSelector) -> Result<NetworkConfig> {
    manager.resolve_network(selector.network.as_deref(), selector.network_type.selected())
}

async fn run_node(args: NodeArgs, ctx: &Context) -> Result<()> {
    let out = &ctx.out;
    let manager = node_manager(ctx);
    match args.command {
        NodeCommand::Init {
            threshold,
            nodes,
            network_type,
        } => {
            let kind = network_type.selected().unwrap_or("devnet");
            let network = manager.init_network(kind, threshold, nodes)?;
            if out.json_mode {
                return out.json(&network);
            }
            out.success(&format!(
                "Initialized {} ({}-of-{})",
                network.network_name, threshold, nodes
            ));
            for node in &network.nodes {
                out.kv(&node.node_name, &format!("api {} p2p {}", node.endpoint(), node.p2p_port));
            }
            if manager.mpcd().is_none() {
                out.warning("mpcd not found; nodes will run as placeholders");
            }
            out.info(&format!("Start it with: lux mpc node start --network {}", network.network_name));
        }
        NodeCommand::Start(selector) => {
            let network = resolve(&manager, &selector)?;
            manager.start_network(&network.network_name)?;
            out.success(&format!("Started {} nodes of {}", network.nodes.len(), network.network_name));
        }
        NodeCommand::Stop(selector) => {
            let network = resolve(&manager, &selector)?;
            manager.stop_network(&network.network_name)?;
            out.success(&format!("Stopped {}", network.network_name));
        }
        NodeCommand::Status(selector) => {
            let network = resolve(&manager, &selector)?;
            let infos = manager.network_status(&network.network_name)?;
            if out.json_mode {
                return out.json(&infos);
            }
            out.header(&format!(
                "{} ({}, {}-of-{})",
                network.network_name, network.network_type, network.threshold, network.total_nodes
            ));
            let rows: Vec<NodeStatusRow> = infos.iter().map(|i| NodeStatusRow::new(i, out)).collect();
            out.table(rows);
            for info in infos.iter().filter(|i| i.error.is_some()) {
                out.warning(&format!(
                    "{}: {}",
                    info.config.node_name,
                    info.error.as_deref().unwrap_or_default()
                ));
            }
        }
        NodeCommand::List => {
            let networks = manager.list_networks()?;
            if networks.is_empty() && !out.json_mode {
                out.info("No MPC networks found, run 'lux mpc node init' first");
                return Ok(());
            }
            out.output(networks.iter().map(NetworkRow::from).collect())?;
        }
        NodeCommand::Clean { selector, force } => {
            let network = resolve(&manager, &selector)?;
            if !force {
                out.warning(&format!(
                    "This removes {} and its key shares. Re-run with --force to continue.",
                    network.network_name
                ));
                return Ok(());
            }
            manager.delete_network(&network.network_name, force)?;
            out.success(&format!("Removed {}", network.network_name));
        }
    }
    Ok(())
}

// ---- backup ----

#[derive(Args)]
pub struct BackupArgs {
    /// Storage URI: a path, file://, s3://bucket/prefix or gs://bucket/prefix
    #[arg(short, long, global = true)]
    pub destination: Option<String>,

    #[command(subcommand)]
    pub command: BackupCommand,
}

#[derive(Subcommand)]
pub enum BackupCommand {
    /// Back up one node or every node of a network
    Create(BackupCreateArgs),
    /// List backups
    List {
        #[command(flatten)]
        network_type: NetworkTypeFlags,
    },
    /// Restore a backup into a directory
    Restore {
        /// Backup name
        name: String,
        /// Directory to extract into
        #[arg(long)]
        target: PathBuf,
        /// age identity file for encrypted backups
        #[arg(long)]
        age_identity: Option<PathBuf>,
        #[command(flatten)]
        network_type: NetworkTypeFlags,
    },
    /// Download a backup and check its checksum
    Verify {
        name: String,
        #[command(flatten)]
        network_type: NetworkTypeFlags,
    },
    /// Delete a backup
    Delete {
        name: String,
        #[command(flatten)]
        network_type: NetworkTypeFlags,
    },
}

#[derive(Args)]
pub struct BackupCreateArgs {
    #[command(flatten)]
    pub selector: NetworkSelector,

    /// Only back up this node
    #[arg(long)]
    pub node: Option<String>,

    #[arg(long, default_value = "zstd")]
    pub compression: Compression,

    /// Only include files changed since the node's last backup
    #[arg(long)]
    pub incremental: bool,

    /// Encrypt with age
    #[arg(long, requires = "age_recipient")]
    pub encrypt: bool,

    /// age X25519 recipient (repeatable)
    #[arg(long)]
    pub age_recipient: Vec<String>,
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "NODE")]
    node: String,
    #[tabled(rename = "SIZE")]
    size: String,
    #[tabled(rename = "TYPE")]
    kind: String,
    #[tabled(rename = "ENCRYPTED")]
    encrypted: String,
    #[tabled(rename = "DATE")]
    date: String,
}

impl From<&BackupManifest> for BackupRow {
    fn from(m: &BackupManifest) -> Self {
        Self {
            name: m.name.clone(),
            node: m.node_name.clone(),
            size: format_bytes(m.size),
            kind: if m.incremental { "incremental" } else { "full" }.to_string(),
            encrypted: if m.is_encrypted() { "yes" } else { "no" }.to_string(),
            date: m.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

fn backup_manager(ctx: &Context, destination: Option<&str>, network: &str) -> Result<BackupManager> {
    let config = match destination {
        Some(uri) => storage::parse_uri(uri)?,
        None => storage::StorageConfig::local(ctx.app.mpc_backup_dir()),
    };
    let storage = storage::new_storage(&config)?;
    Ok(BackupManager::new(storage, network))
}

async fn run_backup(args: BackupArgs, ctx: &Context) -> Result<()> {
    let out = &ctx.out;
    let destination = args.destination.as_deref();
    match args.command {
        BackupCommand::Create(args) => {
            let nodes = node_manager(ctx);
            let network = resolve(&nodes, &args.selector)?;
            let manager = backup_manager(ctx, destination, &network.network_type)?;
            let targets = match &args.node {
                Some(name) => vec![network.node(name)?.clone()],
                None => network.nodes.clone(),
            };
            let previous = if args.incremental {
                manager.list().await?
            } else {
                Vec::new()
            };

            let mut created = Vec::with_capacity(targets.len());
            for node in targets {
                let base_version = previous
                    .iter()
                    .find(|m| m.node_id == node.node_id)
                    .map(|m| m.latest_version);
                if args.incremental && base_version.is_none() {
                    warn!("no previous backup of {}, taking a full backup", node.node_name);
                }
                let pb = out.spinner(&format!("Backing up {}", node.node_name));
                let stage_pb = pb.clone();
                let node_name = node.node_name.clone();
                let opts = BackupOptions {
                    node_id: node.node_id.clone(),
                    node_name: node.node_name.clone(),
                    data_dir: node.data_dir.clone(),
                    incremental: base_version.is_some(),
                    base_version,
                    compression: args.compression,
                    encrypt: args.encrypt,
                    recipients: args.age_recipient.clone(),
                    metadata: [("mpc-network-name".to_string(), network.network_name.clone())]
                        .into_iter()
                        .collect(),
                    progress: Some(Arc::new(move |stage: &str| {
                        stage_pb.set_message(format!("{}: {}", node_name, stage))
                    })),
                };
                let result = manager.create(&opts).await;
                pb.finish_and_clear();
                let manifest =
                    result.with_context(|| format!("backup of {} failed", node.node_name))?;
                if !out.json_mode {
                    out.success(&format!(
                        "{} -> {} ({})",
                        node.node_name,
                        manifest.name,
                        format_bytes(manifest.size)
                    ));
                }
                created.push(manifest);
            }
            if out.json_mode {
                return out.json(&created);
            }
        }
        BackupCommand::List { network_type } => {
            let network = network_type.selected().unwrap_or("devnet");
            let manager = backup_manager(ctx, destination, network)?;
            let backups = manager.list().await?;
            if out.json_mode {
                return out.json(&backups);
            }
            if backups.is_empty() {
                out.info(&format!("No {} backups found", network));
                return Ok(());
            }
            out.table(backups.iter().map(BackupRow::from).collect());
        }
        BackupCommand::Restore {
            name,
            target,
            age_identity,
            network_type,
        } => {
            let manager = backup_manager(ctx, destination, network_type.selected().unwrap_or("devnet"))?;
            let opts = RestoreOptions {
                target_dir: target.clone(),
                verify_only: false,
                identity: age_identity,
            };
            let pb = out.spinner(&format!("Restoring {}", name));
            let result = manager.restore(&name, &opts).await;
            pb.finish_and_clear();
            let manifest = result?;
            out.success(&format!(
                "Restored {} ({}) into {}",
                manifest.name,
                manifest.node_name,
                target.display()
            ));
        }
        BackupCommand::Verify { name, network_type } => {
            let manager = backup_manager(ctx, destination, network_type.selected().unwrap_or("devnet"))?;
            let manifest = manager.verify(&name).await?;
            out.success(&format!("{} is intact", manifest.name));
            out.kv("Checksum", manifest.data_checksum().unwrap_or_default());
        }
        BackupCommand::Delete { name, network_type } => {
            let manager = backup_manager(ctx, destination, network_type.selected().unwrap_or("devnet"))?;
            let removed = manager.delete(&name).await?;
            out.success(&format!("Deleted {} ({} objects)", name, removed));
        }
    }
    Ok(())
}

// ---- deploy ----

#[derive(Args)]
pub struct DeployArgs {
    #[command(subcommand)]
    pub command: DeployCommand,
}

#[derive(Subcommand)]
pub enum DeployCommand {
    /// Install MPC nodes on remote hosts
    Create(DeployCreateArgs),
    /// Start the node service everywhere
    Start { name: String },
    /// Stop the node service everywhere
    Stop { name: String },
    /// Query node services
    Status { name: String },
    /// Print the ssh command for a node
    Ssh { name: String, node: String },
    /// Upload an age identity and unlock key shares
    Unlock {
        name: String,
        #[arg(long)]
        age_identity: PathBuf,
    },
    /// Run a backup on every node
    Backup {
        name: String,
        #[arg(short, long)]
        destination: String,
    },
    /// Stop services and forget the deployment
    Destroy {
        name: String,
        #[arg(short, long)]
        force: bool,
    },
    /// List deployments
    List,
}

#[derive(Args)]
pub struct DeployCreateArgs {
    pub name: String,

    #[arg(long, default_value = "local")]
    pub provider: CloudProvider,

    #[arg(long)]
    pub region: Option<String>,

    #[arg(long)]
    pub instance_type: Option<String>,

    #[arg(short = 'n', long, default_value_t = 3)]
    pub nodes: usize,

    #[arg(short, long, default_value_t = 2)]
    pub threshold: usize,

    /// Private key used for ssh and scp
    #[arg(long)]
    pub ssh_key: PathBuf,

    #[arg(long, default_value = "ubuntu")]
    pub ssh_user: String,

    /// Host for the local provider (repeatable, one per node)
    #[arg(long)]
    pub host: Vec<String>,

    #[arg(long)]
    pub aws_profile: Option<String>,

    #[arg(long)]
    pub gcp_project: Option<String>,

    #[arg(long)]
    pub azure_subscription: Option<String>,

    /// DigitalOcean API token (default: $DIGITALOCEAN_TOKEN)
    #[arg(long)]
    pub do_token: Option<String>,

    #[arg(long, default_value = "devnet")]
    pub network_type: String,

    #[arg(long, default_value = "latest")]
    pub mpcd_version: String,
}

impl DeployCreateArgs {
    fn into_config(self) -> DeploymentConfig {
        DeploymentConfig {
            name: self.name,
            provider: self.provider,
            region: self.region.unwrap_or_default(),
            instance_type: self.instance_type.unwrap_or_default(),
            node_count: self.nodes,
            threshold: self.threshold,
            ssh_key_path: self.ssh_key,
            ssh_user: self.ssh_user,
            hosts: self.host,
            aws_profile: self.aws_profile,
            gcp_project: self.gcp_project,
            azure_subscription: self.azure_subscription,
            do_token: self.do_token,
            network_type: self.network_type,
            mpcd_version: self.mpcd_version,
        }
    }
}

#[derive(Tabled)]
struct RemoteNodeRow {
    #[tabled(rename = "NODE")]
    node: String,
    #[tabled(rename = "INSTANCE")]
    instance: String,
    #[tabled(rename = "PUBLIC IP")]
    public_ip: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "KEYS")]
    keys: String,
}

impl RemoteNodeRow {
    fn new(node: &RemoteNode, out: &OutputFormatter) -> Self {
        let status = node.status.to_string();
        Self {
            node: node.name.clone(),
            instance: node.instance_id.clone(),
            public_ip: node.public_ip.clone(),
            status: format!("{} {}", out.status_glyph(&status), status),
            keys: if node.keys_locked { "locked" } else { "unlocked" }.to_string(),
        }
    }
}

#[derive(Serialize, Tabled)]
struct DeploymentRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "PROVIDER")]
    provider: String,
    #[tabled(rename = "NODES")]
    nodes: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "CREATED")]
    created: String,
}

impl From<&RemoteNetworkConfig> for DeploymentRow {
    fn from(d: &RemoteNetworkConfig) -> Self {
        Self {
            name: d.name.clone(),
            provider: d.config.provider.to_string(),
            nodes: format!("{}-of-{}", d.config.threshold, d.nodes.len()),
            status: d.status.to_string(),
            created: d.created.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

fn print_deployment(deployment: &RemoteNetworkConfig, out: &OutputFormatter) -> Result<()> {
    if out.json_mode {
        return out.json(deployment);
    }
    out.header(&format!("{} ({})", deployment.name, deployment.status));
    out.table(
        deployment
            .nodes
            .iter()
            .map(|n| RemoteNodeRow::new(n, out))
            .collect(),
    );
    Ok(())
}

async fn run_deploy(args: DeployArgs, ctx: &Context) -> Result<()> {
    let out = &ctx.out;
    let deployer = Deployer::new(ctx.app.mpc_dir().join("deployments"), Arc::new(SshExecutor));
    match args.command {
        DeployCommand::Create(args) => {
            let config = args.into_config();
            let pb = out.spinner(&format!("Deploying {}", config.name));
            let result = deployer.create(config).await;
            pb.finish_and_clear();
            let deployment = result?;
            out.success(&format!("Deployed {}", deployment.name));
            print_deployment(&deployment, out)?;
            out.info(&format!("Start it with: lux mpc deploy start {}", deployment.name));
        }
        DeployCommand::Start { name } => {
            let deployment = deployer.start(&name).await?;
            print_deployment(&deployment, out)?;
        }
        DeployCommand::Stop { name } => {
            let deployment = deployer.stop(&name).await?;
            print_deployment(&deployment, out)?;
        }
        DeployCommand::Status { name } => {
            let deployment = deployer.status(&name).await?;
            print_deployment(&deployment, out)?;
        }
        DeployCommand::Ssh { name, node } => {
            println!("{}", deployer.ssh_command(&name, &node)?);
        }
        DeployCommand::Unlock { name, age_identity } => {
            let deployment = deployer.unlock_keys(&name, &age_identity).await?;
            out.success(&format!("Unlocked keys on {} nodes", deployment.nodes.len()));
        }
        DeployCommand::Backup { name, destination } => {
            let results = deployer.backup(&name, &destination).await?;
            for (node, output) in results {
                out.kv(&node, &output);
            }
            out.success(&format!("Backups of {} written to {}", name, destination));
        }
        DeployCommand::Destroy { name, force } => {
            deployer.destroy(&name, force).await?;
            out.success(&format!("Destroyed {}", name));
        }
        DeployCommand::List => {
            let deployments = deployer.list()?;
            if deployments.is_empty() && !out.json_mode {
                out.info("No deployments found");
                return Ok(());
            }
            out.output(deployments.iter().map(DeploymentRow::from).collect())?;
        }
    }
    Ok(())
}

/// Run the mpc command
pub async fn run(args: MpcArgs, ctx: &Context) -> Result<()> {
    match args.command {
        MpcCommand::Node(args) => run_node(args, ctx).await,
        MpcCommand::Backup(args) => run_backup(args, ctx).await,
        MpcCommand::Deploy(args) => run_deploy(args, ctx).await,
    }
}
