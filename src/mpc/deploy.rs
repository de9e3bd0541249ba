//! Remote MPC deployments managed over SSH with systemd.
//!
//! Hosts are provisioned out of band; `local` deployments take a list of
//! reachable hosts and install an `mpc-node` service on each of them.

use super::node::NodeConfig;
use super::{base_ports, validate_threshold};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, span, warn, Instrument, Level};

pub const SERVICE_NAME: &str = "mpc-node";
const DEPLOYMENT_FILE: &str = "deployment.json";
const REMOTE_DATA_DIR: &str = "/var/lib/mpc";
const REMOTE_CONFIG_PATH: &str = "/etc/mpc/config.json";
const REMOTE_MPCD: &str = "/usr/local/bin/mpcd";
const REMOTE_IDENTITY_PATH: &str = "/tmp/mpc-age-identity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    #[default]
    Local,
    Aws,
    Gcp,
    Azure,
    DigitalOcean,
}

impl CloudProvider {
    /// Default instance type and region.
    pub fn defaults(&self) -> Option<(&'static str, &'static str)> {
        match self {
            CloudProvider::Aws => Some(("t3.medium", "us-east-1")),
            CloudProvider::Gcp => Some(("e2-medium", "us-central1")),
            CloudProvider::Azure => Some(("Standard_B2s", "eastus")),
            CloudProvider::DigitalOcean => Some(("s-2vcpu-4gb", "nyc1")),
            CloudProvider::Local => None,
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloudProvider::Local => "local",
            CloudProvider::Aws => "aws",
            CloudProvider::Gcp => "gcp",
            CloudProvider::Azure => "azure",
            CloudProvider::DigitalOcean => "digitalocean",
        };
        f.write_str(s)
    }
}

impl FromStr for CloudProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(CloudProvider::Local),
            "aws" => Ok(CloudProvider::Aws),
            "gcp" => Ok(CloudProvider::Gcp),
            "azure" => Ok(CloudProvider::Azure),
            "digitalocean" | "do" => Ok(CloudProvider::DigitalOcean),
            other => bail!("unknown provider: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub name: String,
    pub provider: CloudProvider,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub instance_type: String,
    pub node_count: usize,
    pub threshold: usize,
    pub ssh_key_path: PathBuf,
    pub ssh_user: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp_project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_subscription: Option<String>,
    /// Never written to disk.
    #[serde(skip)]
    pub do_token: Option<String>,
    pub network_type: String,
    pub mpcd_version: String,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            provider: CloudProvider::Local,
            region: String::new(),
            instance_type: String::new(),
            node_count: 3,
            threshold: 2,
            ssh_key_path: PathBuf::new(),
            ssh_user: "ubuntu".to_string(),
            hosts: Vec::new(),
            aws_profile: None,
            gcp_project: None,
            azure_subscription: None,
            do_token: None,
            network_type: "devnet".to_string(),
            mpcd_version: "latest".to_string(),
        }
    }
}

impl DeploymentConfig {
    /// Fill in the provider's default region and instance type.
    pub fn with_defaults(mut self) -> Self {
        if let Some((instance, region)) = self.provider.defaults() {
            if self.instance_type.is_empty() {
                self.instance_type = instance.to_string();
            }
            if self.region.is_empty() {
                self.region = region.to_string();
            }
        }
        if self.ssh_user.is_empty() {
            self.ssh_user = "ubuntu".to_string();
        }
        self
    }

    pub fn validate(&mut self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("deployment name is required");
        }
        validate_deployment_name(&self.name)?;
        validate_threshold(self.threshold, self.node_count)?;
        if self.ssh_key_path.as_os_str().is_empty() {
            bail!("SSH key path is required");
        }
        if !self.ssh_key_path.exists() {
            bail!("SSH key not found: {}", self.ssh_key_path.display());
        }

        match self.provider {
            CloudProvider::Aws if self.region.is_empty() => bail!("AWS region is required"),
            CloudProvider::Gcp if self.gcp_project.is_none() => bail!("GCP project is required"),
            CloudProvider::Azure if self.azure_subscription.is_none() => {
                bail!("Azure subscription is required")
            }
            CloudProvider::DigitalOcean if self.do_token.is_none() => {
                self.do_token = std::env::var("DIGITALOCEAN_TOKEN").ok().filter(|t| !t.is_empty());
                if self.do_token.is_none() {
                    bail!("DigitalOcean token is required");
                }
            }
            CloudProvider::Local if self.hosts.len() != self.node_count => bail!(
                "local provider requires {} --host entries, got {}",
                self.node_count,
                self.hosts.len()
            ),
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Deployed,
    Running,
    Stopped,
    Unreachable,
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemoteStatus::Deployed => "deployed",
            RemoteStatus::Running => "running",
            RemoteStatus::Stopped => "stopped",
            RemoteStatus::Unreachable => "unreachable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteNode {
    pub name: String,
    pub instance_id: String,
    pub public_ip: String,
    pub private_ip: String,
    pub status: RemoteStatus,
    pub keys_locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteNetworkConfig {
    pub name: String,
    pub config: DeploymentConfig,
    pub nodes: Vec<RemoteNode>,
    pub created: DateTime<Utc>,
    pub status: RemoteStatus,
}

impl RemoteNetworkConfig {
    pub fn node(&self, name: &str) -> Result<&RemoteNode> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .with_context(|| format!("node {} not found in deployment {}", name, self.name))
    }
}

/// SSH destination of a deployed node.
#[derive(Debug, Clone, PartialEq)]
pub struct SshTarget {
    pub user: String,
    pub host: String,
    pub key_path: PathBuf,
}

impl SshTarget {
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Runs commands and copies files on remote hosts.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(&self, target: &SshTarget, command: &str) -> Result<String>;
    async fn upload(&self, target: &SshTarget, local: &Path, remote: &str) -> Result<()>;
}

/// [`RemoteExecutor`] backed by the system `ssh` and `scp` binaries.
#[derive(Debug, Default)]
pub struct SshExecutor;

impl SshExecutor {
    fn common_args(target: &SshTarget) -> Vec<String> {
        vec![
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-i".to_string(),
            target.key_path.display().to_string(),
        ]
    }

    async fn exec(program: &str, args: Vec<String>) -> Result<String> {
        let output = tokio::process::Command::new(program)
            .args(&args)
            .output()
            .await
            .with_context(|| format!("failed to run {}", program))?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, target: &SshTarget, command: &str) -> Result<String> {
        let mut args = Self::common_args(target);
        args.push(target.destination());
        args.push(command.to_string());
        Self::exec("ssh", args).await
    }

    async fn upload(&self, target: &SshTarget, local: &Path, remote: &str) -> Result<()> {
        let mut args = Self::common_args(target);
        args.push(local.display().to_string());
        args.push(format!("{}:{}", target.destination(), remote));
        Self::exec("scp", args).await.map(|_| ())
    }
}

/// Render the systemd unit that runs `mpcd` for `node`.
pub fn systemd_unit(node: &NodeConfig, user: &str) -> String {
    format!(
        r#"[Unit]
Description=Lux MPC node - {name}
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
User={user}
ExecStart={mpcd} {args}
Restart=on-failure
RestartSec=5
LimitNOFILE=65536

# Logging
StandardOutput=journal
StandardError=journal
SyslogIdentifier={service}

[Install]
WantedBy=multi-user.target
"#,
        name = node.node_name,
        user = user,
        mpcd = REMOTE_MPCD,
        args = node.mpcd_args().join(" "),
        service = SERVICE_NAME,
    )
}

/// Creates and drives remote deployments. Records live in
/// `<base_dir>/<name>/deployment.json`.
pub struct Deployer {
    base_dir: PathBuf,
    executor: Arc<dyn RemoteExecutor>,
}

impl Deployer {
    pub fn new(base_dir: impl Into<PathBuf>, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            base_dir: base_dir.into(),
            executor,
        }
    }

    fn deployment_dir(&self, name: &str) -> Result<PathBuf> {
        validate_deployment_name(name)?;
        Ok(self.base_dir.join(name))
    }

    fn record_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.deployment_dir(name)?.join(DEPLOYMENT_FILE))
    }

    fn target(deployment: &RemoteNetworkConfig, node: &RemoteNode) -> SshTarget {
        SshTarget {
            user: deployment.config.ssh_user.clone(),
            host: node.public_ip.clone(),
            key_path: deployment.config.ssh_key_path.clone(),
        }
    }

    pub fn load(&self, name: &str) -> Result<RemoteNetworkConfig> {
        let path = self.record_path(name)?;
        let content = fs::read_to_string(&path)
            .with_context(|| format!("deployment {} not found", name))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    fn save(&self, deployment: &RemoteNetworkConfig) -> Result<()> {
        let path = self.record_path(&deployment.name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_vec_pretty(deployment)?)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn list(&self) -> Result<Vec<RemoteNetworkConfig>> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut deployments = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.path().join(DEPLOYMENT_FILE).is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.load(&name) {
                Ok(d) => deployments.push(d),
                Err(e) => warn!("skipping deployment {}: {:#}", name, e),
            }
        }
        deployments.sort_by_key(|d| d.created);
        Ok(deployments)
    }

    /// Validate, install the node service on every host and record the deployment.
    pub async fn create(&self, config: DeploymentConfig) -> Result<RemoteNetworkConfig> {
        let mut config = config.with_defaults();
        config.validate()?;
        let span = span!(Level::INFO, "mpc_deploy", deployment = %config.name);
        self.create_in_span(config).instrument(span).await
    }

    async fn create_in_span(&self, config: DeploymentConfig) -> Result<RemoteNetworkConfig> {
        if self.record_path(&config.name)?.exists() {
            bail!("deployment {} already exists", config.name);
        }
        if config.provider != CloudProvider::Local {
            bail!(
                "{} provisioning is not supported yet, provision hosts and use --provider local --host ...",
                config.provider
            );
        }

        let deploy_dir = self.deployment_dir(&config.name)?;
        let node_configs = build_node_configs(&config);
        let mut nodes = Vec::with_capacity(node_configs.len());
        for (node, host) in node_configs.iter().zip(&config.hosts) {
            let target = SshTarget {
                user: config.ssh_user.clone(),
                host: host.clone(),
                key_path: config.ssh_key_path.clone(),
            };
            let staging = deploy_dir.join(&node.node_name);
            fs::create_dir_all(&staging)?;
            let config_file = staging.join("config.json");
            let unit_file = staging.join(format!("{}.service", SERVICE_NAME));
            fs::write(&config_file, serde_json::to_vec_pretty(node)?)?;
            fs::write(&unit_file, systemd_unit(node, &config.ssh_user))?;

            info!("Installing {} on {}", node.node_name, host);
            self.executor
                .upload(&target, &config_file, "/tmp/mpc-config.json")
                .await
                .with_context(|| format!("failed to upload config to {}", host))?;
            self.executor
                .upload(&target, &unit_file, &format!("/tmp/{}.service", SERVICE_NAME))
                .await
                .with_context(|| format!("failed to upload service unit to {}", host))?;
            let install = format!(
                "sudo mkdir -p /etc/mpc {data}/keys && sudo mv /tmp/mpc-config.json {cfg} && \
                 sudo mv /tmp/{svc}.service /etc/systemd/system/{svc}.service && \
                 sudo systemctl daemon-reload && sudo systemctl enable {svc}",
                data = REMOTE_DATA_DIR,
                cfg = REMOTE_CONFIG_PATH,
                svc = SERVICE_NAME,
            );
            self.executor
                .run(&target, &install)
                .await
                .with_context(|| format!("failed to install {} on {}", SERVICE_NAME, host))?;

            nodes.push(RemoteNode {
                name: node.node_name.clone(),
                instance_id: host.clone(),
                public_ip: host.clone(),
                private_ip: host.clone(),
                status: RemoteStatus::Deployed,
                keys_locked: true,
            });
        }

        let deployment = RemoteNetworkConfig {
            name: config.name.clone(),
            config,
            nodes,
            created: Utc::now(),
            status: RemoteStatus::Deployed,
        };
        self.save(&deployment)?;
        Ok(deployment)
    }

    async fn systemctl(&self, name: &str, action: &str, status: RemoteStatus) -> Result<RemoteNetworkConfig> {
        let mut deployment = self.load(name)?;
        let command = format!("sudo systemctl {} {}", action, SERVICE_NAME);
        for i in 0..deployment.nodes.len() {
            let target = Self::target(&deployment, &deployment.nodes[i]);
            self.executor
                .run(&target, &command)
                .await
                .with_context(|| format!("failed to {} {}", action, deployment.nodes[i].name))?;
            deployment.nodes[i].status = status;
        }
        deployment.status = status;
        self.save(&deployment)?;
        Ok(deployment)
    }

    pub async fn start(&self, name: &str) -> Result<RemoteNetworkConfig> {
        self.systemctl(name, "start", RemoteStatus::Running).await
    }

    pub async fn stop(&self, name: &str) -> Result<RemoteNetworkConfig> {
        self.systemctl(name, "stop", RemoteStatus::Stopped).await
    }

    /// Query each node's service state and persist it.
    pub async fn status(&self, name: &str) -> Result<RemoteNetworkConfig> {
        let mut deployment = self.load(name)?;
        let command = format!("systemctl is-active {} || true", SERVICE_NAME);
        for i in 0..deployment.nodes.len() {
            let target = Self::target(&deployment, &deployment.nodes[i]);
            deployment.nodes[i].status = match self.executor.run(&target, &command).await {
                Ok(out) if out.trim() == "active" => RemoteStatus::Running,
                Ok(_) => RemoteStatus::Stopped,
                Err(e) => {
                    warn!("{} unreachable: {:#}", deployment.nodes[i].name, e);
                    RemoteStatus::Unreachable
                }
            };
        }
        deployment.status = if deployment.nodes.iter().all(|n| n.status == RemoteStatus::Running) {
            RemoteStatus::Running
        } else {
            RemoteStatus::Stopped
        };
        self.save(&deployment)?;
        Ok(deployment)
    }

    /// Upload an age identity and unlock key shares on every node.
    pub async fn unlock_keys(&self, name: &str, identity: &Path) -> Result<RemoteNetworkConfig> {
        if !identity.is_file() {
            bail!("identity file not found: {}", identity.display());
        }
        let mut deployment = self.load(name)?;
        let command = format!(
            "{mpcd} keys unlock --identity {id} --keys {data}/keys; status=$?; rm -f {id}; exit $status",
            mpcd = REMOTE_MPCD,
            id = REMOTE_IDENTITY_PATH,
            data = REMOTE_DATA_DIR,
        );
        for i in 0..deployment.nodes.len() {
            let target = Self::target(&deployment, &deployment.nodes[i]);
            self.executor
                .upload(&target, identity, REMOTE_IDENTITY_PATH)
                .await
                .with_context(|| format!("failed to upload identity to {}", deployment.nodes[i].name))?;
            self.executor
                .run(&target, &command)
                .await
                .with_context(|| format!("failed to unlock keys on {}", deployment.nodes[i].name))?;
            deployment.nodes[i].keys_locked = false;
        }
        self.save(&deployment)?;
        Ok(deployment)
    }

    /// Run a backup on every node; returns each node's output.
    pub async fn backup(&self, name: &str, destination: &str) -> Result<Vec<(String, String)>> {
        let deployment = self.load(name)?;
        let command = format!(
            "{} backup create --destination {}",
            REMOTE_MPCD,
            shell_quote(destination)
        );
        let mut results = Vec::new();
        for node in &deployment.nodes {
            let output = self
                .executor
                .run(&Self::target(&deployment, node), &command)
                .await
                .with_context(|| format!("backup failed on {}", node.name))?;
            results.push((node.name.clone(), output.trim().to_string()));
        }
        Ok(results)
    }

    /// Stop services (best effort) and forget the deployment.
    pub async fn destroy(&self, name: &str, force: bool) -> Result<()> {
        if !force {
            bail!("use --force to destroy deployment {}", name);
        }
        let deployment = self.load(name)?;
        let command = format!("sudo systemctl stop {}", SERVICE_NAME);
        for node in &deployment.nodes {
            if let Err(e) = self.executor.run(&Self::target(&deployment, node), &command).await {
                warn!("failed to stop {}: {:#}", node.name, e);
            }
        }
        let dir = self.deployment_dir(name)?;
        fs::remove_dir_all(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
        info!("Destroyed deployment {}", name);
        Ok(())
    }

    pub fn ssh_command(&self, name: &str, node: &str) -> Result<String> {
        let deployment = self.load(name)?;
        let node = deployment.node(node)?;
        Ok(format!(
            "ssh -i {} {}@{}",
            deployment.config.ssh_key_path.display(),
            deployment.config.ssh_user,
            node.public_ip
        ))
    }
}

/// Deployment names become directory names under the deployer's base dir.
fn validate_deployment_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        bail!("invalid deployment name {:?}", name);
    }
    Ok(())
}

/// Single-quote `s` for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn build_node_configs(config: &DeploymentConfig) -> Vec<NodeConfig> {
    let (p2p, api) = base_ports("mainnet");
    let created = Utc::now();
    (0..config.node_count)
        .map(|i| NodeConfig {
            node_id: uuid::Uuid::new_v4().simple().to_string(),
            node_name: format!("mpc-node-{}", i + 1),
            node_index: i,
            threshold: config.threshold,
            total_nodes: config.node_count,
            network: config.network_type.clone(),
            listen_addr: format!("0.0.0.0:{}", api),
            p2p_port: p2p,
            api_port: api,
            peers: config
                .hosts
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, h)| format!("{}:{}", h, p2p))
                .collect(),
            data_dir: PathBuf::from(REMOTE_DATA_DIR),
            keys_dir: PathBuf::from(REMOTE_DATA_DIR).join("keys"),
            log_level: "info".to_string(),
            created,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeExecutor {
        commands: Mutex<Vec<(String, String)>>,
        uploads: Mutex<Vec<(String, String)>>,
        unreachable: HashSet<String>,
        inactive: HashSet<String>,
    }

    #[async_trait]
    impl RemoteExecutor for FakeExecutor {
        async fn run(&self, target: &SshTarget, command: &str) -> Result<String> {
            if self.unreachable.contains(&target.host) {
                bail!("ssh: connect to host {} port 22: Connection refused", target.host);
            }
            self.commands
                .lock()
                .unwrap()
                .push((target.host.clone(), command.to_string()));
            if command.starts_with("systemctl is-active") {
                return Ok(if self.inactive.contains(&target.host) {
                    "inactive\n".to_string()
                } else {
                    "active\n".to_string()
                });
            }
            Ok(String::new())
        }

        async fn upload(&self, target: &SshTarget, _local: &Path, remote: &str) -> Result<()> {
            self.uploads
                .lock()
                .unwrap()
                .push((target.host.clone(), remote.to_string()));
            Ok(())
        }
    }

    fn config(dir: &TempDir) -> DeploymentConfig {
        let key = dir.path().join("id_ed25519");
        fs::write(&key, "key").unwrap();
        DeploymentConfig {
            name: "prod".to_string(),
            ssh_key_path: key,
            hosts: vec!["10.0.0.1".into(), "10.0.0.2".into(), "10.0.0.3".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_validation_messages() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.hosts.pop();
        assert_eq!(
            cfg.validate().unwrap_err().to_string(),
            "local provider requires 3 --host entries, got 2"
        );

        let mut cfg = config(&dir);
        cfg.ssh_key_path = dir.path().join("missing");
        assert!(cfg.validate().unwrap_err().to_string().starts_with("SSH key not found"));

        let mut cfg = config(&dir);
        cfg.provider = CloudProvider::Gcp;
        assert_eq!(cfg.validate().unwrap_err().to_string(), "GCP project is required");

        let cfg = DeploymentConfig {
            provider: CloudProvider::Azure,
            ..Default::default()
        }
        .with_defaults();
        assert_eq!(cfg.instance_type, "Standard_B2s");
        assert_eq!(cfg.region, "eastus");
    }

    #[test]
    fn test_systemd_unit() {
        let dir = TempDir::new().unwrap();
        let node = &build_node_configs(&config(&dir))[1];
        assert_eq!(node.peers, vec!["10.0.0.1:9700", "10.0.0.3:9700"]);
        let unit = systemd_unit(node, "ubuntu");
        assert!(unit.contains("Description=Lux MPC node - mpc-node-2"));
        assert!(unit.contains("User=ubuntu"));
        assert!(unit.contains("ExecStart=/usr/local/bin/mpcd start --node-id"));
        assert!(unit.contains("--peer 10.0.0.3:9700"));
    }

    #[tokio::test]
    async fn test_create_installs_on_every_host() {
        let dir = TempDir::new().unwrap();
        let exec = Arc::new(FakeExecutor::default());
        let deployer = Deployer::new(dir.path().join("deployments"), exec.clone());

        let deployment = deployer.create(config(&dir)).await.unwrap();
        assert_eq!(deployment.nodes.len(), 3);
        assert!(deployment.nodes.iter().all(|n| n.keys_locked));
        assert_eq!(exec.uploads.lock().unwrap().len(), 6);
        let commands = exec.commands.lock().unwrap().clone();
        assert_eq!(commands.len(), 3);
        assert!(commands[0].1.contains("systemctl enable mpc-node"));

        let err = deployer.create(config(&dir)).await.unwrap_err();
        assert_eq!(err.to_string(), "deployment prod already exists");
        assert_eq!(deployer.list().unwrap().len(), 1);
        assert_eq!(
            deployer.ssh_command("prod", "mpc-node-2").unwrap(),
            format!("ssh -i {} ubuntu@10.0.0.2", dir.path().join("id_ed25519").display())
        );
    }

    #[tokio::test]
    async fn test_cloud_provider_not_provisioned() {
        let dir = TempDir::new().unwrap();
        let deployer = Deployer::new(dir.path(), Arc::new(FakeExecutor::default()));
        let mut cfg = config(&dir);
        cfg.provider = CloudProvider::Aws;
        let err = deployer.create(cfg).await.unwrap_err();
        assert!(err.to_string().starts_with("aws provisioning is not supported yet"));
    }

    #[tokio::test]
    async fn test_status_and_unlock() {
        let dir = TempDir::new().unwrap();
        let seed = Arc::new(FakeExecutor::default());
        Deployer::new(dir.path(), seed).create(config(&dir)).await.unwrap();

        let exec = Arc::new(FakeExecutor {
            unreachable: ["10.0.0.3".to_string()].into_iter().collect(),
            inactive: ["10.0.0.2".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let deployer = Deployer::new(dir.path(), exec.clone());
        let status = deployer.status("prod").await.unwrap();
        let states: Vec<RemoteStatus> = status.nodes.iter().map(|n| n.status).collect();
        assert_eq!(
            states,
            vec![RemoteStatus::Running, RemoteStatus::Stopped, RemoteStatus::Unreachable]
        );
        assert_eq!(deployer.load("prod").unwrap().nodes[2].status, RemoteStatus::Unreachable);

        let identity = dir.path().join("age.key");
        fs::write(&identity, "AGE-SECRET-KEY-1").unwrap();
        assert!(deployer.unlock_keys("prod", &identity).await.is_err());

        let ok = Deployer::new(dir.path(), Arc::new(FakeExecutor::default()));
        let unlocked = ok.unlock_keys("prod", &identity).await.unwrap();
        assert!(unlocked.nodes.iter().all(|n| !n.keys_locked));
    }

    #[tokio::test]
    async fn test_backup_quotes_destination() {
        let dir = TempDir::new().unwrap();
        Deployer::new(dir.path(), Arc::new(FakeExecutor::default()))
            .create(config(&dir))
            .await
            .unwrap();

        let exec = Arc::new(FakeExecutor::default());
        let deployer = Deployer::new(dir.path(), exec.clone());
        let results = deployer.backup("prod", "s3://bkt/x; rm -rf ~ 'y'").await.unwrap();
        assert_eq!(results.len(), 3);
        let commands = exec.commands.lock().unwrap().clone();
        assert_eq!(
            commands[0].1,
            r"/usr/local/bin/mpcd backup create --destination 's3://bkt/x; rm -rf ~ '\''y'\'''"
        );
    }

    #[tokio::test]
    async fn test_deployment_names_stay_under_base_dir() {
        let dir = TempDir::new().unwrap();
        let deployer = Deployer::new(dir.path().join("deployments"), Arc::new(FakeExecutor::default()));
        for name in ["../escape", "a/b", ".hidden", ""] {
            assert!(deployer.load(name).is_err(), "{:?} accepted", name);
            assert!(deployer.destroy(name, true).await.is_err(), "{:?} accepted", name);
        }
        let err = deployer.load("../escape").unwrap_err();
        assert_eq!(err.to_string(), "invalid deployment name \"../escape\"");

        let mut cfg = config(&dir);
        cfg.name = "../../etc".to_string();
        assert!(deployer.create(cfg).await.is_err());
        assert!(!dir.path().join("etc").exists());
    }

    #[tokio::test]
    async fn test_destroy_requires_force() {
        let dir = TempDir::new().unwrap();
        let deployer = Deployer::new(dir.path(), Arc::new(FakeExecutor::default()));
        deployer.create(config(&dir)).await.unwrap();

        let err = deployer.destroy("prod", false).await.unwrap_err();
        assert_eq!(err.to_string(), "use --force to destroy deployment prod");
        deployer.destroy("prod", true).await.unwrap();
        assert!(deployer.list().unwrap().is_empty());
    }
}
