//! `blockchain deploy`: record, issue or export the transactions that put a
//! chain on a network.
//!
//! Transactions are never built or signed here. A deploy either registers IDs
//! of a chain created elsewhere, issues pre-signed transactions, or writes an
//! unsigned request for an external signer.

use super::ensure_exists;
use crate::app::Application;
use crate::constants::EWOQ_KEY_NAME;
use crate::ids::vm_id_from_name;
use crate::models::Network;
use crate::rpc::PlatformRpc;
use anyhow::{bail, Context, Result};
use base64::Engine;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    pub subnet_id: Option<String>,
    pub blockchain_id: Option<String>,
    pub subnet_only: bool,
    pub output_tx_path: Option<PathBuf>,
    pub subnet_tx: Option<PathBuf>,
    pub chain_tx: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum DeployOutcome {
    Registered {
        subnet_id: String,
        blockchain_id: String,
    },
    Issued {
        subnet_id: String,
        blockchain_id: Option<String>,
    },
    RequestWritten {
        path: PathBuf,
    },
}

fn check_preconditions(app: &Application, name: &str, network: Network, opts: &DeployOptions) -> Result<()> {
    ensure_exists(app, name)?;
    let sc = app.load_sidecar(name)?;
    if sc.imported_from_repo() {
        bail!("unable to deploy blockchains imported from a repo");
    }
    if let Some(path) = &opts.output_tx_path {
        if path.exists() {
            bail!("outputTxPath {:?} already exists", path.display().to_string());
        }
    }
    if opts.subnet_only && opts.subnet_id.is_some() {
        bail!("--subnet-only and --subnet-id are mutually exclusive");
    }
    if sc
        .network(network.name())
        .map_or(false, |data| !data.blockchain_id.is_empty())
    {
        bail!("blockchain {} has already been deployed", name);
    }
    if network.is_public() && opts.key.as_deref() == Some(EWOQ_KEY_NAME) {
        bail!("the ewoq key cannot be used on public networks");
    }
    Ok(())
}

pub async fn deploy(
    app: &Application,
    name: &str,
    network: Network,
    opts: &DeployOptions,
    platform: &dyn PlatformRpc,
) -> Result<DeployOutcome> {
    check_preconditions(app, name, network, opts)?;
    let endpoint = opts
        .endpoint
        .clone()
        .unwrap_or_else(|| network.endpoint().to_string());

    if let Some(path) = &opts.output_tx_path {
        write_deploy_request(app, name, network, opts.subnet_id.as_deref(), path)?;
        return Ok(DeployOutcome::RequestWritten { path: path.clone() });
    }

    let outcome = if opts.subnet_tx.is_some() || opts.chain_tx.is_some() {
        issue(opts, platform).await?
    } else {
        match (&opts.subnet_id, &opts.blockchain_id) {
            (Some(subnet_id), Some(blockchain_id)) => {
                register(network, blockchain_id, platform).await?;
                DeployOutcome::Registered {
                    subnet_id: subnet_id.clone(),
                    blockchain_id: blockchain_id.clone(),
                }
            }
            _ => bail!(
                "nothing to deploy: pass --subnet-id with --blockchain-id, pre-signed --subnet-tx/--chain-tx files, or --output-tx-path"
            ),
        }
    };

    let (subnet_id, blockchain_id) = match &outcome {
        DeployOutcome::Registered {
            subnet_id,
            blockchain_id,
        } => (subnet_id.clone(), blockchain_id.clone()),
        DeployOutcome::Issued {
            subnet_id,
            blockchain_id,
        } => (subnet_id.clone(), blockchain_id.clone().unwrap_or_default()),
        DeployOutcome::RequestWritten { .. } => return Ok(outcome),
    };
    let endpoints = if blockchain_id.is_empty() {
        Vec::new()
    } else {
        vec![Network::blockchain_rpc(&endpoint, &blockchain_id)]
    };

    let mut sc = app.load_sidecar(name)?;
    app.update_sidecar_networks(&mut sc, network, &subnet_id, &blockchain_id, endpoints)?;
    info!("Recorded {} on {}: subnet {} chain {}", name, network, subnet_id, blockchain_id);
    Ok(outcome)
}

async fn register(network: Network, blockchain_id: &str, platform: &dyn PlatformRpc) -> Result<()> {
    match platform.get_blockchain_status(blockchain_id).await {
        Ok(status) if status == "Unknown" || status.is_empty() => {
            bail!("blockchain {} is not known to {}", blockchain_id, network)
        }
        Ok(status) => {
            info!("blockchain {} status: {}", blockchain_id, status);
            Ok(())
        }
        Err(e) => {
            warn!("could not verify blockchain {}: {:#}", blockchain_id, e);
            Ok(())
        }
    }
}

async fn issue(opts: &DeployOptions, platform: &dyn PlatformRpc) -> Result<DeployOutcome> {
    let subnet_id = match (&opts.subnet_tx, &opts.subnet_id) {
        (Some(path), _) => {
            let id = platform
                .issue_tx(&read_tx(path)?)
                .await
                .context("failed to issue subnet transaction")?;
            info!("Issued subnet transaction {}", id);
            id
        }
        (None, Some(id)) => id.clone(),
        (None, None) => bail!("--chain-tx requires --subnet-id or --subnet-tx"),
    };
    if opts.subnet_only {
        return Ok(DeployOutcome::Issued {
            subnet_id,
            blockchain_id: None,
        });
    }
    let path = opts
        .chain_tx
        .as_ref()
        .context("--chain-tx is required unless --subnet-only is set")?;
    let blockchain_id = platform
        .issue_tx(&read_tx(path)?)
        .await
        .context("failed to issue chain transaction")?;
    info!("Issued chain transaction {}", blockchain_id);
    Ok(DeployOutcome::Issued {
        subnet_id,
        blockchain_id: Some(blockchain_id),
    })
}

fn read_tx(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read transaction {}", path.display()))?;
    let tx = raw.trim();
    let digits = tx.trim_start_matches("0x");
    if digits.is_empty() || hex::decode(digits).is_err() {
        bail!("{} does not contain a hex encoded transaction", path.display());
    }
    Ok(tx.to_string())
}

fn write_deploy_request(
    app: &Application,
    name: &str,
    network: Network,
    subnet_id: Option<&str>,
    path: &Path,
) -> Result<()> {
    let sc = app.load_sidecar(name)?;
    let genesis = app.load_genesis(name)?;
    let mut request = json!({
        "network": network.to_string(),
        "networkID": network.id(),
        "vmID": vm_id_from_name(sc.vm_name())?,
        "chainName": sc.name,
        "genesis": base64::engine::general_purpose::STANDARD.encode(genesis),
        "sovereign": sc.sovereign,
    });
    if let Some(id) = subnet_id {
        request["subnetID"] = json!(id);
    }
    fs::write(path, serde_json::to_vec_pretty(&request)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Wrote unsigned deploy request to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::create::{create, CreateOptions};
    use crate::config::Config;
    use crate::rpc::platform::fakes::FakePlatform;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Application) {
        let dir = TempDir::new().unwrap();
        let app = Application::new(dir.path().join("lux"));
        create(&app, &Config::default(), &CreateOptions::new("alpha")).unwrap();
        (dir, app)
    }

    #[tokio::test]
    async fn test_validation_order() {
        let (dir, app) = setup();
        let platform = FakePlatform::default();

        let err = deploy(&app, "nope", Network::Local, &DeployOptions::default(), &platform)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "blockchain nope does not exists");

        let existing = dir.path().join("tx.json");
        fs::write(&existing, "{}").unwrap();
        let opts = DeployOptions {
            output_tx_path: Some(existing.clone()),
            ..Default::default()
        };
        let err = deploy(&app, "alpha", Network::Local, &opts, &platform).await.unwrap_err();
        assert!(err.to_string().starts_with("outputTxPath"));

        let opts = DeployOptions {
            subnet_only: true,
            subnet_id: Some("s".into()),
            ..Default::default()
        };
        let err = deploy(&app, "alpha", Network::Local, &opts, &platform).await.unwrap_err();
        assert_eq!(err.to_string(), "--subnet-only and --subnet-id are mutually exclusive");

        let opts = DeployOptions {
            key: Some("ewoq".into()),
            ..Default::default()
        };
        let err = deploy(&app, "alpha", Network::Mainnet, &opts, &platform).await.unwrap_err();
        assert_eq!(err.to_string(), "the ewoq key cannot be used on public networks");
    }

    #[tokio::test]
    async fn test_register_records_ids() {
        let (_dir, app) = setup();
        let mut platform = FakePlatform::default();
        let opts = DeployOptions {
            subnet_id: Some("subnet1".into()),
            blockchain_id: Some("chain1".into()),
            ..Default::default()
        };

        let err = deploy(&app, "alpha", Network::Testnet, &opts, &platform).await.unwrap_err();
        assert_eq!(err.to_string(), "blockchain chain1 is not known to Testnet");

        platform.statuses.insert("chain1".into(), "Validating".into());
        let outcome = deploy(&app, "alpha", Network::Testnet, &opts, &platform).await.unwrap();
        assert_eq!(
            outcome,
            DeployOutcome::Registered {
                subnet_id: "subnet1".into(),
                blockchain_id: "chain1".into()
            }
        );
        let sc = app.load_sidecar("alpha").unwrap();
        assert_eq!(
            sc.networks["Testnet"].rpc_endpoints,
            vec!["https://api.lux-test.network/ext/bc/chain1/rpc"]
        );

        let err = deploy(&app, "alpha", Network::Testnet, &opts, &platform).await.unwrap_err();
        assert_eq!(err.to_string(), "blockchain alpha has already been deployed");
    }

    #[tokio::test]
    async fn test_issue_presigned_transactions() {
        let (dir, app) = setup();
        let platform = FakePlatform {
            unreachable: true,
            ..Default::default()
        };
        let subnet_tx = dir.path().join("subnet.tx");
        let chain_tx = dir.path().join("chain.tx");
        fs::write(&subnet_tx, "0xdeadbeef\n").unwrap();
        fs::write(&chain_tx, "cafebabe").unwrap();

        let opts = DeployOptions {
            subnet_tx: Some(subnet_tx),
            subnet_only: true,
            ..Default::default()
        };
        let outcome = deploy(&app, "alpha", Network::Local, &opts, &platform).await.unwrap();
        assert_eq!(
            outcome,
            DeployOutcome::Issued {
                subnet_id: "tx1".into(),
                blockchain_id: None
            }
        );

        let opts = DeployOptions {
            subnet_id: Some("tx1".into()),
            chain_tx: Some(chain_tx),
            endpoint: Some("http://10.0.0.5:9630".into()),
            ..Default::default()
        };
        deploy(&app, "alpha", Network::Local, &opts, &platform).await.unwrap();
        assert_eq!(*platform.issued.lock().unwrap(), vec!["0xdeadbeef", "cafebabe"]);
        let sc = app.load_sidecar("alpha").unwrap();
        assert_eq!(sc.networks["Local Network"].blockchain_id, "tx2");
        assert_eq!(
            sc.networks["Local Network"].rpc_endpoints,
            vec!["http://10.0.0.5:9630/ext/bc/tx2/rpc"]
        );
    }

    #[tokio::test]
    async fn test_output_request() {
        let (dir, app) = setup();
        let out = dir.path().join("deploy-request.json");
        let opts = DeployOptions {
            output_tx_path: Some(out.clone()),
            ..Default::default()
        };
        deploy(&app, "alpha", Network::Devnet, &opts, &FakePlatform::default())
            .await
            .unwrap();
        let request: Value = serde_json::from_slice(&fs::read(&out).unwrap()).unwrap();
        assert_eq!(request["chainName"], "alpha");
        assert_eq!(request["networkID"], 3);
        assert_eq!(request["vmID"], vm_id_from_name("alpha").unwrap());
        assert!(request.get("subnetID").is_none());
        assert!(app.load_sidecar("alpha").unwrap().networks.is_empty());
    }
}
