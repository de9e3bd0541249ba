//! `blockchain join`: configure a local luxd to track a deployed subnet.

use crate::app::Application;
use crate::ids::vm_id_from_name;
use crate::models::{Network, Sidecar, VmType};
use crate::rpc::PlatformRpc;
use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULT_CONFIG_FILE: &str = "config.json";
const DEFAULT_PLUGIN_DIR: &str = "plugins";
const TRACK_SUBNETS: &str = "track-subnets";
const WHITELISTED_SUBNETS: &str = "whitelisted-subnets";

#[derive(Debug, Clone, Default)]
pub struct JoinOptions {
    pub luxd_config: Option<PathBuf>,
    pub plugin_dir: Option<PathBuf>,
    /// Node data directory, `~/.luxd` when unset.
    pub data_dir: Option<PathBuf>,
    pub force_write: bool,
    pub print: bool,
    pub node_id: Option<String>,
    pub endpoint: Option<String>,
    /// Keep an already installed VM plugin even if it differs from the local build.
    pub skip_update_check: bool,
}

impl JoinOptions {
    fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(expand_home(dir)),
            None => Ok(dirs::home_dir()
                .context("could not determine home directory")?
                .join(crate::constants::DEFAULT_LUXD_DATA_DIR)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// Manual instructions for the operator.
    Printed(String),
    Written {
        config_path: PathBuf,
        vm_path: PathBuf,
        extra_files: Vec<PathBuf>,
    },
    Declined,
}

pub async fn join(
    app: &Application,
    name: &str,
    network: Network,
    opts: &JoinOptions,
    platform: &dyn PlatformRpc,
    confirm: &dyn Fn(&str) -> Result<bool>,
) -> Result<JoinOutcome> {
    super::ensure_exists(app, name)?;
    let sc = app.load_sidecar(name)?;
    if sc.sovereign {
        bail!("joining sovereign chains is not supported: add your node as a validator instead");
    }
    let data = sc
        .network(network.name())
        .filter(|d| !d.subnet_id.is_empty())
        .context("failed to find the subnet ID for this network, has this blockchain been deployed?")?
        .clone();
    if opts.print && (opts.luxd_config.is_some() || opts.plugin_dir.is_some()) {
        bail!("--print cannot be combined with --luxd-config or --plugin-dir");
    }

    if let Some(node_id) = &opts.node_id {
        check_validator(platform, node_id, &data.subnet_id).await?;
    }

    let vm_id = vm_id_from_name(sc.vm_name())?;
    if opts.print {
        return Ok(JoinOutcome::Printed(instructions(app, &sc, &vm_id, &data.subnet_id)));
    }

    let data_dir = opts.data_dir()?;
    let plugin_dir = opts
        .plugin_dir
        .as_deref()
        .map(expand_home)
        .unwrap_or_else(|| data_dir.join(DEFAULT_PLUGIN_DIR));
    let config_path = opts
        .luxd_config
        .as_deref()
        .map(expand_home)
        .unwrap_or_else(|| data_dir.join(DEFAULT_CONFIG_FILE));

    if !opts.force_write {
        let prompt = format!(
            "This will edit {} to track subnet {}. Proceed?",
            config_path.display(),
            data.subnet_id
        );
        if !confirm(&prompt)? {
            info!("Join of {} canceled", name);
            return Ok(JoinOutcome::Declined);
        }
    }

    let vm_path = install_plugin(app, &sc, &vm_id, &plugin_dir, opts.skip_update_check)?;
    edit_config_file(&config_path, &data.subnet_id, network.id())?;

    let extra_files = if opts.force_write {
        write_chain_configs(app, name, &data_dir, &data.subnet_id, &data.blockchain_id)?
    } else {
        Vec::new()
    };
    info!(
        "{} joined on {}: restart luxd to start tracking subnet {}",
        name, network, data.subnet_id
    );
    Ok(JoinOutcome::Written {
        config_path,
        vm_path,
        extra_files,
    })
}

async fn check_validator(platform: &dyn PlatformRpc, node_id: &str, subnet_id: &str) -> Result<()> {
    match platform.get_current_validators(subnet_id).await {
        Ok(validators) => {
            if !validators.iter().any(|v| v.node_id == node_id) {
                bail!("node {} is not a validator of subnet {}", node_id, subnet_id);
            }
            Ok(())
        }
        Err(e) => {
            warn!("could not fetch validators of {}: {:#}", subnet_id, e);
            Ok(())
        }
    }
}

fn vm_source(app: &Application, sc: &Sidecar) -> PathBuf {
    match sc.vm {
        VmType::Custom => app.custom_vm_path(&sc.name),
        VmType::Evm => app.bin_dir().join("evm").join("evm"),
    }
}

fn instructions(app: &Application, sc: &Sidecar, vm_id: &str, subnet_id: &str) -> String {
    format!(
        "To join {name}:\n\
         1. Copy {src} to <plugin-dir>/{vm_id}\n\
         2. Restart luxd with --track-subnets={subnet_id}\n\
            or add \"{key}\": \"{subnet_id}\" to your node config file",
        name = sc.name,
        src = vm_source(app, sc).display(),
        vm_id = vm_id,
        subnet_id = subnet_id,
        key = TRACK_SUBNETS,
    )
}

fn install_plugin(
    app: &Application,
    sc: &Sidecar,
    vm_id: &str,
    plugin_dir: &Path,
    skip_update_check: bool,
) -> Result<PathBuf> {
    let dest = plugin_dir.join(vm_id);
    if skip_update_check && dest.is_file() {
        info!("Keeping installed VM plugin {}", dest.display());
        return Ok(dest);
    }
    let src = vm_source(app, sc);
    if !src.is_file() {
        bail!("VM binary for {} not found at {}", sc.name, src.display());
    }
    if dest.is_file() {
        if fs::read(&dest)? == fs::read(&src)? {
            info!("VM plugin {} is up to date", dest.display());
            return Ok(dest);
        }
        info!("Updating VM plugin {}", dest.display());
    }
    fs::create_dir_all(plugin_dir)
        .with_context(|| format!("failed to create plugin dir {}", plugin_dir.display()))?;
    fs::copy(&src, &dest)
        .with_context(|| format!("failed to copy VM to {}", dest.display()))?;
    Ok(dest)
}

/// Add `subnet_id` to the node config's tracked subnets and pin its network ID.
pub fn edit_config_file(path: &Path, subnet_id: &str, network_id: u32) -> Result<()> {
    let bytes = match fs::read(path) {
        Ok(bytes) if !bytes.is_empty() => bytes,
        Ok(_) => b"{}".to_vec(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => b"{}".to_vec(),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to load node config file {}", path.display()))
        }
    };
    let mut config: Map<String, Value> = serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to unpack the config file {} to JSON", path.display()))?;

    let previous = config
        .get(TRACK_SUBNETS)
        .or_else(|| config.get(WHITELISTED_SUBNETS))
        .cloned()
        .unwrap_or(Value::Null);
    let previous = match previous {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => bail!("expected a string value for {}, but got {}", TRACK_SUBNETS, other),
    };
    config.remove(WHITELISTED_SUBNETS);
    config.insert(TRACK_SUBNETS.to_string(), Value::String(merge_subnets(&previous, subnet_id)));
    config.insert("network-id".to_string(), Value::from(network_id));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(&config)?)
        .with_context(|| format!("failed to write JSON config file {}", path.display()))?;
    Ok(())
}

fn merge_subnets(existing: &str, subnet_id: &str) -> String {
    let mut ids: Vec<&str> = Vec::new();
    for id in existing.split(',').map(str::trim).chain(std::iter::once(subnet_id)) {
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids.join(",")
}

fn write_chain_configs(
    app: &Application,
    name: &str,
    data_dir: &Path,
    subnet_id: &str,
    blockchain_id: &str,
) -> Result<Vec<PathBuf>> {
    let configs = data_dir.join("configs");
    let mut written = Vec::new();
    let mut copy = |src: PathBuf, dest: PathBuf| -> Result<()> {
        if !src.is_file() {
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&src, &dest).with_context(|| format!("failed to write {}", dest.display()))?;
        written.push(dest);
        Ok(())
    };

    copy(
        app.subnet_config_path(name),
        configs.join("subnets").join(format!("{}.json", subnet_id)),
    )?;
    if !blockchain_id.is_empty() {
        let chain_dir = configs.join("chains").join(blockchain_id);
        copy(app.chain_config_path(name), chain_dir.join("config.json"))?;
        copy(app.upgrade_path(name), chain_dir.join("upgrade.json"))?;
    }
    Ok(written)
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
