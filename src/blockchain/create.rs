//! `blockchain create`: sidecar plus genesis for a new chain.

use super::validate_name;
use crate::app::Application;
use crate::config::Config;
use crate::constants::{DEFAULT_EVM_CHAIN_ID, DEFAULT_GAS_LIMIT, EWOQ_EVM_ADDRESS};
use crate::models::{Sidecar, TokenInfo, VmType};
use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// 50M tokens with 18 decimals.
const EWOQ_BALANCE: &str = "0x295BE96E64066972000000";

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub name: String,
    pub vm: VmType,
    pub genesis: Option<PathBuf>,
    pub vm_binary: Option<PathBuf>,
    pub evm_chain_id: Option<u64>,
    pub evm_token: Option<String>,
    pub force: bool,
    pub sovereign: bool,
}

impl CreateOptions {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vm: VmType::Evm,
            genesis: None,
            vm_binary: None,
            evm_chain_id: None,
            evm_token: None,
            force: false,
            sovereign: true,
        }
    }
}

pub fn create(app: &Application, config: &Config, opts: &CreateOptions) -> Result<Sidecar> {
    validate_name(&opts.name)?;
    if app.sidecar_exists(&opts.name) && !opts.force {
        bail!(
            "blockchain {} already exists, use --force to overwrite",
            opts.name
        );
    }

    if opts.vm == VmType::Custom {
        let binary = opts
            .vm_binary
            .as_ref()
            .context("custom VMs require --vm <binary>")?;
        if !binary.is_file() {
            bail!("VM binary not found: {}", binary.display());
        }
        let dest = app.custom_vm_path(&opts.name);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(binary, &dest)
            .with_context(|| format!("failed to copy VM binary to {}", dest.display()))?;
    }

    let chain_id = opts.evm_chain_id.unwrap_or(DEFAULT_EVM_CHAIN_ID);
    let genesis = match &opts.genesis {
        Some(path) => {
            let bytes = fs::read(path)
                .with_context(|| format!("failed to read genesis {}", path.display()))?;
            serde_json::from_slice::<Value>(&bytes)
                .with_context(|| format!("genesis {} is not valid JSON", path.display()))?;
            bytes
        }
        None if opts.vm == VmType::Evm => serde_json::to_vec_pretty(&default_evm_genesis(chain_id))?,
        None => bail!("custom VMs require --genesis <file>"),
    };

    let token = opts
        .evm_token
        .clone()
        .unwrap_or_else(|| config.evm.default_token_name.clone());
    let mut sc = Sidecar::new(&opts.name, opts.vm);
    sc.sovereign = opts.sovereign;
    sc.token_name = token.clone();
    sc.token_symbol = token.clone();
    if opts.vm == VmType::Evm {
        sc.chain_id = chain_id.to_string();
        sc.token_info = TokenInfo {
            name: token.clone(),
            symbol: token,
            decimals: 18,
            supply: config.evm.default_token_supply.clone(),
        };
    }

    app.write_genesis_file(&opts.name, &genesis)?;
    app.create_sidecar(&mut sc)?;
    info!("Created blockchain configuration {}", opts.name);
    Ok(sc)
}

/// Genesis for a fresh EVM chain funding the development key.
pub fn default_evm_genesis(chain_id: u64) -> Value {
    json!({
        "config": {
            "chainId": chain_id,
            "homesteadBlock": 0,
            "eip150Block": 0,
            "eip155Block": 0,
            "eip158Block": 0,
            "byzantiumBlock": 0,
            "constantinopleBlock": 0,
            "petersburgBlock": 0,
            "istanbulBlock": 0,
            "muirGlacierBlock": 0,
            "feeConfig": {
                "gasLimit": DEFAULT_GAS_LIMIT,
                "targetBlockRate": 2,
                "minBaseFee": 25_000_000_000u64,
                "targetGas": 15_000_000,
                "baseFeeChangeDenominator": 36,
                "minBlockGasCost": 0,
                "maxBlockGasCost": 1_000_000,
                "blockGasCostStep": 200_000
            }
        },
        "alloc": {
            EWOQ_EVM_ADDRESS.trim_start_matches("0x").to_lowercase(): {
                "balance": EWOQ_BALANCE
            }
        },
        "nonce": "0x0",
        "timestamp": "0x0",
        "extraData": "0x00",
        "gasLimit": format!("0x{:X}", DEFAULT_GAS_LIMIT),
        "difficulty": "0x0",
        "mixHash": "0x0000000000000000000000000000000000000000000000000000000000000000",
        "coinbase": "0x0000000000000000000000000000000000000000",
        "number": "0x0",
        "gasUsed": "0x0",
        "parentHash": "0x0000000000000000000000000000000000000000000000000000000000000000"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_create_default_evm() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(dir.path());
        let mut opts = CreateOptions::new("alpha");
        opts.evm_chain_id = Some(7777);

        let sc = create(&app, &Config::default(), &opts).unwrap();
        assert_eq!(sc.chain_id, "7777");
        assert_eq!(sc.token_name, "TEST");
        assert!(sc.sovereign);

        let genesis: Value = serde_json::from_slice(&app.load_genesis("alpha").unwrap()).unwrap();
        assert_eq!(genesis["config"]["chainId"], 7777);
        assert_eq!(genesis["gasLimit"], "0x7A1200");
        assert_eq!(
            genesis["alloc"]["8db97c7cece249c2b98bdc0226cc4c2a57bf52fc"]["balance"],
            EWOQ_BALANCE
        );

        let err = create(&app, &Config::default(), &opts).unwrap_err();
        assert_eq!(err.to_string(), "blockchain alpha already exists, use --force to overwrite");
        opts.force = true;
        opts.evm_token = Some("LUX".to_string());
        assert_eq!(create(&app, &Config::default(), &opts).unwrap().token_name, "LUX");
    }

    #[test]
    fn test_create_custom_requires_vm_and_valid_genesis() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(dir.path());
        let mut opts = CreateOptions::new("beta");
        opts.vm = VmType::Custom;
        assert!(create(&app, &Config::default(), &opts).is_err());

        let vm = dir.path().join("myvm");
        let genesis = dir.path().join("genesis.json");
        fs::write(&vm, b"\x7fELF").unwrap();
        fs::write(&genesis, b"not json").unwrap();
        opts.vm_binary = Some(vm);
        opts.genesis = Some(genesis.clone());
        assert!(create(&app, &Config::default(), &opts)
            .unwrap_err()
            .to_string()
            .contains("is not valid JSON"));

        fs::write(&genesis, br#"{"custom": true}"#).unwrap();
        let sc = create(&app, &Config::default(), &opts).unwrap();
        assert_eq!(sc.vm, VmType::Custom);
        assert!(app.custom_vm_path("beta").is_file());
        assert_eq!(app.load_genesis("beta").unwrap(), br#"{"custom": true}"#);
    }
}
