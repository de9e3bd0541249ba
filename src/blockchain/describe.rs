//! `blockchain list` and `blockchain describe`.

use super::ensure_exists;
use crate::app::Application;
use crate::ids::{to_hex_id, vm_id_from_name};
use crate::models::VmType;
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct BlockchainRow {
    #[tabled(rename = "NAME")]
    pub name: String,
    #[tabled(rename = "VM")]
    pub vm: String,
    #[tabled(rename = "CHAIN ID")]
    pub chain_id: String,
    #[tabled(rename = "TOKEN")]
    pub token: String,
    #[tabled(rename = "DEPLOYED TO")]
    pub deployed_to: String,
}

pub fn list(app: &Application) -> Result<Vec<BlockchainRow>> {
    let mut rows = Vec::new();
    for name in app.get_sidecar_names()? {
        let sc = app.load_sidecar(&name)?;
        let deployed: Vec<&str> = sc
            .networks
            .iter()
            .filter(|(_, data)| !data.blockchain_id.is_empty() || !data.subnet_id.is_empty())
            .map(|(network, _)| network.as_str())
            .collect();
        rows.push(BlockchainRow {
            name: sc.name.clone(),
            vm: sc.vm.to_string(),
            chain_id: sc.chain_id.clone(),
            token: sc.token_symbol.clone(),
            deployed_to: if deployed.is_empty() {
                "-".to_string()
            } else {
                deployed.join(", ")
            },
        });
    }
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct DetailRow {
    #[tabled(rename = "PARAMETER")]
    pub key: String,
    #[tabled(rename = "VALUE")]
    pub value: String,
}

impl DetailRow {
    fn new(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct NetworkRow {
    #[tabled(rename = "NETWORK")]
    pub network: String,
    #[tabled(rename = "SUBNET ID")]
    pub subnet_id: String,
    #[tabled(rename = "SUBNET ID (HEX)")]
    pub subnet_id_hex: String,
    #[tabled(rename = "BLOCKCHAIN ID")]
    pub blockchain_id: String,
    #[tabled(rename = "BLOCKCHAIN ID (HEX)")]
    pub blockchain_id_hex: String,
    #[tabled(rename = "RPC")]
    pub rpc: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct AllocationRow {
    #[tabled(rename = "ADDRESS")]
    pub address: String,
    #[tabled(rename = "BALANCE")]
    pub balance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockchainDetails {
    pub details: Vec<DetailRow>,
    pub networks: Vec<NetworkRow>,
    pub allocations: Vec<AllocationRow>,
    /// Fee configuration and enabled precompiles from the EVM genesis.
    pub evm_settings: Vec<DetailRow>,
}

/// Collect everything `describe` prints for `name`.
pub fn describe(app: &Application, name: &str) -> Result<BlockchainDetails> {
    ensure_exists(app, name)?;
    let sc = app.load_sidecar(name)?;

    let vm_id = vm_id_from_name(sc.vm_name())?;
    let mut details = vec![
        DetailRow::new("Name", sc.name.clone()),
        DetailRow::new("VM", sc.vm.to_string()),
        DetailRow::new("VM ID", vm_id.clone()),
        DetailRow::new("VM ID (hex)", to_hex_id(&vm_id)?),
    ];
    if !sc.chain_id.is_empty() {
        details.push(DetailRow::new("Chain ID", sc.chain_id.clone()));
    }
    details.push(DetailRow::new("Token", format!("{} ({})", sc.token_name, sc.token_symbol)));
    details.push(DetailRow::new("Sovereign", sc.sovereign.to_string()));

    let networks = sc
        .networks
        .iter()
        .map(|(network, data)| NetworkRow {
            network: network.clone(),
            subnet_id: data.subnet_id.clone(),
            subnet_id_hex: to_hex_id(&data.subnet_id).unwrap_or_default(),
            blockchain_id: data.blockchain_id.clone(),
            blockchain_id_hex: to_hex_id(&data.blockchain_id).unwrap_or_default(),
            rpc: data.rpc_endpoints.join("\n"),
        })
        .collect();

    let (allocations, evm_settings) = if sc.vm == VmType::Evm && app.genesis_exists(name) {
        let genesis: Value = serde_json::from_slice(&app.load_genesis(name)?)?;
        (allocations_of(&genesis), evm_settings_of(&genesis))
    } else {
        (Vec::new(), Vec::new())
    };

    Ok(BlockchainDetails {
        details,
        networks,
        allocations,
        evm_settings,
    })
}

/// Raw genesis JSON, for `describe --genesis`.
pub fn genesis_json(app: &Application, name: &str) -> Result<String> {
    ensure_exists(app, name)?;
    let genesis: Value = serde_json::from_slice(&app.load_genesis(name)?)?;
    Ok(serde_json::to_string_pretty(&genesis)?)
}

fn allocations_of(genesis: &Value) -> Vec<AllocationRow> {
    let Some(alloc) = genesis.get("alloc").and_then(Value::as_object) else {
        return Vec::new();
    };
    alloc
        .iter()
        .map(|(address, account)| AllocationRow {
            address: if address.starts_with("0x") {
                address.clone()
            } else {
                format!("0x{}", address)
            },
            balance: account
                .get("balance")
                .and_then(Value::as_str)
                .map(format_balance)
                .unwrap_or_default(),
        })
        .collect()
}

/// Hex wei balance as whole tokens when it fits in u128.
fn format_balance(hex: &str) -> String {
    let digits = hex.trim_start_matches("0x").trim_start_matches("0X");
    match u128::from_str_radix(digits, 16) {
        Ok(wei) => {
            let whole = wei / 1_000_000_000_000_000_000;
            let frac = wei % 1_000_000_000_000_000_000;
            if frac == 0 {
                whole.to_string()
            } else {
                format!("{}.{:018}", whole, frac).trim_end_matches('0').to_string()
            }
        }
        Err(_) => hex.to_string(),
    }
}

fn evm_settings_of(genesis: &Value) -> Vec<DetailRow> {
    let Some(config) = genesis.get("config").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut rows = Vec::new();
    if let Some(fee) = config.get("feeConfig").and_then(Value::as_object) {
        for (key, value) in fee {
            rows.push(DetailRow::new(key, value.to_string()));
        }
    }
    for (key, value) in config {
        if key.ends_with("Config") && key != "feeConfig" {
            rows.push(DetailRow::new(&format!("precompile {}", key), value.to_string()));
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::create::{create, CreateOptions};
    use crate::config::Config;
    use crate::models::Network;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_list_and_describe() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(dir.path());
        let mut sc = create(&app, &Config::default(), &CreateOptions::new("alpha")).unwrap();
        let empty = crate::ids::empty_id();
        app.update_sidecar_networks(&mut sc, Network::Local, &empty, &empty, vec![])
            .unwrap();

        let rows = list(&app).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].deployed_to, "Local Network");
        assert_eq!(rows[0].chain_id, "200200");

        let details = describe(&app, "alpha").unwrap();
        assert_eq!(details.details[0].value, "alpha");
        assert!(details.details[3].value.starts_with("0x616c706861"));
        assert_eq!(details.networks[0].subnet_id_hex, format!("0x{}", "0".repeat(64)));
        assert_eq!(details.allocations.len(), 1);
        assert_eq!(details.allocations[0].balance, "50000000");
        assert!(details.evm_settings.iter().any(|r| r.key == "gasLimit" && r.value == "8000000"));

        let err = describe(&app, "missing").unwrap_err();
        assert_eq!(err.to_string(), "blockchain missing does not exists");
        assert!(genesis_json(&app, "alpha").unwrap().contains("\"chainId\": 200200"));
    }

    #[test]
    fn test_format_balance() {
        assert_eq!(format_balance("0x0"), "0");
        assert_eq!(format_balance("0xDE0B6B3A7640000"), "1");
        assert_eq!(format_balance("0x6F05B59D3B20000"), "0.5");
    }
}
