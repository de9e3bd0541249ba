//! Per-blockchain metadata stored next to its genesis.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VmType {
    #[default]
    #[serde(rename = "Lux EVM")]
    Evm,
    #[serde(rename = "Custom")]
    Custom,
}

impl fmt::Display for VmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmType::Evm => f.write_str("Lux EVM"),
            VmType::Custom => f.write_str("Custom"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenInfo {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub supply: String,
}

/// Deployment record for one network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkData {
    #[serde(rename = "SubnetID")]
    pub subnet_id: String,
    #[serde(rename = "BlockchainID")]
    pub blockchain_id: String,
    #[serde(rename = "RPCVersion")]
    pub rpc_version: u32,
    #[serde(rename = "RPCEndpoints")]
    pub rpc_endpoints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sidecar {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "VM")]
    pub vm: VmType,
    #[serde(rename = "VMVersion")]
    pub vm_version: String,
    #[serde(rename = "RPCVersion")]
    pub rpc_version: u32,
    #[serde(rename = "Subnet")]
    pub subnet: String,
    #[serde(rename = "ChainID")]
    pub chain_id: String,
    #[serde(rename = "TokenName")]
    pub token_name: String,
    #[serde(rename = "TokenSymbol")]
    pub token_symbol: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Networks")]
    pub networks: BTreeMap<String, NetworkData>,
    #[serde(rename = "ImportedFromLPM")]
    pub imported_from_lpm: bool,
    #[serde(rename = "ImportedVMID")]
    pub imported_vm_id: String,
    #[serde(rename = "CustomVMRepoURL")]
    pub custom_vm_repo_url: String,
    #[serde(rename = "CustomVMBranch")]
    pub custom_vm_branch: String,
    #[serde(rename = "CustomVMBuildScript")]
    pub custom_vm_build_script: String,
    #[serde(rename = "sovereign")]
    pub sovereign: bool,
    #[serde(rename = "tokenInfo")]
    pub token_info: TokenInfo,
}

impl Default for Sidecar {
    fn default() -> Self {
        Self {
            name: String::new(),
            vm: VmType::Evm,
            vm_version: String::new(),
            rpc_version: 0,
            subnet: String::new(),
            chain_id: String::new(),
            token_name: crate::constants::DEFAULT_TOKEN_NAME.to_string(),
            token_symbol: crate::constants::DEFAULT_TOKEN_NAME.to_string(),
            version: String::new(),
            networks: BTreeMap::new(),
            imported_from_lpm: false,
            imported_vm_id: String::new(),
            custom_vm_repo_url: String::new(),
            custom_vm_branch: String::new(),
            custom_vm_build_script: String::new(),
            sovereign: true,
            token_info: TokenInfo::default(),
        }
    }
}

impl Sidecar {
    pub fn new(name: &str, vm: VmType) -> Self {
        Self {
            name: name.to_string(),
            subnet: name.to_string(),
            vm,
            ..Default::default()
        }
    }

    /// Blockchains imported from a plugin repository are built and deployed elsewhere.
    pub fn imported_from_repo(&self) -> bool {
        self.imported_from_lpm || !self.custom_vm_repo_url.is_empty()
    }

    pub fn network(&self, name: &str) -> Option<&NetworkData> {
        self.networks.get(name)
    }

    /// Name used to derive the VM ID.
    pub fn vm_name(&self) -> &str {
        if self.imported_vm_id.is_empty() {
            &self.name
        } else {
            &self.imported_vm_id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_json_field_names() {
        let mut sc = Sidecar::new("mychain", VmType::Evm);
        sc.networks.insert(
            "Local Network".to_string(),
            NetworkData {
                subnet_id: "sub".to_string(),
                blockchain_id: "chain".to_string(),
                ..Default::default()
            },
        );
        let json = serde_json::to_value(&sc).unwrap();
        assert_eq!(json["Name"], "mychain");
        assert_eq!(json["VM"], "Lux EVM");
        assert_eq!(json["TokenName"], "TEST");
        assert_eq!(json["sovereign"], true);
        assert_eq!(json["Networks"]["Local Network"]["SubnetID"], "sub");
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let sc: Sidecar = serde_json::from_str(r#"{"Name":"x","VM":"Custom"}"#).unwrap();
        assert_eq!(sc.vm, VmType::Custom);
        assert_eq!(sc.token_name, "TEST");
        assert!(sc.networks.is_empty());
        assert!(!sc.imported_from_repo());
    }

    #[test]
    fn test_imported_from_repo() {
        let mut sc = Sidecar::new("x", VmType::Custom);
        sc.custom_vm_repo_url = "https://github.com/example/vm".to_string();
        assert!(sc.imported_from_repo());
    }
}
