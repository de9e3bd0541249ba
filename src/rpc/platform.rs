//! P-Chain queries used by deploy and join.

use super::JsonRpcClient;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    #[serde(rename = "nodeID")]
    pub node_id: String,
    #[serde(default)]
    pub weight: Option<String>,
}

#[async_trait]
pub trait PlatformRpc: Send + Sync {
    async fn get_current_validators(&self, subnet_id: &str) -> Result<Vec<Validator>>;
    /// Status string such as `Validating`, `Created` or `Unknown`.
    async fn get_blockchain_status(&self, blockchain_id: &str) -> Result<String>;
    /// Issue a signed, hex encoded transaction and return its ID.
    async fn issue_tx(&self, tx_hex: &str) -> Result<String>;
}

/// [`PlatformRpc`] against `<endpoint>/ext/bc/P`.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    rpc: JsonRpcClient,
}

impl PlatformClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            rpc: JsonRpcClient::new(format!("{}/ext/bc/P", endpoint.trim_end_matches('/'))),
        }
    }

    pub fn url(&self) -> &str {
        self.rpc.url()
    }
}

#[derive(Deserialize)]
struct ValidatorsReply {
    #[serde(default)]
    validators: Vec<Validator>,
}

#[derive(Deserialize)]
struct StatusReply {
    status: String,
}

#[derive(Deserialize)]
struct TxReply {
    #[serde(rename = "txID")]
    tx_id: String,
}

#[async_trait]
impl PlatformRpc for PlatformClient {
    async fn get_current_validators(&self, subnet_id: &str) -> Result<Vec<Validator>> {
        let reply: ValidatorsReply = self
            .rpc
            .call("platform.getCurrentValidators", json!({ "subnetID": subnet_id }))
            .await?;
        Ok(reply.validators)
    }

    async fn get_blockchain_status(&self, blockchain_id: &str) -> Result<String> {
        let reply: StatusReply = self
            .rpc
            .call("platform.getBlockchainStatus", json!({ "blockchainID": blockchain_id }))
            .await?;
        Ok(reply.status)
    }

    async fn issue_tx(&self, tx_hex: &str) -> Result<String> {
        let tx = if tx_hex.starts_with("0x") {
            tx_hex.to_string()
        } else {
            format!("0x{}", tx_hex)
        };
        let reply: TxReply = self
            .rpc
            .call("platform.issueTx", json!({ "tx": tx, "encoding": "hex" }))
            .await?;
        Ok(reply.tx_id)
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use anyhow::bail;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakePlatform {
        pub validators: HashMap<String, Vec<String>>,
        pub statuses: HashMap<String, String>,
        pub issued: Mutex<Vec<String>>,
        pub unreachable: bool,
    }

    #[async_trait]
    impl PlatformRpc for FakePlatform {
        async fn get_current_validators(&self, subnet_id: &str) -> Result<Vec<Validator>> {
            if self.unreachable {
                bail!("connection refused");
            }
            Ok(self
                .validators
                .get(subnet_id)
                .map(|ids| {
                    ids.iter()
                        .map(|id| Validator {
                            node_id: id.clone(),
                            weight: None,
                        })
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn get_blockchain_status(&self, blockchain_id: &str) -> Result<String> {
            if self.unreachable {
                bail!("connection refused");
            }
            Ok(self
                .statuses
                .get(blockchain_id)
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string()))
        }

        async fn issue_tx(&self, tx_hex: &str) -> Result<String> {
            let mut issued = self.issued.lock().unwrap();
            issued.push(tx_hex.to_string());
            Ok(format!("tx{}", issued.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_platform_url() {
        assert_eq!(
            PlatformClient::new("https://api.lux.network/").url(),
            "https://api.lux.network/ext/bc/P"
        );
    }

    #[test]
    fn test_validator_reply_parsing() {
        let reply: ValidatorsReply = serde_json::from_str(
            r#"{"validators":[{"nodeID":"NodeID-abc","weight":"20","startTime":"1"}]}"#,
        )
        .unwrap();
        assert_eq!(reply.validators[0].node_id, "NodeID-abc");
        assert_eq!(reply.validators[0].weight.as_deref(), Some("20"));
    }
}
