use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAINNET_ID: u32 = 1;
pub const TESTNET_ID: u32 = 2;
pub const DEVNET_ID: u32 = 3;
pub const LOCAL_NETWORK_ID: u32 = 1337;

/// Network a blockchain is deployed to or joined on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
    Local,
}

impl Network {
    pub fn id(&self) -> u32 {
        match self {
            Network::Mainnet => MAINNET_ID,
            Network::Testnet => TESTNET_ID,
            Network::Devnet => DEVNET_ID,
            Network::Local => LOCAL_NETWORK_ID,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            MAINNET_ID => Some(Network::Mainnet),
            TESTNET_ID => Some(Network::Testnet),
            DEVNET_ID => Some(Network::Devnet),
            LOCAL_NETWORK_ID => Some(Network::Local),
            _ => None,
        }
    }

    /// Key used in the sidecar `Networks` map.
    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "Mainnet",
            Network::Testnet => "Testnet",
            Network::Devnet => "Devnet",
            Network::Local => "Local Network",
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://api.lux.network",
            Network::Testnet => "https://api.lux-test.network",
            Network::Devnet => "https://api.lux-dev.network",
            Network::Local => "http://127.0.0.1:9630",
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, Network::Mainnet | Network::Testnet)
    }

    pub fn blockchain_rpc(endpoint: &str, blockchain_id: &str) -> String {
        format!("{}/ext/bc/{}/rpc", endpoint.trim_end_matches('/'), blockchain_id)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "devnet" => Ok(Network::Devnet),
            "local" | "local network" | "localnet" => Ok(Network::Local),
            other => Err(format!(
                "unknown network {:?}: expected mainnet, testnet, devnet or local",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_ids() {
        assert_eq!("Mainnet".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("local".parse::<Network>().unwrap().id(), LOCAL_NETWORK_ID);
        assert_eq!(Network::from_id(2), Some(Network::Testnet));
        assert!("moon".parse::<Network>().is_err());
    }

    #[test]
    fn test_public_networks() {
        assert!(Network::Mainnet.is_public());
        assert!(Network::Testnet.is_public());
        assert!(!Network::Local.is_public());
    }

    #[test]
    fn test_blockchain_rpc() {
        assert_eq!(
            Network::blockchain_rpc("http://127.0.0.1:9630/", "abc"),
            "http://127.0.0.1:9630/ext/bc/abc/rpc"
        );
    }
}
