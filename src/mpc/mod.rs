//! Threshold-signing (MPC) node fleet: local process management and remote
//! deployments.

pub mod deploy;
pub mod node;

pub use deploy::{CloudProvider, Deployer, DeploymentConfig, RemoteExecutor, SshExecutor};
pub use node::{NetworkConfig, NodeConfig, NodeInfo, NodeManager, NodeStatus};

use anyhow::{bail, Result};

/// Validate a t-of-n threshold configuration.
pub fn validate_threshold(threshold: usize, total: usize) -> Result<()> {
    if threshold < 1 || threshold > total {
        bail!("invalid threshold: must be between 1 and {}", total);
    }
    if total < 2 {
        bail!("MPC network requires at least 2 nodes");
    }
    Ok(())
}

/// Base P2P and API ports for a network type.
pub fn base_ports(network_type: &str) -> (u16, u16) {
    match network_type {
        "testnet" => (9710, 9810),
        "devnet" => (9720, 9820),
        _ => (9700, 9800),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_rules() {
        assert!(validate_threshold(2, 3).is_ok());
        assert_eq!(
            validate_threshold(4, 3).unwrap_err().to_string(),
            "invalid threshold: must be between 1 and 3"
        );
        assert_eq!(
            validate_threshold(0, 3).unwrap_err().to_string(),
            "invalid threshold: must be between 1 and 3"
        );
        assert_eq!(
            validate_threshold(1, 1).unwrap_err().to_string(),
            "MPC network requires at least 2 nodes"
        );
    }
}
