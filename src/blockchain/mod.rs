//! Blockchain (subnet/L1) configurations: create, inspect, deploy and join.

pub mod create;
pub mod deploy;
pub mod describe;
pub mod join;

pub use create::{create, CreateOptions};
pub use deploy::{deploy, DeployOptions, DeployOutcome};
pub use describe::{describe, list, BlockchainDetails, BlockchainRow};
pub use join::{join, JoinOptions, JoinOutcome};

use crate::app::Application;
use anyhow::{bail, Result};

const RESERVED_NAMES: &[&str] = &["C", "P", "X"];

/// Names are non-empty, alphanumeric plus `-`/`_`, and not a primary chain alias.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("blockchain name cannot be empty");
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        bail!("invalid character {:?} in blockchain name {:?}", c, name);
    }
    if RESERVED_NAMES.contains(&name) {
        bail!("{} is a reserved chain name", name);
    }
    Ok(())
}

pub(crate) fn ensure_exists(app: &Application, name: &str) -> Result<()> {
    if !app.sidecar_exists(name) {
        bail!("blockchain {} does not exists", name);
    }
    Ok(())
}

/// Remove a blockchain's directory and custom VM binary.
pub fn delete(app: &Application, name: &str) -> Result<()> {
    ensure_exists(app, name)?;
    app.remove_blockchain(name)?;
    tracing::info!("Deleted blockchain {}", name);
    Ok(())
}
