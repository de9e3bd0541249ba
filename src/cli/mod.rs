//! Command-line interface for lux.
//!
//! Each command group lives in its own module with a clap `Args` struct and a
//! `run` function dispatched from `main`.

use crate::app::Application;
use crate::config::{Config, ConfigStore};
use crate::models::Network;
use crate::ux::OutputFormatter;
use crate::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod blockchain;
pub mod config;
pub mod mpc;
pub mod network;
pub mod snapshot;

/// lux - manage Lux blockchains, local networks and MPC nodes
#[derive(Parser)]
#[command(name = "lux")]
#[command(about = "Create, deploy and operate Lux blockchains, local networks and MPC node fleets")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print list output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create, deploy and join blockchains
    Blockchain(blockchain::BlockchainArgs),
    /// Run local networks
    Network(network::NetworkArgs),
    /// Manage local network snapshots
    Snapshot(snapshot::SnapshotArgs),
    /// Operate MPC nodes, backups and remote deployments
    Mpc(mpc::MpcArgs),
    /// Read and write CLI configuration
    Config(config::ConfigArgs),
}

/// State shared by every command.
pub struct Context {
    pub app: Application,
    pub store: ConfigStore,
    pub config: Config,
    pub out: OutputFormatter,
}

impl Context {
    pub fn new(out: OutputFormatter) -> Result<Self> {
        let app = Application::from_env()?;
        let store = ConfigStore::open(app.base_dir())?;
        let config = store.load()?;
        Ok(Self {
            app,
            store,
            config,
            out,
        })
    }

    /// Network from a flag, falling back to `network.defaultNetwork`.
    pub fn network(&self, flag: Option<Network>) -> Result<Network> {
        match flag {
            Some(network) => Ok(network),
            None => self
                .config
                .network
                .default_network
                .parse()
                .map_err(anyhow::Error::msg),
        }
    }

    /// Ask a yes/no question on the terminal.
    pub fn confirm(&self, prompt: &str) -> Result<bool> {
        Ok(dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?)
    }
}
