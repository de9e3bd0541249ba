//! # lux-cli
//!
//! Library behind the `lux` command: blockchain configuration and deployment,
//! local network management, snapshots and MPC node fleets.
//!
//! ## Layout
//!
//! - **Blockchains**: sidecar and genesis management, deploy and join
//! - **Local networks**: `luxd` process control with per-type port ranges
//! - **Snapshots**: parallel full and incremental archives of node data
//! - **MPC**: local node networks, remote deployments and backups to pluggable storage
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lux_cli::app::Application;
//! use lux_cli::snapshot;
//!
//! # fn main() -> anyhow::Result<()> {
//! let app = Application::from_env()?;
//! for row in snapshot::list(&app)? {
//!     println!("{} {}", row.name, row.size);
//! }
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod backup;
pub mod blockchain;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod localnet;
pub mod logging;
pub mod models;
pub mod mpc;
pub mod process;
pub mod restore;
pub mod rpc;
pub mod snapshot;
pub mod storage;
pub mod ux;

// Re-export commonly used types
pub use app::Application;
pub use backup::BackupManager;
pub use models::{Network, Sidecar};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
