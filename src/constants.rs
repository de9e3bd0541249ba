//! Shared names, paths and defaults.

pub const BASE_DIR_NAME: &str = ".lux";
pub const BASE_DIR_ENV: &str = "LUX_HOME";
pub const MPC_DATA_DIR_ENV: &str = "MPC_DATA_DIR";

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const PROJECT_CONFIG_FILE_NAME: &str = ".luxconfig.toml";

pub const SUBNET_DIR: &str = "subnets";
pub const VMS_DIR: &str = "vms";
pub const KEY_DIR: &str = "key";
pub const SNAPSHOTS_DIR: &str = "snapshots";
pub const RUNS_DIR: &str = "runs";
pub const BIN_DIR: &str = "bin";
pub const MPC_DIR: &str = "mpc";

pub const SIDECAR_FILE_NAME: &str = "sidecar.json";
pub const GENESIS_FILE_NAME: &str = "genesis.json";
pub const CHAIN_CONFIG_FILE_NAME: &str = "chain.json";
pub const SUBNET_CONFIG_FILE_NAME: &str = "subnet.json";
pub const UPGRADE_FILE_NAME: &str = "upgrade.json";
pub const KEY_SUFFIX: &str = ".pk";

pub const NETWORK_STATE_FILE: &str = "network.json";
pub const SERVER_RUN_DIR: &str = "server";
pub const SERVER_LOG_FILE: &str = "server.log";
pub const DEFAULT_SNAPSHOT_NAME: &str = "default-snapshot";
pub const SNAPSHOT_METADATA_FILE: &str = "snapshot_metadata.json";

/// Address funded by the development key in generated genesis files.
pub const EWOQ_EVM_ADDRESS: &str = "0x8db97C7cEcE249c2b98bDC0226Cc4C2A57BF52FC";
pub const EWOQ_KEY_NAME: &str = "ewoq";

pub const DEFAULT_TOKEN_NAME: &str = "TEST";
pub const DEFAULT_EVM_CHAIN_ID: u64 = 200200;
pub const DEFAULT_GAS_LIMIT: u64 = 8_000_000;

pub const RPC_BATCH_SIZE: u64 = 100;
pub const DEFAULT_EXPORT_FILE: &str = "blocks.json";

pub const DEFAULT_LUXD_DATA_DIR: &str = ".luxd";
pub const LUXD_BINARY: &str = "luxd";
pub const MPCD_BINARY: &str = "mpcd";
