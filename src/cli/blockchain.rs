//! `lux blockchain` commands.

use super::Context;
use crate::blockchain::{self, CreateOptions, DeployOptions, DeployOutcome, JoinOptions, JoinOutcome};
use crate::constants::DEFAULT_EXPORT_FILE;
use crate::models::{Network, VmType};
use crate::rpc::migrate;
use crate::rpc::{JsonRpcClient, PlatformClient};
use crate::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Args)]
pub struct BlockchainArgs {
    #[command(subcommand)]
    pub command: BlockchainCommand,
}

#[derive(Subcommand)]
pub enum BlockchainCommand {
    /// Create a new blockchain configuration
    Create(CreateArgs),
    /// List blockchain configurations
    List,
    /// Show details of a blockchain
    Describe(DescribeArgs),
    /// Deploy a blockchain to a network
    Deploy(DeployArgs),
    /// Configure a local node to track a deployed blockchain
    Join(JoinArgs),
    /// Delete a blockchain configuration
    Delete(NameArg),
    /// Export blocks over RPC to a JSON file
    ExportRpc(ExportRpcArgs),
    /// Import blocks from a JSON file over RPC
    ImportRpc(ImportRpcArgs),
}

#[derive(Args)]
pub struct NameArg {
    /// Blockchain name
    pub name: String,
}

#[derive(Args)]
pub struct CreateArgs {
    /// Blockchain name
    pub name: String,

    /// Use the Lux EVM (default)
    #[arg(long, conflicts_with = "custom")]
    pub evm: bool,

    /// Use a custom VM binary
    #[arg(long)]
    pub custom: bool,

    /// Genesis file to use instead of the generated one
    #[arg(long)]
    pub genesis: Option<PathBuf>,

    /// Custom VM binary
    #[arg(long = "vm")]
    pub vm_binary: Option<PathBuf>,

    /// EVM chain ID
    #[arg(long)]
    pub evm_chain_id: Option<u64>,

    /// EVM native token symbol
    #[arg(long)]
    pub evm_token: Option<String>,

    /// Overwrite an existing configuration
    #[arg(short, long)]
    pub force: bool,

    /// Create a sovereign L1 (default)
    #[arg(long, conflicts_with = "non_sovereign")]
    pub sovereign: bool,

    /// Create a subnet validated by the primary network
    #[arg(long)]
    pub non_sovereign: bool,
}

#[derive(Args)]
pub struct DescribeArgs {
    /// Blockchain name
    pub name: String,

    /// Print only the genesis
    #[arg(long)]
    pub genesis: bool,
}

#[derive(Args)]
pub struct DeployArgs {
    /// Blockchain name
    pub name: String,

    /// Target network (mainnet, testnet, devnet, local)
    #[arg(long)]
    pub network: Option<Network>,

    /// Existing subnet ID
    #[arg(long)]
    pub subnet_id: Option<String>,

    /// Existing blockchain ID
    #[arg(long)]
    pub blockchain_id: Option<String>,

    /// Only create the subnet
    #[arg(long)]
    pub subnet_only: bool,

    /// Write an unsigned deploy request here instead of deploying
    #[arg(long)]
    pub output_tx_path: Option<PathBuf>,

    /// Pre-signed subnet creation transaction (hex)
    #[arg(long)]
    pub subnet_tx: Option<PathBuf>,

    /// Pre-signed chain creation transaction (hex)
    #[arg(long)]
    pub chain_tx: Option<PathBuf>,

    /// Node API endpoint
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Key name used to pay fees
    #[arg(long)]
    pub key: Option<String>,
}

#[derive(Args)]
pub struct JoinArgs {
    /// Blockchain name
    pub name: String,

    /// Network the blockchain is deployed on
    #[arg(long)]
    pub network: Option<Network>,

    /// luxd config file to edit
    #[arg(long)]
    pub luxd_config: Option<PathBuf>,

    /// luxd plugin directory
    #[arg(long)]
    pub plugin_dir: Option<PathBuf>,

    /// luxd data directory
    #[arg(long, default_value = "~/.luxd")]
    pub data_dir: PathBuf,

    /// Write without asking and also install chain configs
    #[arg(long)]
    pub force_write: bool,

    /// Print manual instructions instead of editing files
    #[arg(long)]
    pub print: bool,

    /// Check this node is a validator of the subnet
    #[arg(long)]
    pub node_id: Option<String>,

    /// Node API endpoint used for validator checks
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Keep an already installed VM plugin instead of updating it from the local build
    #[arg(long)]
    pub skip_update_check: bool,
}

#[derive(Args)]
pub struct ExportRpcArgs {
    /// Blockchain ID
    pub blockchain_id: String,

    /// RPC URL (default: local node)
    #[arg(long)]
    pub rpc: Option<String>,

    /// First block to export
    #[arg(long, default_value_t = 0)]
    pub start: u64,

    /// Last block to export (0 for the current head)
    #[arg(long, default_value_t = 0)]
    pub end: u64,

    /// Output file
    #[arg(short, long, default_value = DEFAULT_EXPORT_FILE)]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct ImportRpcArgs {
    /// Blockchain ID
    pub blockchain_id: String,

    /// RPC URL (default: local node)
    #[arg(long)]
    pub rpc: Option<String>,

    /// Export file to import
    #[arg(short, long, default_value = DEFAULT_EXPORT_FILE)]
    pub input: PathBuf,
}

fn local_rpc(blockchain_id: &str, flag: Option<String>) -> String {
    flag.unwrap_or_else(|| Network::blockchain_rpc(Network::Local.endpoint(), blockchain_id))
}

/// Run the blockchain command
pub async fn run(args: BlockchainArgs, ctx: &Context) -> Result<()> {
    let out = &ctx.out;
    match args.command {
        BlockchainCommand::Create(args) => {
            let mut opts = CreateOptions::new(&args.name);
            if args.custom {
                opts.vm = VmType::Custom;
            }
            opts.genesis = args.genesis;
            opts.vm_binary = args.vm_binary;
            opts.evm_chain_id = args.evm_chain_id;
            opts.evm_token = args.evm_token;
            opts.force = args.force;
            opts.sovereign = !args.non_sovereign;
            let sc = blockchain::create(&ctx.app, &ctx.config, &opts)?;
            out.success(&format!("Created blockchain configuration {}", sc.name));
            out.kv("VM", &sc.vm.to_string());
            if !sc.chain_id.is_empty() {
                out.kv("Chain ID", &sc.chain_id);
            }
            out.kv("Genesis", &ctx.app.genesis_path(&sc.name).display().to_string());
        }
        BlockchainCommand::List => {
            let rows = blockchain::list(&ctx.app)?;
            if rows.is_empty() && !out.json_mode {
                out.info("No blockchains found. Create one with: lux blockchain create <name>");
                return Ok(());
            }
            out.output(rows)?;
        }
        BlockchainCommand::Describe(args) => {
            if args.genesis {
                println!("{}", blockchain::describe::genesis_json(&ctx.app, &args.name)?);
                return Ok(());
            }
            let details = blockchain::describe(&ctx.app, &args.name)?;
            if out.json_mode {
                return out.json(&details);
            }
            out.header(&format!("Blockchain {}", args.name));
            out.table(details.details);
            if !details.networks.is_empty() {
                out.header("Deployments");
                out.table(details.networks);
            }
            if !details.allocations.is_empty() {
                out.header("Initial allocation");
                out.table(details.allocations);
            }
            if !details.evm_settings.is_empty() {
                out.header("EVM settings");
                out.table(details.evm_settings);
            }
        }
        BlockchainCommand::Deploy(args) => {
            let network = ctx.network(args.network)?;
            let endpoint = args
                .endpoint
                .clone()
                .unwrap_or_else(|| network.endpoint().to_string());
            let opts = DeployOptions {
                subnet_id: args.subnet_id,
                blockchain_id: args.blockchain_id,
                subnet_only: args.subnet_only,
                output_tx_path: args.output_tx_path,
                subnet_tx: args.subnet_tx,
                chain_tx: args.chain_tx,
                endpoint: args.endpoint,
                key: args.key,
            };
            let platform = PlatformClient::new(&endpoint);
            match blockchain::deploy(&ctx.app, &args.name, network, &opts, &platform).await? {
                DeployOutcome::RequestWritten { path } => {
                    out.success(&format!("Deploy request written to {}", path.display()));
                    out.info("Sign and issue it with your wallet, then record the IDs with --subnet-id and --blockchain-id");
                }
                DeployOutcome::Registered {
                    subnet_id,
                    blockchain_id,
                } => {
                    out.success(&format!("Registered {} on {}", args.name, network));
                    out.kv("Subnet ID", &subnet_id);
                    out.kv("Blockchain ID", &blockchain_id);
                    out.kv("RPC", &Network::blockchain_rpc(&endpoint, &blockchain_id));
                }
                DeployOutcome::Issued {
                    subnet_id,
                    blockchain_id,
                } => {
                    out.success(&format!("Issued deployment of {} on {}", args.name, network));
                    out.kv("Subnet ID", &subnet_id);
                    if let Some(id) = blockchain_id {
                        out.kv("Blockchain ID", &id);
                        out.kv("RPC", &Network::blockchain_rpc(&endpoint, &id));
                    }
                }
            }
        }
        BlockchainCommand::Join(args) => {
            let network = ctx.network(args.network)?;
            let endpoint = args
                .endpoint
                .clone()
                .unwrap_or_else(|| network.endpoint().to_string());
            let opts = JoinOptions {
                luxd_config: args.luxd_config,
                plugin_dir: args.plugin_dir,
                data_dir: Some(args.data_dir),
                force_write: args.force_write,
                print: args.print,
                node_id: args.node_id,
                endpoint: args.endpoint,
                skip_update_check: args.skip_update_check,
            };
            let platform = PlatformClient::new(&endpoint);
            let confirm = |prompt: &str| ctx.confirm(prompt);
            match blockchain::join(&ctx.app, &args.name, network, &opts, &platform, &confirm).await? {
                JoinOutcome::Printed(text) => println!("{}", text),
                JoinOutcome::Declined => out.warning("Canceled by user"),
                JoinOutcome::Written {
                    config_path,
                    vm_path,
                    extra_files,
                } => {
                    out.success(&format!("{} joined on {}", args.name, network));
                    out.kv("Node config", &config_path.display().to_string());
                    out.kv("VM plugin", &vm_path.display().to_string());
                    for file in extra_files {
                        out.kv("Wrote", &file.display().to_string());
                    }
                    out.info("Restart luxd for the change to take effect");
                }
            }
        }
        BlockchainCommand::Delete(args) => {
            blockchain::delete(&ctx.app, &args.name)?;
            out.success(&format!("Deleted blockchain {}", args.name));
        }
        BlockchainCommand::ExportRpc(args) => {
            let url = local_rpc(&args.blockchain_id, args.rpc);
            let rpc = JsonRpcClient::new(url.clone());
            let pb = out.spinner(&format!("Exporting blocks from {}", url));
            let export = migrate::export_blocks(&rpc, &args.blockchain_id, args.start, args.end, &args.output, &pb).await;
            pb.finish_and_clear();
            let export = export?;
            out.success(&format!(
                "Exported {} blocks ({}-{}) to {}",
                export.block_count,
                export.start_block,
                export.end_block,
                args.output.display()
            ));
        }
        BlockchainCommand::ImportRpc(args) => {
            let url = local_rpc(&args.blockchain_id, args.rpc);
            let rpc = JsonRpcClient::new(url.clone());
            let pb = out.spinner(&format!("Importing blocks into {}", url));
            let imported = migrate::import_blocks(&rpc, &args.input, &pb).await;
            pb.finish_and_clear();
            out.success(&format!("Imported {} blocks from {}", imported?, args.input.display()));
        }
    }
    Ok(())
}
