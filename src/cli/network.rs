//! `lux network` commands.

use super::Context;
use crate::localnet::{self, NetworkType, StartOptions, StopOptions, StopOutcome};
use crate::models::Network;
use crate::rpc::migrate::{self, ImportOptions};
use crate::rpc::JsonRpcClient;
use crate::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Args)]
pub struct NetworkArgs {
    #[command(subcommand)]
    pub command: NetworkCommand,
}

#[derive(Subcommand)]
pub enum NetworkCommand {
    /// Start a local network
    Start(StartArgs),
    /// Stop a running network, saving a snapshot first
    Stop(StopArgs),
    /// Show node processes of local networks
    Status(StatusArgs),
    /// Remove local network data
    Clean(CleanArgs),
    /// Import exported blocks into a running chain
    Import(ImportArgs),
}

#[derive(Args)]
pub struct StartArgs {
    /// Network type: mainnet, testnet, devnet or custom
    #[arg(default_value = "custom")]
    pub network_type: NetworkType,

    /// Number of nodes
    #[arg(long)]
    pub num_nodes: Option<u32>,

    /// Snapshot to restore before starting
    #[arg(long)]
    pub snapshot_name: Option<String>,

    /// Path to the luxd binary
    #[arg(long)]
    pub luxd_path: Option<PathBuf>,
}

#[derive(Args)]
pub struct StopArgs {
    /// Network to stop when several are running
    #[arg(long)]
    pub network_type: Option<NetworkType>,

    /// Name of the snapshot saved before stopping
    #[arg(long)]
    pub snapshot_name: Option<String>,

    /// Allow stopping mainnet and testnet
    #[arg(short, long)]
    pub force: bool,

    /// Stop without saving a snapshot
    #[arg(long)]
    pub no_snapshot: bool,
}

#[derive(Args)]
pub struct StatusArgs {
    #[arg(long)]
    pub mainnet: bool,
    #[arg(long)]
    pub testnet: bool,
    #[arg(long)]
    pub devnet: bool,
    /// Show every network type
    #[arg(long)]
    pub all: bool,
}

impl StatusArgs {
    fn selected(&self) -> Vec<NetworkType> {
        let mut types = Vec::new();
        if self.mainnet {
            types.push(NetworkType::Mainnet);
        }
        if self.testnet {
            types.push(NetworkType::Testnet);
        }
        if self.devnet {
            types.push(NetworkType::Devnet);
        }
        if self.all || types.is_empty() {
            return NetworkType::all().to_vec();
        }
        types
    }
}

#[derive(Args)]
pub struct CleanArgs {
    /// Also remove downloaded binaries
    #[arg(long)]
    pub hard: bool,
}

#[derive(Args)]
pub struct ImportArgs {
    /// Export file (.json, .jsonl, optionally .gz)
    pub file: PathBuf,

    /// Destination RPC URL
    #[arg(long)]
    pub rpc: Option<String>,

    /// Destination blockchain ID or alias, used when --rpc is not set
    #[arg(long, default_value = "C")]
    pub blockchain_id: String,

    /// Blocks per import call
    #[arg(long, default_value_t = 100)]
    pub batch_size: usize,

    /// Import blocks the destination already has
    #[arg(long)]
    pub no_skip_existing: bool,

    /// Show the plan without importing
    #[arg(long)]
    pub dry_run: bool,

    /// Check the destination head after importing
    #[arg(long)]
    pub verify: bool,
}

/// Run the network command
pub async fn run(args: NetworkArgs, ctx: &Context) -> Result<()> {
    let out = &ctx.out;
    match args.command {
        NetworkCommand::Start(args) => {
            let opts = StartOptions {
                network_type: args.network_type,
                num_nodes: args.num_nodes,
                snapshot_name: args.snapshot_name,
                luxd_path: args.luxd_path,
            };
            let state = localnet::start(&ctx.app, &ctx.config, &opts)?;
            out.success(&format!(
                "{} network started with {} nodes",
                state.network_type, state.num_nodes
            ));
            if let Some(first) = state.nodes.first() {
                out.kv(
                    "Endpoint",
                    &format!("http://127.0.0.1:{}", first.http_port),
                );
            }
            out.kv("Logs", &state.session_log.display().to_string());
        }
        NetworkCommand::Stop(args) => {
            let opts = StopOptions {
                network_type: args.network_type,
                snapshot_name: args.snapshot_name,
                force: args.force,
                no_snapshot: args.no_snapshot,
            };
            match localnet::stop(&ctx.app, &opts)? {
                StopOutcome::NotRunning => out.info("No network is running"),
                StopOutcome::Stopped {
                    network_type,
                    nodes,
                    snapshot,
                } => {
                    out.success(&format!("Stopped {} network ({} nodes)", network_type, nodes));
                    if let Some(name) = snapshot {
                        out.kv("Snapshot", &name);
                    }
                }
            }
        }
        NetworkCommand::Status(args) => {
            let networks = localnet::status(&ctx.app, &args.selected())?;
            if out.json_mode {
                let json: Vec<_> = networks
                    .iter()
                    .map(|(t, rows)| serde_json::json!({ "networkType": t, "nodes": rows }))
                    .collect();
                return out.json(&json);
            }
            if networks.is_empty() {
                out.info("No network is running");
                return Ok(());
            }
            for (network_type, rows) in networks {
                out.header(&format!("{} network", network_type));
                out.table(rows);
            }
        }
        NetworkCommand::Clean(args) => {
            let report = localnet::clean(&ctx.app, args.hard)?;
            for dir in &report.removed {
                out.kv("Removed", &dir.display().to_string());
            }
            out.success(&format!(
                "Network data cleaned ({} blockchain configurations updated)",
                report.sidecars_updated
            ));
        }
        NetworkCommand::Import(args) => {
            let url = args.rpc.clone().unwrap_or_else(|| {
                Network::blockchain_rpc(Network::Local.endpoint(), &args.blockchain_id)
            });
            let rpc = JsonRpcClient::new(url.clone());
            let opts = ImportOptions {
                batch_size: args.batch_size.max(1),
                skip_existing: !args.no_skip_existing,
                dry_run: args.dry_run,
                verify: args.verify,
            };
            let pb = out.spinner(&format!("Importing {} into {}", args.file.display(), url));
            let report = migrate::network_import(&rpc, &args.file, &opts, &pb).await;
            pb.finish_and_clear();
            let report = report?;
            if out.json_mode {
                return out.json(&report);
            }
            if let Some(meta) = report.metadata.as_object().filter(|m| !m.is_empty()) {
                out.header("Import file");
                for (key, value) in meta {
                    out.kv(key, &value.to_string());
                }
            }
            out.kv("Blocks", &report.total.to_string());
            out.kv("State entries", &report.state_entries.to_string());
            if let Some(height) = report.destination_height {
                out.kv("Destination height", &height.to_string());
            }
            out.kv("Skipped", &report.skipped.to_string());
            if report.dry_run {
                out.info(&format!(
                    "Dry run: {} blocks would be imported",
                    report.total - report.skipped
                ));
                return Ok(());
            }
            match report.verified {
                Some(false) => out.warning("Destination head does not match the last imported block"),
                Some(true) => out.success("Destination head verified"),
                None => {}
            }
            out.success(&format!(
                "Imported {} blocks in {:.1}s",
                report.imported,
                report.elapsed.as_secs_f64()
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use pretty_assertions::assert_eq;

    fn status_args(argv: &[&str]) -> StatusArgs {
        let mut full = vec!["lux", "network", "status"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Network(NetworkArgs {
                command: NetworkCommand::Status(args),
            }) => args,
            _ => panic!("expected network status"),
        }
    }

    #[test]
    fn test_status_selection() {
        assert_eq!(status_args(&[]).selected().len(), 4);
        assert_eq!(
            status_args(&["--testnet", "--devnet"]).selected(),
            vec![NetworkType::Testnet, NetworkType::Devnet]
        );
        assert_eq!(status_args(&["--mainnet", "--all"]).selected().len(), 4);
    }

    #[test]
    fn test_start_accepts_local_alias() {
        let cli = Cli::try_parse_from(["lux", "network", "start", "local", "--num-nodes", "3"]).unwrap();
        let Commands::Network(NetworkArgs {
            command: NetworkCommand::Start(args),
        }) = cli.command
        else {
            panic!("expected network start");
        };
        assert_eq!(args.network_type, NetworkType::Custom);
        assert_eq!(args.num_nodes, Some(3));
    }
}
