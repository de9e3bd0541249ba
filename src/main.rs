//! lux - Lux blockchain, local network and MPC node CLI
//!
//! Main binary entry point for the command-line interface.

use clap::Parser;
use lux_cli::cli::{Cli, Commands, Context};
use lux_cli::logging::{init_file_logging, init_logging};
use lux_cli::ux::OutputFormatter;
use lux_cli::Result;

async fn run(cli: Cli) -> Result<()> {
    match &cli.log_file {
        Some(path) => init_file_logging(path, cli.verbose)?,
        None => init_logging(cli.verbose)?,
    }

    let ctx = Context::new(OutputFormatter::new(!cli.no_color, cli.json))?;
    match cli.command {
        Commands::Blockchain(args) => lux_cli::cli::blockchain::run(args, &ctx).await,
        Commands::Network(args) => lux_cli::cli::network::run(args, &ctx).await,
        Commands::Snapshot(args) => lux_cli::cli::snapshot::run(args, &ctx).await,
        Commands::Mpc(args) => lux_cli::cli::mpc::run(args, &ctx).await,
        Commands::Config(args) => lux_cli::cli::config::run(args, &ctx).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let out = OutputFormatter::new(!cli.no_color, cli.json);

    if let Err(e) = run(cli).await {
        out.error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
