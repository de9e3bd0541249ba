//! `lux snapshot` commands.

use super::Context;
use crate::localnet::NetworkType;
use crate::snapshot::{self, CleanupConfig, CreateOptions};
use crate::ux::format_bytes;
use crate::Result;
use clap::{Args, Subcommand};
use std::time::Duration;

#[derive(Args)]
pub struct SnapshotArgs {
    #[command(subcommand)]
    pub command: SnapshotCommand,
}

#[derive(Subcommand)]
pub enum SnapshotCommand {
    /// Archive the data of a local network
    Create(CreateArgs),
    /// Restore a snapshot into the local run directory
    Restore(RestoreArgs),
    /// List snapshots
    List,
    /// Delete a snapshot
    Delete {
        /// Snapshot name
        name: String,
    },
    /// Rotate logs and remove old sessions and stale run directories
    Cleanup(CleanupArgs),
}

#[derive(Args)]
pub struct CreateArgs {
    /// Snapshot name (default: <type>-<date>)
    pub name: Option<String>,

    #[arg(long, default_value = "custom")]
    pub network_type: NetworkType,

    /// Archive every file. This is the default unless --incremental-from is given
    #[arg(long, conflicts_with = "incremental_from")]
    pub full: bool,

    /// Only archive files changed since this snapshot
    #[arg(long)]
    pub incremental_from: Option<String>,

    /// Keep only the newest N snapshots
    #[arg(long)]
    pub keep: Option<usize>,
}

#[derive(Args)]
pub struct RestoreArgs {
    /// Snapshot name
    pub name: String,

    /// Restore into this network type instead of the recorded one
    #[arg(long)]
    pub network_type: Option<NetworkType>,
}

#[derive(Args)]
pub struct CleanupArgs {
    /// Report what would be removed without removing it
    #[arg(long)]
    pub dry_run: bool,

    /// Rotate server logs larger than this many MB
    #[arg(long, default_value_t = 100)]
    pub log_max_size: u64,

    /// Remove sessions older than this many days
    #[arg(long, default_value_t = 7)]
    pub log_max_age: u64,

    /// Remove run backups older than this many days
    #[arg(long, default_value_t = 7)]
    pub backup_max_age: u64,

    /// Remove abandoned run directories idle for this many hours
    #[arg(long, default_value_t = 24)]
    pub stale_max_age: u64,

    /// Log every removal
    #[arg(long)]
    pub list_removed: bool,
}

impl CleanupArgs {
    fn to_config(&self) -> CleanupConfig {
        const HOUR: u64 = 60 * 60;
        CleanupConfig {
            dry_run: self.dry_run,
            log_max_size: self.log_max_size * 1024 * 1024,
            log_max_age: Duration::from_secs(self.log_max_age * 24 * HOUR),
            backup_max_age: Duration::from_secs(self.backup_max_age * 24 * HOUR),
            stale_max_age: Duration::from_secs(self.stale_max_age * HOUR),
            verbose: self.list_removed,
        }
    }
}

/// Run the snapshot command
pub async fn run(args: SnapshotArgs, ctx: &Context) -> Result<()> {
    let out = &ctx.out;
    match args.command {
        SnapshotCommand::Create(args) => {
            let opts = CreateOptions {
                name: args.name,
                network_type: args.network_type,
                incremental_from: if args.full { None } else { args.incremental_from },
                keep: args.keep,
                replace: false,
            };
            let pb = out.spinner(&format!("Creating snapshot of the {} network", opts.network_type));
            let meta = snapshot::create(&ctx.app, &opts);
            pb.finish_and_clear();
            let meta = meta?;
            if out.json_mode {
                return out.json(&meta);
            }
            let size: u64 = meta.nodes.iter().map(|n| n.size).sum();
            out.success(&format!("Snapshot {} created", meta.name));
            out.kv("Nodes", &meta.node_count.to_string());
            out.kv("Size", &format_bytes(size));
            if let Some(base) = &meta.base_snapshot {
                out.kv("Base", base);
            }
        }
        SnapshotCommand::Restore(args) => {
            let pb = out.spinner(&format!("Restoring snapshot {}", args.name));
            let meta = snapshot::restore(&ctx.app, &args.name, args.network_type);
            pb.finish_and_clear();
            let meta = meta?;
            let target = args.network_type.unwrap_or(meta.network_type);
            out.success(&format!(
                "Restored {} ({} nodes) into the {} network",
                meta.name, meta.node_count, target
            ));
            out.info(&format!("Start it with: lux network start {}", target));
        }
        SnapshotCommand::List => {
            let rows = snapshot::list(&ctx.app)?;
            if rows.is_empty() && !out.json_mode {
                out.info("No snapshots found");
                return Ok(());
            }
            out.output(rows)?;
        }
        SnapshotCommand::Delete { name } => {
            snapshot::delete(&ctx.app, &name)?;
            out.success(&format!("Deleted snapshot {}", name));
        }
        SnapshotCommand::Cleanup(args) => {
            let config = args.to_config();
            let result = snapshot::cleanup(&ctx.app, &config);
            if out.json_mode {
                return out.json(&result);
            }
            let verb = if config.dry_run { "Would free" } else { "Freed" };
            if result.is_empty() {
                out.info("Nothing to clean up");
            } else {
                out.kv("Logs rotated", &result.logs_rotated.to_string());
                out.kv("Sessions removed", &result.sessions_removed.to_string());
                out.kv("Backups removed", &result.backups_removed.to_string());
                out.kv("Stale runs removed", &result.stale_removed.to_string());
                out.success(&format!("{} {}", verb, format_bytes(result.bytes_freed)));
            }
            for err in &result.errors {
                out.warning(err);
            }
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

    fn parse(argv: &[&str]) -> SnapshotCommand {
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Snapshot(args) => args.command,
            _ => panic!("expected snapshot command"),
        }
    }

    #[test]
    fn test_cleanup_defaults_match_config_defaults() {
        let SnapshotCommand::Cleanup(args) = parse(&["lux", "snapshot", "cleanup"]) else {
            panic!("expected cleanup");
        };
        let config = args.to_config();
        let defaults = CleanupConfig::default();
        assert_eq!(config.log_max_size, defaults.log_max_size);
        assert_eq!(config.log_max_age, defaults.log_max_age);
        assert_eq!(config.backup_max_age, defaults.backup_max_age);
        assert_eq!(config.stale_max_age, defaults.stale_max_age);
    }

    #[test]
    fn test_cleanup_keeps_global_verbose() {
        let cli = Cli::try_parse_from(["lux", "snapshot", "cleanup", "-v"]).unwrap();
        assert!(cli.verbose);
        let Commands::Snapshot(SnapshotArgs { command: SnapshotCommand::Cleanup(args) }) = cli.command else {
            panic!("expected cleanup");
        };
        assert!(!args.to_config().verbose);

        let SnapshotCommand::Cleanup(args) =
            parse(&["lux", "snapshot", "cleanup", "--list-removed", "--dry-run"])
        else {
            panic!("expected cleanup");
        };
        let config = args.to_config();
        assert!(config.verbose);
        assert!(config.dry_run);
    }

    #[test]
    fn test_full_conflicts_with_incremental() {
        assert!(Cli::try_parse_from([
            "lux", "snapshot", "create", "--full", "--incremental-from", "base"
        ])
        .is_err());

        let SnapshotCommand::Create(args) =
            parse(&["lux", "snapshot", "create", "nightly", "--network-type", "devnet", "--keep", "3"])
        else {
            panic!("expected create");
        };
        assert_eq!(args.name.as_deref(), Some("nightly"));
        assert_eq!(args.network_type, NetworkType::Devnet);
        assert_eq!(args.keep, Some(3));
    }
}
