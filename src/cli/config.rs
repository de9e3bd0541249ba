//! `lux config` commands.

use super::Context;
use crate::config::lint_node_config;
use crate::Result;
use anyhow::bail;
use clap::{Args, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print a setting
    Get {
        /// Key as section.setting, e.g. local.numNodes
        key: String,
        /// Show which file the value came from
        #[arg(long)]
        source: bool,
    },
    /// Change a setting
    Set {
        key: String,
        value: String,
        /// Write to .luxconfig.toml in the working directory
        #[arg(long)]
        project: bool,
    },
    /// Print every setting with its effective value
    List,
    /// Write a config file with default values
    Init {
        #[arg(long)]
        project: bool,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Check a luxd node config file
    Lint {
        /// Path to the luxd config JSON
        path: PathBuf,
    },
}

#[derive(Serialize, Tabled)]
struct SettingRow {
    #[tabled(rename = "KEY")]
    key: String,
    #[tabled(rename = "VALUE")]
    value: String,
    #[tabled(rename = "SOURCE")]
    source: String,
}

/// Run the config command
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    let out = &ctx.out;
    let store = &ctx.store;
    match args.command {
        ConfigCommand::Get { key, source } => {
            let (value, from) = store.get(&key)?;
            if source {
                println!("{} = {} (source: {})", key, value, from);
            } else {
                println!("{} = {}", key, value);
            }
        }
        ConfigCommand::Set {
            key,
            value,
            project,
        } => {
            store.set(&key, &value, project)?;
            out.success(&format!(
                "Set {} = {} in {}",
                key,
                value,
                store.path(project).display()
            ));
        }
        ConfigCommand::List => {
            let rows: Vec<SettingRow> = store
                .list()?
                .into_iter()
                .map(|(key, value, source)| SettingRow {
                    key,
                    value,
                    source: source.to_string(),
                })
                .collect();
            out.output(rows)?;
        }
        ConfigCommand::Init { project, force } => {
            let path = store.init(project, force)?;
            out.success(&format!("Wrote default configuration to {}", path.display()));
        }
        ConfigCommand::Lint { path } => {
            let report = lint_node_config(&path)?;
            if out.json_mode {
                out.json(&report)?;
            } else {
                for warning in &report.warnings {
                    out.warning(warning);
                }
                for error in &report.errors {
                    out.error(error);
                }
            }
            if !report.is_ok() {
                bail!("{} has {} error(s)", path.display(), report.errors.len());
            }
            if !out.json_mode {
                out.success(&format!("{} looks good", path.display()));
            }
        }
    }
    Ok(())
}
