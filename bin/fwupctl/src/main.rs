//! ---
//! fwu_section: "05-networking-external-interfaces"
//! fwu_subsection: "binary"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Control CLI for administrators interacting with FW-Upgrader."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use fwu_common::{init_tracing, AppConfig};

mod config;
mod journal;
mod simulate;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "FW-Upgrader administrative control utility",
    long_about = None
)]
struct Cli {
    /// Configuration file (falls back to FWU_CONFIG, then configs/fwu.toml).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Also write a rolling JSON log under the configured log directory.
    #[arg(long = "log-file", global = true, action = ArgAction::SetTrue)]
    log_file: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand, about = "Configuration actions")]
    Config(config::ConfigCommand),
    #[command(about = "List known image types and their compatible boards")]
    Catalog(config::CatalogArgs),
    #[command(about = "Run a fleet upgrade against simulated devices")]
    Simulate(simulate::SimulateArgs),
    #[command(subcommand, about = "Operation journal actions")]
    Journal(journal::JournalCommand),
}

/// Resolve the effective configuration for `explicit`, defaulting when nothing exists.
pub(crate) fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    match explicit {
        Some(path) => AppConfig::from_path(path.to_path_buf()),
        None => AppConfig::load_or_default(&[PathBuf::from("configs/fwu.toml")]),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.log_file {
        let config = load_config(cli.config.as_deref())?;
        init_tracing("fwupctl", &config.logging)?;
    } else {
        fwu_logging::init();
    }
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Config(cmd) => config::run(cmd, config_path)?,
        Commands::Catalog(args) => config::catalog(args, config_path)?,
        Commands::Simulate(args) => simulate::run(args, config_path)?,
        Commands::Journal(cmd) => journal::run(cmd)?,
    }
    Ok(())
}
