//! ---
//! fwu_section: "05-networking-external-interfaces"
//! fwu_subsection: "binary"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Control CLI for administrators interacting with FW-Upgrader."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
use std::path::Path;

use anyhow::Result;
use clap::{Args, Subcommand};
use fwu_core::{HardwareCatalog, UpgraderRegistry};
use fwu_logging::{log_operation_event, OperationOutcome};
use serde::Serialize;

use crate::load_config;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse and validate the configuration, then print the effective settings.
    Check,
}

#[derive(Debug, Args)]
pub struct CatalogArgs {
    /// Print the catalog as JSON instead of a table.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    json: bool,
}

pub fn run(command: ConfigCommand, path: Option<&Path>) -> Result<()> {
    match command {
        ConfigCommand::Check => check(path),
    }
}

fn check(path: Option<&Path>) -> Result<()> {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(err) => {
            log_operation_event(
                None,
                "config_check",
                &format!("{err:#}"),
                OperationOutcome::Fault,
            );
            return Err(err);
        }
    };
    let upgraders = UpgraderRegistry::from_config(&config.upgraders);
    let upgrade = &config.upgrade;
    println!("configuration ok");
    println!(
        "retries: {} attempts, base delay {}s, jitter {}s",
        upgrade.max_attempts,
        upgrade.retry_base_delay.as_secs(),
        upgrade.retry_jitter.as_secs()
    );
    println!(
        "timeouts: command {}s, flash {}s",
        upgrade.command_timeout.as_secs(),
        upgrade.flash_timeout.as_secs()
    );
    println!(
        "reconnect: {} attempts, settle {}s, interval {}s",
        upgrade.reconnect.max_attempts,
        upgrade.reconnect.settle_delay.as_secs(),
        upgrade.reconnect.interval.as_secs()
    );
    println!(
        "journal: {}",
        if config.journal.enabled {
            config.journal.path.display().to_string()
        } else {
            "disabled".to_owned()
        }
    );
    println!(
        "update strategies: {}",
        upgraders.tags().collect::<Vec<_>>().join(", ")
    );
    log_operation_event(
        None,
        "config_check",
        "configuration validated",
        OperationOutcome::Success,
    );
    Ok(())
}

#[derive(Serialize)]
struct CatalogRow<'a> {
    image_type: &'a str,
    label: &'a str,
    boards: &'a [String],
}

pub fn catalog(args: CatalogArgs, path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    let catalog = HardwareCatalog::from_config(&config.hardware);
    let rows: Vec<CatalogRow<'_>> = catalog
        .iter()
        .map(|(image_type, entry)| CatalogRow {
            image_type,
            label: &entry.label,
            boards: &entry.boards,
        })
        .collect();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for row in rows {
        println!("{}\n  label:  {}\n  boards: {}", row.image_type, row.label, row.boards.join(", "));
    }
    Ok(())
}
