//! ---
//! fwu_section: "05-networking-external-interfaces"
//! fwu_subsection: "binary"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Control CLI for administrators interacting with FW-Upgrader."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use fwu_persistence::{replay_journal, BatchSummary};

#[derive(Debug, Subcommand)]
pub enum JournalCommand {
    /// Rebuild every operation recorded in a journal file.
    Replay(ReplayArgs),
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Journal file written by a journaled store.
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Print one line per operation instead of the full JSON records.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    summary: bool,
}

pub fn run(command: JournalCommand) -> Result<()> {
    match command {
        JournalCommand::Replay(args) => replay(args),
    }
}

fn replay(args: ReplayArgs) -> Result<()> {
    let operations = replay_journal(&args.file)
        .with_context(|| format!("unable to replay journal {}", args.file.display()))?;
    if !args.summary {
        let records: Vec<_> = operations.values().collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    for operation in operations.values() {
        println!(
            "{}  {:<12} {:<24} {} log lines",
            operation.id,
            operation.status.to_string(),
            operation.device,
            operation.log.len()
        );
    }
    let summary = BatchSummary::from_statuses(operations.values().map(|op| op.status));
    println!(
        "{} operations: {} success, {} failed, {} aborted, {} in progress",
        summary.total(),
        summary.success,
        summary.failed,
        summary.aborted,
        summary.in_progress
    );
    Ok(())
}
