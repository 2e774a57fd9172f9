use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};

#[derive(Debug, Parser)]
#[command(
    name = "dmr",
    about = "Republish archived danmaku comments and reconcile what the remote kept",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit a candidate batch to a video part, deduplicated and paced
    Send {
        /// Target video id (BV...)
        #[arg(long)]
        bvid: String,
        /// Target part id (cid / oid)
        #[arg(long)]
        cid: u64,
        /// JSONL file of candidate comments
        #[arg(long)]
        candidates: PathBuf,
        /// Fixed pacing seed, for reproducible delay schedules
        #[arg(long)]
        seed: Option<u64>,
        /// Resend even if the ledger already has the comment
        #[arg(long)]
        no_dedup: bool,
    },
    /// Check the remote comment list against the ledger
    Reconcile {
        #[arg(long)]
        bvid: String,
        #[arg(long)]
        cid: u64,
        /// Run a single cycle and exit (default)
        #[arg(long)]
        once: bool,
        /// Keep reconciling on the configured interval
        #[arg(long)]
        daemon: bool,
    },
    /// Show ledger paths and per-target delivery counts
    Status,
    /// Print the effective configuration and recognized environment knobs
    Config,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let report = match cli.command {
        Command::Send {
            bvid,
            cid,
            candidates,
            seed,
            no_dedup,
        } => commands::send::run(&commands::send::SendOptions {
            bvid,
            cid,
            candidates,
            seed,
            no_dedup,
        })?,
        Command::Reconcile {
            bvid,
            cid,
            once,
            daemon,
        } => commands::reconcile::run(&commands::reconcile::ReconcileOptions {
            bvid,
            cid,
            once,
            daemon,
        })?,
        Command::Status => commands::status::run()?,
        Command::Config => commands::config::run()?,
    };

    print_report(&report);
    if !report.ok {
        bail!("{} finished with issues", report.command);
    }
    Ok(())
}

fn print_report(report: &CommandReport) {
    for detail in &report.details {
        println!("{detail}");
    }
    for issue in &report.issues {
        eprintln!("issue: {issue}");
    }
}
