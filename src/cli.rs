//! Command-line interface definition.

use clap::Parser;
use std::path::PathBuf;

/// Cluster-wide workload rebalancer for Proxmox VE.
#[derive(Debug, Parser)]
#[command(name = "proxbalance", disable_version_flag = true)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Perform a dry-run without executing any actions
    #[arg(short = 'd', long = "dry-run")]
    pub dry_run: bool,

    /// Print the collected world state as JSON to stdout
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    /// Print the best next node and exit
    #[arg(short = 'b', long = "best-node")]
    pub best_node: bool,

    /// Print the current version and exit
    #[arg(short = 'v', long = "version")]
    pub version: bool,
}
