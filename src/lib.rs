// ProxBalance - Cluster-wide workload rebalancer for Proxmox VE
// Core library module
//
// The pipeline runs in stages: inventory → feature gating → classification
// (during inventory) → grouping → scoring → planning → execution, driven by
// the service loop. The world state built from inventory is single-writer
// and discarded at the end of every cycle.

pub mod api;
pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod features;
pub mod grouping;
pub mod inventory;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod planner;
pub mod power;
pub mod report;
pub mod scoring;
pub mod service;

pub use error::{BalancerError, Result};

/// Application name used in operator-facing output.
pub const APP_NAME: &str = "ProxBalance";

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
