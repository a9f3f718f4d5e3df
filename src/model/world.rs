//! The composed world state threaded through the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{GroupSet, Guest, HaRule, Node, Pool, ResourceKind};
use crate::config::{BalancingConfig, Config};

/// Planner scratch fields: which guest/node the next move concerns and why.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannerScratch {
    pub balance: bool,
    pub enforce_affinity: bool,
    pub enforce_pinning: bool,
    pub balance_next_guest: String,
    pub balance_next_node: String,
    pub balance_reason: String,
    /// Guests already picked as psi victims this cycle.
    pub processed_guests_psi: Vec<String>,
}

/// Per-resource usage strings captured before and after planning, kept for
/// operator-facing logs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub cpu: String,
    pub memory: String,
    pub disk: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub before: UsageSnapshot,
    pub after: UsageSnapshot,
}

/// Cluster-wide aggregates consumed by power management.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterTotals {
    pub node_count_overall: usize,
    pub node_count_available: usize,
    pub cpu_total: f64,
    pub cpu_used: f64,
    pub memory_total: f64,
    pub memory_used: f64,
    pub disk_total: f64,
    pub disk_used: f64,
}

impl ClusterTotals {
    /// Recompute from the current node set. Maintenance nodes still count as
    /// available; only removal via [`ClusterTotals::remove_node`] shrinks the
    /// pool.
    pub fn from_nodes(nodes: &BTreeMap<String, Node>) -> Self {
        let mut totals = ClusterTotals {
            node_count_overall: nodes.len(),
            node_count_available: nodes.values().filter(|n| !n.maintenance).count(),
            ..Default::default()
        };
        for node in nodes.values() {
            totals.cpu_total += node.cpu.total;
            totals.cpu_used += node.cpu.used;
            totals.memory_total += node.memory.total;
            totals.memory_used += node.memory.used;
            totals.disk_total += node.disk.total;
            totals.disk_used += node.disk.used;
        }
        totals
    }

    /// Deduct one node's capacity, e.g. when power management schedules it
    /// for shutdown.
    pub fn remove_node(&mut self, node: &Node) {
        self.node_count_available = self.node_count_available.saturating_sub(1);
        self.cpu_total -= node.cpu.total;
        self.cpu_used -= node.cpu.used;
        self.memory_total -= node.memory.total;
        self.memory_used -= node.memory.used;
        self.disk_total -= node.disk.total;
        self.disk_used -= node.disk.used;
    }

    pub fn free_percent(&self, kind: ResourceKind) -> f64 {
        let (total, used) = match kind {
            ResourceKind::Cpu => (self.cpu_total, self.cpu_used),
            ResourceKind::Memory => (self.memory_total, self.memory_used),
            ResourceKind::Disk => (self.disk_total, self.disk_used),
        };
        if total > 0.0 {
            (total - used).max(0.0) / total * 100.0
        } else {
            0.0
        }
    }
}

/// Cycle metadata: the (mutable) balancing options, gating flags, snapshots
/// and planner scratch. Excluded from the JSON world dump because the
/// embedded configuration may carry credentials.
#[derive(Debug, Clone, Default)]
pub struct Meta {
    pub balancing: BalancingConfig,
    /// True when at least one node runs a platform version below the feature
    /// cutoff.
    pub cluster_legacy_nodes: bool,
    pub statistics: Statistics,
    pub scratch: PlannerScratch,
}

/// The full world state of one planning cycle. Single-writer: built by
/// inventory, mutated by the planner, read by the executor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorldState {
    #[serde(skip)]
    pub meta: Meta,
    pub nodes: BTreeMap<String, Node>,
    pub guests: BTreeMap<String, Guest>,
    pub pools: BTreeMap<String, Pool>,
    pub ha_rules: BTreeMap<String, HaRule>,
    pub groups: GroupSet,
    pub cluster: ClusterTotals,
}

impl WorldState {
    pub fn new(config: &Config) -> Self {
        WorldState {
            meta: Meta {
                balancing: config.balancing.clone(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Sum of one resource's used values across all nodes. Conserved by
    /// planner moves.
    pub fn total_used(&self, kind: ResourceKind) -> f64 {
        self.nodes.values().map(|n| n.resource(kind).used).sum()
    }
}
