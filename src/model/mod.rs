// # World State Model
//
// Strongly typed view of one planning cycle: nodes, guests, pools, HA rules,
// materialized groups and planner scratch state. Every entity is built fresh
// from the cluster inventory, mutated only by the planner, and discarded at
// cycle end.
//
// The dynamic `<method>_<mode>_percent` member lookups of loosely typed
// implementations are replaced by accessor methods taking `ResourceKind` and
// `BalanceMode`.

pub mod groups;
pub mod guest;
pub mod node;
pub mod world;

pub use groups::{AffinityGroup, AntiAffinityGroup, GroupSet};
pub use guest::{Guest, GuestResource};
pub use node::{Node, ResourceStat};
pub use world::{ClusterTotals, Meta, PlannerScratch, Statistics, UsageSnapshot, WorldState};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Balanced resource dimension. Doubles as the balancing method selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Memory,
    Disk,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Cpu, ResourceKind::Memory, ResourceKind::Disk];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
            ResourceKind::Disk => "disk",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How node load is measured when comparing nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceMode {
    Assigned,
    Used,
    Psi,
}

impl fmt::Display for BalanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceMode::Assigned => write!(f, "assigned"),
            BalanceMode::Used => write!(f, "used"),
            BalanceMode::Psi => write!(f, "psi"),
        }
    }
}

/// Guest flavor. VMs live-migrate; containers restart-migrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestKind {
    Vm,
    Ct,
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestKind::Vm => write!(f, "vm"),
            GuestKind::Ct => write!(f, "ct"),
        }
    }
}

/// Affinity semantics of a pool policy or HA rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AffinityType {
    #[serde(rename = "affinity")]
    Affinity,
    #[serde(rename = "anti-affinity")]
    AntiAffinity,
}

/// Pressure stall information for one resource: smoothed averages plus the
/// spike (max over the recent window), and the derived hot flag.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PressureQuad {
    pub some_avg: f64,
    pub full_avg: f64,
    pub some_spike: f64,
    pub full_spike: f64,
    pub hot: bool,
}

/// Per-resource pressure quadruples for a node or guest.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PressureSet {
    pub cpu: PressureQuad,
    pub memory: PressureQuad,
    pub disk: PressureQuad,
}

impl PressureSet {
    pub fn get(&self, kind: ResourceKind) -> &PressureQuad {
        match kind {
            ResourceKind::Cpu => &self.cpu,
            ResourceKind::Memory => &self.memory,
            ResourceKind::Disk => &self.disk,
        }
    }

    pub fn get_mut(&mut self, kind: ResourceKind) -> &mut PressureQuad {
        match kind {
            ResourceKind::Cpu => &mut self.cpu,
            ResourceKind::Memory => &mut self.memory,
            ResourceKind::Disk => &mut self.disk,
        }
    }

    pub fn any_hot(&self) -> bool {
        self.cpu.hot || self.memory.hot || self.disk.hot
    }
}

/// Pool definition with operator-supplied balancing semantics resolved from
/// configuration at classification time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    pub members: Vec<String>,
}

/// HA rule translated into rebalancer vocabulary. Disabled rules never reach
/// this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaRule {
    pub rule: String,
    #[serde(rename = "type")]
    pub rule_type: AffinityType,
    /// Permitted nodes, when the rule restricts placement.
    pub nodes: Vec<String>,
    /// Member guests by numeric id.
    pub members: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_kind_roundtrip() {
        for kind in ResourceKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_affinity_type_wire_names() {
        let a: AffinityType = serde_json::from_str("\"affinity\"").unwrap();
        assert_eq!(a, AffinityType::Affinity);
        let b: AffinityType = serde_json::from_str("\"anti-affinity\"").unwrap();
        assert_eq!(b, AffinityType::AntiAffinity);
    }

    #[test]
    fn test_pressure_set_accessors() {
        let mut set = PressureSet::default();
        set.get_mut(ResourceKind::Memory).full_spike = 42.0;
        assert_eq!(set.get(ResourceKind::Memory).full_spike, 42.0);
        assert!(!set.any_hot());
        set.get_mut(ResourceKind::Cpu).hot = true;
        assert!(set.any_hot());
    }
}
