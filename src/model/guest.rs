//! Guest (VM or container) representation.

use serde::{Deserialize, Serialize};

use super::{GuestKind, PressureSet, ResourceKind};

/// One resource dimension of a guest: what it is allotted and what it
/// actually consumes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GuestResource {
    pub total: f64,
    pub used: f64,
}

/// A running guest as seen during one planning cycle.
///
/// `node_target` starts equal to `node_current`; the planner rewrites it and
/// the executor migrates every guest where the two differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guest {
    pub name: String,
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: GuestKind,
    pub node_current: String,
    pub node_target: String,
    pub cpu: GuestResource,
    pub memory: GuestResource,
    pub disk: GuestResource,
    pub pressure: PressureSet,
    pub pressure_hot: bool,
    /// Raw tag list as returned by the cluster, `;`-delimited on the wire.
    pub tags: Vec<String>,
    pub affinity_groups: Vec<String>,
    pub anti_affinity_groups: Vec<String>,
    pub ignore: bool,
    /// Nodes this guest may be pinned to.
    pub node_relationships: Vec<String>,
    pub node_relationships_strict: bool,
    /// Set once the planner has considered this guest; enforces single-pass
    /// placement.
    pub processed: bool,
}

impl Guest {
    pub fn resource(&self, kind: ResourceKind) -> &GuestResource {
        match kind {
            ResourceKind::Cpu => &self.cpu,
            ResourceKind::Memory => &self.memory,
            ResourceKind::Disk => &self.disk,
        }
    }

    /// True when the planner decided to move this guest.
    pub fn wants_migration(&self) -> bool {
        self.node_target != self.node_current
    }
}
