//! Observer hooks: per-node usage snapshots and the machine-readable world
//! dump.

use tracing::debug;

use crate::error::{BalancerError, Result};
use crate::model::{ResourceKind, UsageSnapshot, WorldState};

/// Which side of planning a snapshot describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Before,
    After,
}

/// Log the per-node usage percentages and store them in the cycle
/// statistics.
pub fn record_usage(world: &mut WorldState, phase: Phase) {
    let snapshot = UsageSnapshot {
        cpu: usage_line(world, ResourceKind::Cpu),
        memory: usage_line(world, ResourceKind::Memory),
        disk: usage_line(world, ResourceKind::Disk),
    };

    debug!("Nodes usage memory: {}", snapshot.memory);
    debug!("Nodes usage cpu:    {}", snapshot.cpu);
    debug!("Nodes usage disk:   {}", snapshot.disk);

    match phase {
        Phase::Before => world.meta.statistics.before = snapshot,
        Phase::After => world.meta.statistics.after = snapshot,
    }
}

fn usage_line(world: &WorldState, kind: ResourceKind) -> String {
    world
        .nodes
        .iter()
        .map(|(name, node)| format!("{}: {:.2}%", name, node.resource(kind).used_percent))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Pretty-printed JSON rendition of the world state. The `meta` section is
/// not serialized, so credentials embedded in the configuration can never
/// leak through a dump.
pub fn render_world(world: &WorldState) -> Result<String> {
    serde_json::to_string_pretty(world).map_err(|e| BalancerError::Serialization(e.to_string()))
}
