//! Live node resource accounting.

use tracing::debug;

use crate::model::{ResourceKind, WorldState};

/// Move the scratch guest onto the scratch target node: add its totals and
/// usage to the destination, subtract them from the source, re-derive the
/// percentages on both sides and record the new target on the guest.
///
/// A missing or empty target (e.g. strict pinning with every pinned node in
/// maintenance) leaves the guest where it is.
pub fn commit_move(world: &mut WorldState) {
    let guest_name = world.meta.scratch.balance_next_guest.clone();
    let target = world.meta.scratch.balance_next_node.clone();

    let Some(guest) = world.guests.get(&guest_name) else {
        debug!("No guest named {} to move", guest_name);
        return;
    };
    if !world.nodes.contains_key(&target) {
        debug!("No valid target node for guest {}; leaving it in place", guest_name);
        return;
    }

    let source = guest.node_current.clone();
    let amounts: Vec<(ResourceKind, f64, f64)> = ResourceKind::ALL
        .iter()
        .map(|&kind| {
            let resource = guest.resource(kind);
            (kind, resource.total, resource.used)
        })
        .collect();

    if let Some(destination) = world.nodes.get_mut(&target) {
        for &(kind, total, used) in &amounts {
            let stat = destination.resource_mut(kind);
            stat.assigned += total;
            stat.used += used;
            stat.recompute();
        }
    }
    if let Some(origin) = world.nodes.get_mut(&source) {
        for &(kind, total, used) in &amounts {
            let stat = origin.resource_mut(kind);
            stat.assigned -= total;
            stat.used -= used;
            stat.recompute();
        }
    }

    if let Some(guest) = world.guests.get_mut(&guest_name) {
        guest.node_target = target.clone();
    }
    debug!("Set guest {} from node {} to node {}", guest_name, source, target);
}
