//! Scoring: assignment baselines, pressure hot flags and the balance
//! decision.

use tracing::{debug, info, warn};

use crate::model::{BalanceMode, ResourceKind, WorldState};

/// Seed every node's assigned figures from the guests currently placed on
/// it, walking the materialized affinity groups so each guest counts once.
pub fn set_node_assignments(world: &mut WorldState) {
    let mut additions: Vec<(String, f64, f64, f64)> = Vec::new();
    for group in world.groups.affinity.values() {
        for guest_name in &group.guests {
            if let Some(guest) = world.guests.get(guest_name) {
                additions.push((
                    guest.node_current.clone(),
                    guest.cpu.total,
                    guest.memory.total,
                    guest.disk.total,
                ));
            }
        }
    }

    for (node_name, cpu, memory, disk) in additions {
        if let Some(node) = world.nodes.get_mut(&node_name) {
            node.cpu.assigned += cpu;
            node.memory.assigned += memory;
            node.disk.assigned += disk;
            node.cpu.recompute();
            node.memory.recompute();
            node.disk.recompute();
        }
    }
}

/// Evaluate node pressure against the configured thresholds. Maintenance
/// and ignored nodes are skipped.
pub fn set_node_hot(world: &mut WorldState) {
    let balancing = world.meta.balancing.clone();
    for node in world.nodes.values_mut() {
        if node.maintenance || node.ignore {
            continue;
        }
        for kind in ResourceKind::ALL {
            let thresholds = balancing.node_psi(kind);
            let quad = node.pressure.get_mut(kind);
            quad.hot = (quad.full_avg >= thresholds.pressure_full
                && quad.some_avg >= thresholds.pressure_some)
                || quad.full_spike >= thresholds.pressure_spikes;
            if quad.hot {
                node.pressure_hot = true;
                warn!("Node {} is under {} pressure", node.name, kind);
            }
        }
    }
}

/// Evaluate guest pressure against the configured thresholds.
pub fn set_guest_hot(world: &mut WorldState) {
    let balancing = world.meta.balancing.clone();
    for guest in world.guests.values_mut() {
        if guest.ignore {
            continue;
        }
        for kind in ResourceKind::ALL {
            let thresholds = balancing.guest_psi(kind);
            let quad = guest.pressure.get_mut(kind);
            quad.hot = (quad.full_avg >= thresholds.pressure_full
                && quad.some_avg >= thresholds.pressure_some)
                || quad.full_spike >= thresholds.pressure_spikes;
            if quad.hot {
                guest.pressure_hot = true;
                debug!("Guest {} is under {} pressure", guest.name, kind);
            }
        }
    }
}

/// Raise the enforcement flags: pinning straight from configuration,
/// affinity only when the switch is on and a materialized group is
/// currently violated.
pub fn detect_affinity_violations(world: &mut WorldState) {
    world.meta.scratch.enforce_pinning = world.meta.balancing.enforce_pinning;
    world.meta.scratch.enforce_affinity = false;
    if !world.meta.balancing.enforce_affinity {
        return;
    }

    let mut violated = false;

    for (group_name, group) in &world.groups.affinity {
        if group.counter < 2 {
            continue;
        }
        let mut current_nodes: Vec<&str> = Vec::new();
        for guest_name in &group.guests {
            if let Some(guest) = world.guests.get(guest_name) {
                if !current_nodes.contains(&guest.node_current.as_str()) {
                    current_nodes.push(&guest.node_current);
                }
            }
        }
        let split = current_nodes.len() > 1;
        let on_maintenance = current_nodes
            .iter()
            .any(|n| world.nodes.get(*n).is_some_and(|node| node.maintenance));
        if split || on_maintenance {
            warn!("Affinity group {} is currently violated", group_name);
            violated = true;
        }
    }

    for (group_name, group) in &world.groups.anti_affinity {
        if group.counter < 2 {
            continue;
        }
        let mut seen: Vec<&str> = Vec::new();
        for guest_name in &group.guests {
            if let Some(guest) = world.guests.get(guest_name) {
                if seen.contains(&guest.node_current.as_str()) {
                    warn!("Anti-affinity group {} is currently violated", group_name);
                    violated = true;
                    break;
                }
                seen.push(&guest.node_current);
            }
        }
    }

    world.meta.scratch.enforce_affinity = violated;
}

/// The raw balance condition, re-evaluated by the planner between groups.
///
/// In assigned/used modes the spread between the most and least loaded node
/// must exceed the balanciness; a configured absolute threshold can only
/// raise the flag, never clear it. In psi mode any hot node or guest
/// triggers balancing.
pub fn balance_condition(world: &WorldState) -> bool {
    let balancing = &world.meta.balancing;
    match balancing.mode {
        BalanceMode::Assigned | BalanceMode::Used => {
            let values: Vec<f64> = world
                .nodes
                .values()
                .map(|n| n.resource(balancing.method).percent(balancing.mode))
                .collect();
            let Some(highest) = values.iter().copied().reduce(f64::max) else {
                return false;
            };
            let lowest = values.iter().copied().fold(highest, f64::min);

            let mut balance = highest - lowest > balancing.balanciness;
            if let Some(threshold) = balancing.threshold(balancing.method) {
                if highest > threshold {
                    balance = true;
                }
            }
            balance
        }
        BalanceMode::Psi => {
            world.nodes.values().any(|n| n.pressure_hot)
                || world.guests.values().any(|g| g.pressure_hot)
        }
    }
}

/// Decide whether this cycle balances at all and record it in the scratch
/// state.
pub fn decide_balance(world: &mut WorldState) {
    world.meta.scratch.balance = false;

    if world.groups.affinity.is_empty() {
        warn!("No guests for balancing found");
        return;
    }

    let balance = balance_condition(world);
    world.meta.scratch.balance = balance;

    let balancing = &world.meta.balancing;
    if balance {
        info!(
            "Guest balancing is required, balanced by {} and {}",
            balancing.method, balancing.mode
        );
    } else {
        debug!(
            "Guest balancing is ok, balanced by {} and {}",
            balancing.method, balancing.mode
        );
    }
}
