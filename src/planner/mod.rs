// # Relocation Planner
//
// Assigns target nodes so that anti-affinity members spread, affinity
// members co-locate, pinned guests stay in their permitted set, maintenance
// nodes drain, and load imbalance shrinks. Greedy under constraints: small
// groups move first, node accounting updates live after every committed
// move, and each guest is placed at most once per cycle.

pub mod accounting;
pub mod selection;

pub use selection::most_free_node;

use std::cmp::Ordering;
use tracing::{debug, warn};

use crate::model::{BalanceMode, WorldState};
use crate::scoring;

/// Relocate every guest whose current node is in maintenance onto the
/// most-free non-maintenance node, updating accounting as moves commit.
pub fn drain_maintenance(world: &mut WorldState) {
    world.meta.scratch.balance_next_guest.clear();

    for guest_name in world.groups.maintenance.clone() {
        world.meta.scratch.balance_next_guest = guest_name.clone();
        if selection::select_most_free(world, None).is_none() {
            warn!(
                "No non-maintenance node available to take guest {}",
                guest_name
            );
            continue;
        }
        accounting::commit_move(world);
        if let Some(guest) = world.guests.get_mut(&guest_name) {
            guest.processed = true;
        }
        warn!(
            "Balancing may not be perfect because guest {} was located on a node which is in maintenance mode",
            guest_name
        );
    }
}

/// The relocation loop over affinity groups.
pub fn relocate(world: &mut WorldState) {
    let scratch = &world.meta.scratch;
    if !(scratch.balance || scratch.enforce_affinity || scratch.enforce_pinning) {
        debug!("No balancing required this cycle");
        return;
    }
    if scratch.balance {
        debug!("Balancing of guests will be performed. Reason: balanciness");
    }
    if scratch.enforce_affinity {
        debug!("Balancing of guests will be performed. Reason: enforce affinity");
    }
    if scratch.enforce_pinning {
        debug!("Balancing of guests will be performed. Reason: enforce pinning");
    }

    for group_name in ordered_groups(world) {
        // Accounting shifts with every committed move, so the balance
        // condition is re-evaluated before each group.
        if !scoring::balance_condition(world)
            && !world.meta.scratch.enforce_affinity
            && !world.meta.scratch.enforce_pinning
        {
            debug!("Cluster is balanced; stopping relocation");
            break;
        }

        // The whole group heads for one node to keep affinity.
        if selection::select_most_free(world, None).is_none() {
            break;
        }

        let members = match world.groups.affinity.get(&group_name) {
            Some(group) => group.guests.clone(),
            None => continue,
        };
        for guest_name in members {
            if !place_member(world, &group_name, &guest_name) {
                break;
            }
        }
    }
}

/// Place one affinity-group member. Returns false when the remaining
/// members of the group should be skipped.
fn place_member(world: &mut WorldState, group_name: &str, guest_name: &str) -> bool {
    let Some(guest) = world.guests.get(guest_name) else {
        return true;
    };
    if guest.processed {
        return true;
    }

    // Only pull guests off the currently most-loaded node.
    let Some(most_loaded) = selection::most_loaded_node(world) else {
        return false;
    };
    if guest.node_current != most_loaded {
        debug!(
            "Node {} is not the most loaded node; skipping remaining members of group {}",
            guest.node_current, group_name
        );
        return false;
    }

    // Sufficiency is a memory-only check against the candidate target.
    let guest_memory_used = guest.memory.used;
    let target = world.meta.scratch.balance_next_node.clone();
    let sufficient = world
        .nodes
        .get(&target)
        .is_some_and(|node| node.memory.free >= guest_memory_used);
    if !sufficient {
        debug!(
            "Node {} lacks free memory for guest {}; skipping",
            target, guest_name
        );
        return true;
    }

    if world.meta.balancing.mode == BalanceMode::Psi {
        // Only the unprocessed guest with the highest pressure spike moves.
        if psi_victim(world).as_deref() != Some(guest_name) {
            return true;
        }
    }

    world.meta.scratch.balance_next_guest = guest_name.to_string();

    match anti_affinity_target(world, guest_name) {
        AntiAffinityOutcome::NoNode => {
            warn!(
                "No feasible anti-affinity placement for guest {}; no move planned",
                guest_name
            );
            if let Some(guest) = world.guests.get_mut(guest_name) {
                guest.processed = true;
            }
            return true;
        }
        AntiAffinityOutcome::Assigned(node) => {
            world.meta.scratch.balance_next_node = node;
        }
        AntiAffinityOutcome::NotMember => {}
    }

    apply_pinning(world, guest_name);

    let ignored = world.guests.get(guest_name).is_some_and(|g| g.ignore);
    if ignored {
        debug!("Guest {} is marked as ignored; not moving", guest_name);
    } else {
        accounting::commit_move(world);
    }

    if let Some(guest) = world.guests.get_mut(guest_name) {
        guest.processed = true;
    }
    if world.meta.balancing.mode == BalanceMode::Psi {
        world
            .meta
            .scratch
            .processed_guests_psi
            .push(guest_name.to_string());
    }
    true
}

/// Affinity groups ordered by ascending member count, then by aggregate
/// memory usage (descending when larger guests go first), then by name for
/// determinism. Small, tight groups move first to keep total migrations low.
fn ordered_groups(world: &WorldState) -> Vec<String> {
    let larger_first = world.meta.balancing.balance_larger_guests_first;
    let mut entries: Vec<(String, usize, f64)> = world
        .groups
        .affinity
        .iter()
        .map(|(name, group)| (name.clone(), group.counter, group.memory_used))
        .collect();
    entries.sort_by(|a, b| {
        a.1.cmp(&b.1)
            .then_with(|| {
                let ordering = a.2.partial_cmp(&b.2).unwrap_or(Ordering::Equal);
                if larger_first {
                    ordering.reverse()
                } else {
                    ordering
                }
            })
            .then_with(|| a.0.cmp(&b.0))
    });
    entries.into_iter().map(|(name, _, _)| name).collect()
}

/// The unprocessed guest with the highest full-pressure spike for the
/// configured method.
fn psi_victim(world: &WorldState) -> Option<String> {
    let method = world.meta.balancing.method;
    world
        .guests
        .values()
        .filter(|guest| !guest.processed)
        .fold(None, |best: Option<&crate::model::Guest>, guest| match best {
            Some(current)
                if guest.pressure.get(method).full_spike
                    <= current.pressure.get(method).full_spike =>
            {
                Some(current)
            }
            _ => Some(guest),
        })
        .map(|guest| guest.name.clone())
}

enum AntiAffinityOutcome {
    /// The guest belongs to no anti-affinity group of interest.
    NotMember,
    /// A distinct node was reserved for the guest.
    Assigned(String),
    /// Every non-maintenance node is already taken; no move planned.
    NoNode,
}

/// Walk the guest's anti-affinity groups and reserve the first node that is
/// neither used by the group nor in maintenance.
fn anti_affinity_target(world: &mut WorldState, guest_name: &str) -> AntiAffinityOutcome {
    let mut outcome = AntiAffinityOutcome::NotMember;

    let group_names: Vec<String> = world.groups.anti_affinity.keys().cloned().collect();
    for group_name in group_names {
        let applies = world
            .groups
            .anti_affinity
            .get(&group_name)
            .is_some_and(|group| {
                group.counter >= 2 && group.guests.iter().any(|g| g == guest_name)
            });
        if !applies {
            debug!(
                "Guest {} is not included in anti-affinity group {}; skipping",
                guest_name, group_name
            );
            continue;
        }
        debug!(
            "Guest {} is included in anti-affinity group {}",
            guest_name, group_name
        );

        let candidate = world
            .nodes
            .values()
            .filter(|node| !node.maintenance)
            .map(|node| &node.name)
            .find(|name| {
                world
                    .groups
                    .anti_affinity
                    .get(&group_name)
                    .is_some_and(|group| !group.used_nodes.contains(*name))
            })
            .cloned();

        match candidate {
            Some(node) => {
                if let Some(group) = world.groups.anti_affinity.get_mut(&group_name) {
                    group.used_nodes.push(node.clone());
                }
                debug!(
                    "Node {} marked as used for anti-affinity group {} with guest {}",
                    node, group_name, guest_name
                );
                outcome = AntiAffinityOutcome::Assigned(node);
            }
            None => return AntiAffinityOutcome::NoNode,
        }
    }

    outcome
}

/// Override the scratch target with the pinning rules of the guest.
///
/// Strict pinning restricts the candidate set to the pin list. Non-strict
/// pinning races the pin list against the global most-free node; the winner
/// of that union can fall outside the pin list.
fn apply_pinning(world: &mut WorldState, guest_name: &str) {
    let (relationships, strict) = match world.guests.get(guest_name) {
        Some(guest) if !guest.node_relationships.is_empty() => (
            guest.node_relationships.clone(),
            guest.node_relationships_strict,
        ),
        _ => return,
    };

    let known: Vec<String> = relationships
        .into_iter()
        .filter(|node| {
            let exists = world.nodes.contains_key(node);
            if !exists {
                warn!(
                    "Pinned node {} for guest {} does not exist in the cluster; dropping",
                    node, guest_name
                );
            }
            exists
        })
        .collect();
    if known.is_empty() {
        return;
    }

    if strict {
        selection::select_most_free(world, Some(&known));
    } else {
        let mut allowed = known;
        if let Some(global) = selection::most_free_node(world, None) {
            allowed.push(global);
        }
        selection::select_most_free(world, Some(&allowed));
    }
}
