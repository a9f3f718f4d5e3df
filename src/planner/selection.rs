//! Node selection primitives.
//!
//! Nodes are kept in name order, so comparing with strict inequality keeps
//! the lexicographically first node among ties; selection is deterministic
//! for a fixed inventory.

use tracing::debug;

use crate::model::{Node, WorldState};

/// The non-maintenance node with the most free resources under the
/// configured method and mode, optionally restricted to an allowed list.
/// An empty allowed list means no restriction.
pub fn most_free_node(world: &WorldState, allowed: Option<&[String]>) -> Option<String> {
    let method = world.meta.balancing.method;
    let mode = world.meta.balancing.mode;

    world
        .nodes
        .values()
        .filter(|node| !node.maintenance)
        .filter(|node| match allowed {
            Some(list) if !list.is_empty() => list.contains(&node.name),
            _ => true,
        })
        .fold(None::<&Node>, |best, node| match best {
            Some(current) if node.load_metric(method, mode) >= current.load_metric(method, mode) => {
                Some(current)
            }
            _ => Some(node),
        })
        .map(|node| node.name.clone())
}

/// Most-free selection that records the choice in the planner scratch.
pub fn select_most_free(world: &mut WorldState, allowed: Option<&[String]>) -> Option<String> {
    let chosen = most_free_node(world, allowed);
    world.meta.scratch.balance_reason = "resources".to_string();
    world.meta.scratch.balance_next_node = chosen.clone().unwrap_or_default();
    if let Some(node) = &chosen {
        debug!("Most free node is {}", node);
    }
    chosen
}

/// The node with the highest used percentage for the configured method.
/// Guests are only pulled off the currently most-loaded node.
pub fn most_loaded_node(world: &WorldState) -> Option<String> {
    let method = world.meta.balancing.method;

    world
        .nodes
        .values()
        .fold(None::<&Node>, |busiest, node| match busiest {
            Some(current)
                if node.resource(method).used_percent <= current.resource(method).used_percent =>
            {
                Some(current)
            }
            _ => Some(node),
        })
        .map(|node| node.name.clone())
}
