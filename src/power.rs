//! Node power management.
//!
//! Static mode: while the cluster keeps more free capacity than the
//! operator requires and more than the minimum node count remains, the node
//! with the most free resources is deducted from the cluster totals and
//! flagged maintenance + powered-down so the planner drains it. After the
//! migrations of the cycle complete, drained nodes are shut down over the
//! API. A node without a Wake-on-LAN MAC address is never powered off; it
//! could not be brought back remotely.

use tracing::{debug, error, info, warn};

use crate::api::ClusterApi;
use crate::config::PowerConfig;
use crate::model::{Node, WorldState};

/// Flag surplus nodes for drain and shutdown.
pub fn evaluate(world: &mut WorldState, config: &PowerConfig) {
    if !config.enable {
        debug!("Power management is not enabled");
        return;
    }

    loop {
        let free_percent = world.cluster.free_percent(config.method);
        if free_percent <= config.cluster_min_free_resources {
            debug!(
                "Free {} resources at {:.2}% do not exceed the required {:.2}%; power evaluation stopped",
                config.method, free_percent, config.cluster_min_free_resources
            );
            break;
        }
        if world.cluster.node_count_available <= config.cluster_min_nodes {
            warn!(
                "A minimum of {} nodes is required, {} are available. Cannot proceed!",
                config.cluster_min_nodes, world.cluster.node_count_available
            );
            break;
        }

        // The emptiest node costs the fewest migrations to drain.
        let candidate = world
            .nodes
            .values()
            .filter(|node| !node.maintenance)
            .fold(None::<&Node>, |best, node| match best {
                Some(current)
                    if node.resource(config.method).used_percent
                        >= current.resource(config.method).used_percent =>
                {
                    Some(current)
                }
                _ => Some(node),
            })
            .map(|node| node.name.clone());
        let Some(name) = candidate else {
            break;
        };

        if let Some(node) = world.nodes.get(&name).cloned() {
            world.cluster.remove_node(&node);
        }
        if let Some(node) = world.nodes.get_mut(&name) {
            node.maintenance = true;
            node.powered_down = true;
        }
        info!(
            "Node {} scheduled for power-down; free {} resources now at {:.2}%",
            name,
            config.method,
            world.cluster.free_percent(config.method)
        );
    }
}

/// Shut down every drained node that was flagged for power-down. Nodes
/// still hosting running guests, and nodes without a Wake-on-LAN MAC, stay
/// up.
pub async fn shutdown_flagged(api: &dyn ClusterApi, world: &WorldState) {
    for (name, node) in &world.nodes {
        if !(node.maintenance && node.powered_down) {
            continue;
        }

        match count_running_guests(api, name).await {
            Ok(0) => {}
            Ok(count) => {
                warn!(
                    "Node {} still has {} running guest(s). Shutdown will be skipped.",
                    name, count
                );
                continue;
            }
            Err(e) => {
                warn!("Could not verify guests on node {}: {}. Shutdown will be skipped.", name, e);
                continue;
            }
        }

        let has_wol_mac = match api.node_config(name).await {
            Ok(config) => config.wakeonlan.is_some(),
            Err(e) => {
                debug!("Failed to get WOL MAC address for node {}: {}", name, e);
                false
            }
        };
        if !has_wol_mac {
            error!(
                "Node {} cannot be powered off due to a missing WOL MAC. Please define a valid WOL MAC for this node.",
                name
            );
            continue;
        }

        match api.shutdown_node(name).await {
            Ok(()) => info!("Node {} is shutting down", name),
            Err(e) => error!("Error while powering off node {}: {}", name, e),
        }
    }
}

async fn count_running_guests(api: &dyn ClusterApi, node: &str) -> crate::error::Result<usize> {
    let vms = api.list_vms(node).await?;
    let cts = api.list_containers(node).await?;
    Ok(vms.iter().filter(|g| g.status == "running").count()
        + cts.iter().filter(|g| g.status == "running").count())
}
