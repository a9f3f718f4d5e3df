// # Inventory Collection
//
// Snapshots the cluster into the in-memory world state: nodes (with
// reservations and maintenance flags), pools, HA rules and guests (with
// classification). Per-object fetch failures degrade to defaults and are
// logged; authentication and transport failures bubble up and terminate the
// cycle.

pub mod ha_rules;
pub mod guests;
pub mod nodes;
pub mod pools;
pub mod pressure;

use tracing::debug;

use crate::api::ClusterApi;
use crate::config::Config;
use crate::error::Result;
use crate::features;
use crate::model::{ClusterTotals, WorldState};

/// Build the world state for one planning cycle.
pub async fn collect_world(api: &dyn ClusterApi, config: &Config) -> Result<WorldState> {
    let mut world = WorldState::new(config);

    world.nodes = nodes::collect(api, config).await?;
    world.meta.cluster_legacy_nodes = features::any_legacy_node(&world.nodes);

    world.pools = pools::collect(api).await?;
    world.ha_rules = ha_rules::collect(api, world.meta.cluster_legacy_nodes).await?;
    world.guests =
        guests::collect(api, &world.nodes, &world.pools, &world.ha_rules, config).await?;
    world.cluster = ClusterTotals::from_nodes(&world.nodes);

    debug!(
        "World state ready: {} nodes, {} guests, {} pools, {} ha-rules",
        world.nodes.len(),
        world.guests.len(),
        world.pools.len(),
        world.ha_rules.len()
    );
    Ok(world)
}
