//! Node inventory.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::pressure;
use crate::api::ClusterApi;
use crate::config::Config;
use crate::error::Result;
use crate::model::{Node, ResourceKind, ResourceStat};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Collect all online nodes. Ignoring a node drops it (and therefore all of
/// its guests) from the world entirely.
pub async fn collect(api: &dyn ClusterApi, config: &Config) -> Result<BTreeMap<String, Node>> {
    let mut nodes = BTreeMap::new();

    for entry in api.list_nodes().await? {
        if entry.status != "online" {
            debug!("Skipping node {}: not online", entry.node);
            continue;
        }
        if config.proxmox_cluster.ignore_nodes.contains(&entry.node) {
            warn!("Node {} has been set to be ignored. Not adding node!", entry.node);
            continue;
        }

        let version = match api.node_version(&entry.node).await {
            Ok(info) => info.version,
            Err(e) => {
                warn!("Version query for node {} failed: {}", entry.node, e);
                String::new()
            }
        };

        let node_pressure = pressure::fetch_node(api, &entry.node).await;

        let maintenance = config
            .proxmox_cluster
            .maintenance_nodes
            .contains(&entry.node);
        if maintenance {
            warn!("Node {} has been set to maintenance mode", entry.node);
        }

        let mut node = Node {
            name: entry.node.clone(),
            version,
            // The reported cpu figure is a 0..1 load fraction.
            cpu: ResourceStat::new(entry.maxcpu, entry.cpu * entry.maxcpu),
            memory: ResourceStat::new(entry.maxmem, entry.mem),
            disk: ResourceStat::new(entry.maxdisk, entry.disk),
            pressure: node_pressure,
            maintenance,
            ignore: false,
            pressure_hot: false,
            powered_down: false,
        };
        apply_reservations(&mut node, config);

        nodes.insert(entry.node, node);
    }

    debug!("Collected {} online nodes", nodes.len());
    Ok(nodes)
}

/// Withhold operator-reserved capacity from a node's totals. A reservation
/// that would push the total below what is already used is skipped.
fn apply_reservations(node: &mut Node, config: &Config) {
    for kind in ResourceKind::ALL {
        let Some(reserve) = config.balancing.reserve_for(&node.name, kind) else {
            continue;
        };
        let amount = match kind {
            ResourceKind::Cpu => reserve,
            ResourceKind::Memory | ResourceKind::Disk => reserve * GIB,
        };
        let stat = node.resource_mut(kind);
        if stat.total - amount < stat.used {
            warn!(
                "Skipping {} reservation on node {}: {} would drop the total below current usage",
                kind, node.name, reserve
            );
            continue;
        }
        stat.total -= amount;
        stat.recompute();
        debug!("Reserved {} {} on node {}", reserve, kind, node.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceReserve;
    use crate::model::PressureSet;

    fn test_node(memory_total: f64, memory_used: f64) -> Node {
        Node {
            name: "pve01".to_string(),
            version: "9.0.3".to_string(),
            cpu: ResourceStat::new(16.0, 2.0),
            memory: ResourceStat::new(memory_total, memory_used),
            disk: ResourceStat::new(500.0 * GIB, 100.0 * GIB),
            pressure: PressureSet::default(),
            maintenance: false,
            ignore: false,
            pressure_hot: false,
            powered_down: false,
        }
    }

    #[test]
    fn test_reservation_reduces_total() {
        let mut config = Config::default();
        config.balancing.node_resource_reserve.insert(
            "defaults".to_string(),
            ResourceReserve {
                memory: Some(4.0),
                ..Default::default()
            },
        );
        let mut node = test_node(64.0 * GIB, 8.0 * GIB);
        apply_reservations(&mut node, &config);
        assert_eq!(node.memory.total, 60.0 * GIB);
        assert!((node.memory.used_percent - (8.0 / 60.0 * 100.0)).abs() < 1e-6);
    }

    #[test]
    fn test_reservation_below_usage_is_skipped() {
        let mut config = Config::default();
        config.balancing.node_resource_reserve.insert(
            "pve01".to_string(),
            ResourceReserve {
                memory: Some(60.0),
                ..Default::default()
            },
        );
        let mut node = test_node(64.0 * GIB, 8.0 * GIB);
        apply_reservations(&mut node, &config);
        assert_eq!(node.memory.total, 64.0 * GIB);
    }
}
