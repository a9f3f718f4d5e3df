//! Guest inventory.
//!
//! Guests are scoped to their node, so collection walks every node and
//! gathers running VMs and containers. Each guest is classified from its
//! tags, pool memberships and HA rules while being built.

use std::collections::{BTreeMap, BTreeSet};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::pressure;
use crate::api::{ClusterApi, GuestListEntry};
use crate::classify::{self, ClassifyInput};
use crate::config::Config;
use crate::error::Result;
use crate::model::{Guest, GuestKind, GuestResource, HaRule, Node, Pool};

/// Collect all running guests across the given nodes.
pub async fn collect(
    api: &dyn ClusterApi,
    nodes: &BTreeMap<String, Node>,
    pools: &BTreeMap<String, Pool>,
    ha_rules: &BTreeMap<String, HaRule>,
    config: &Config,
) -> Result<BTreeMap<String, Guest>> {
    let cluster_nodes: BTreeSet<String> = nodes.keys().cloned().collect();
    let mut guests = BTreeMap::new();

    for node_name in nodes.keys() {
        for entry in api.list_vms(node_name).await? {
            if entry.status != "running" {
                debug!("Metric for VM {} ignored because VM is not running", entry.name);
                continue;
            }
            let guest = build_guest(
                api,
                node_name,
                GuestKind::Vm,
                entry,
                &cluster_nodes,
                pools,
                ha_rules,
                config,
            )
            .await;
            guests.insert(guest.name.clone(), guest);
        }

        for entry in api.list_containers(node_name).await? {
            if entry.status != "running" {
                debug!("Metric for CT {} ignored because CT is not running", entry.name);
                continue;
            }
            let guest = build_guest(
                api,
                node_name,
                GuestKind::Ct,
                entry,
                &cluster_nodes,
                pools,
                ha_rules,
                config,
            )
            .await;
            guests.insert(guest.name.clone(), guest);
        }
    }

    debug!("Collected {} running guests", guests.len());
    Ok(guests)
}

#[allow(clippy::too_many_arguments)]
async fn build_guest(
    api: &dyn ClusterApi,
    node_name: &str,
    kind: GuestKind,
    entry: GuestListEntry,
    cluster_nodes: &BTreeSet<String>,
    pools: &BTreeMap<String, Pool>,
    ha_rules: &BTreeMap<String, HaRule>,
    config: &Config,
) -> Guest {
    // Pace config fetches the same way pressure fetches are paced.
    sleep(pressure::SAMPLE_YIELD).await;
    let tags = match api.guest_config(node_name, kind, entry.vmid).await {
        Ok(guest_config) => guest_config.tag_list(),
        Err(e) => {
            warn!("Config fetch for guest {} failed: {}", entry.name, e);
            Vec::new()
        }
    };

    let guest_pressure = pressure::fetch_guest(api, node_name, kind, entry.vmid).await;

    let pool_names = classify::pools_for_guest(&entry.name, pools);
    let guest_rules = classify::ha_rules_for_guest(entry.vmid, ha_rules);
    let constraints = classify::classify(&ClassifyInput {
        guest_name: &entry.name,
        vmid: entry.vmid,
        tags: &tags,
        pool_names: &pool_names,
        ha_rules: guest_rules,
        cluster_nodes,
        policies: &config.balancing.pools,
    });

    Guest {
        name: entry.name,
        id: entry.vmid,
        kind,
        node_current: node_name.to_string(),
        node_target: node_name.to_string(),
        cpu: GuestResource {
            total: entry.cpus,
            used: entry.cpu,
        },
        memory: GuestResource {
            total: entry.maxmem,
            used: entry.mem,
        },
        disk: GuestResource {
            total: entry.maxdisk,
            used: entry.disk,
        },
        pressure: guest_pressure,
        pressure_hot: false,
        tags,
        affinity_groups: constraints.affinity_groups,
        anti_affinity_groups: constraints.anti_affinity_groups,
        ignore: constraints.ignore,
        node_relationships: constraints.node_relationships,
        node_relationships_strict: constraints.node_relationships_strict,
        processed: false,
    }
}
