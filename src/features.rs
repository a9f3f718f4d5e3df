//! Version-gated feature handling.
//!
//! Clusters are routinely upgraded node by node, so a cycle may see mixed
//! platform versions. Features that need the newer API are disabled for the
//! whole cycle as soon as one node reports a version below the cutoff. A
//! missing or unparsable version counts as below the cutoff.

use once_cell::sync::Lazy;
use semver::Version;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::model::{BalanceMode, Node, WorldState};

/// Platform version introducing conntrack-state migration, pressure metrics
/// and HA rules.
static VERSION_CUTOFF: Lazy<Version> = Lazy::new(|| Version::new(9, 0, 0));

/// True when the version string is below the cutoff or cannot be parsed.
pub fn is_legacy_version(raw: &str) -> bool {
    match Version::parse(raw.trim()) {
        Ok(version) => version < *VERSION_CUTOFF,
        Err(_) => true,
    }
}

/// True when at least one node in the cluster is below the cutoff.
pub fn any_legacy_node(nodes: &BTreeMap<String, Node>) -> bool {
    nodes.values().any(|node| is_legacy_version(&node.version))
}

/// Disable features the lowest cluster version cannot support. Runs once per
/// cycle after inventory.
pub fn gate(world: &mut WorldState) {
    if !world.meta.cluster_legacy_nodes {
        debug!("All nodes support the full feature set");
        return;
    }

    let balancing = &mut world.meta.balancing;
    if balancing.with_conntrack_state {
        warn!("Pre-{} nodes detected: deactivating migration option 'with-conntrack-state'", *VERSION_CUTOFF);
        balancing.with_conntrack_state = false;
    }
    if balancing.mode == BalanceMode::Psi && balancing.enable {
        warn!("Pre-{} nodes detected: pressure data is unavailable, deactivating balancing", *VERSION_CUTOFF);
        balancing.enable = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{PressureSet, ResourceStat};

    fn node(name: &str, version: &str) -> Node {
        Node {
            name: name.to_string(),
            version: version.to_string(),
            cpu: ResourceStat::new(8.0, 1.0),
            memory: ResourceStat::new(64.0, 8.0),
            disk: ResourceStat::new(500.0, 50.0),
            pressure: PressureSet::default(),
            maintenance: false,
            ignore: false,
            pressure_hot: false,
            powered_down: false,
        }
    }

    #[test]
    fn test_version_classification() {
        assert!(!is_legacy_version("9.0.0"));
        assert!(!is_legacy_version("9.1.2"));
        assert!(is_legacy_version("8.4.1"));
        assert!(is_legacy_version(""));
        assert!(is_legacy_version("not-a-version"));
    }

    #[test]
    fn test_gate_disables_psi_and_conntrack() {
        let mut world = WorldState::new(&Config::default());
        world.nodes.insert("a".into(), node("a", "8.4.1"));
        world.nodes.insert("b".into(), node("b", "9.0.3"));
        world.meta.cluster_legacy_nodes = any_legacy_node(&world.nodes);
        world.meta.balancing.enable = true;
        world.meta.balancing.mode = BalanceMode::Psi;
        world.meta.balancing.with_conntrack_state = true;

        gate(&mut world);

        assert!(!world.meta.balancing.with_conntrack_state);
        assert!(!world.meta.balancing.enable);
    }

    #[test]
    fn test_gate_keeps_features_on_uniform_cluster() {
        let mut world = WorldState::new(&Config::default());
        world.nodes.insert("a".into(), node("a", "9.0.3"));
        world.meta.cluster_legacy_nodes = any_legacy_node(&world.nodes);
        world.meta.balancing.enable = true;
        world.meta.balancing.with_conntrack_state = true;

        gate(&mut world);

        assert!(world.meta.balancing.with_conntrack_state);
        assert!(world.meta.balancing.enable);
    }
}
