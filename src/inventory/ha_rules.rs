//! HA rule inventory.
//!
//! HA rules only exist on platforms past the version cutoff; on mixed
//! clusters the endpoint is skipped entirely and classification falls back
//! to tags and pools.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::api::ClusterApi;
use crate::error::Result;
use crate::model::{AffinityType, HaRule};

/// Collect all enabled HA rules, translated into rebalancer vocabulary.
pub async fn collect(
    api: &dyn ClusterApi,
    cluster_legacy_nodes: bool,
) -> Result<BTreeMap<String, HaRule>> {
    let mut rules = BTreeMap::new();

    if cluster_legacy_nodes {
        debug!("Skipping HA rule retrieval: cluster contains pre-cutoff nodes");
        return Ok(rules);
    }

    for entry in api.list_ha_rules().await? {
        if entry.disable != 0 {
            debug!("Skipping ha-rule {}: rule is disabled", entry.rule);
            continue;
        }

        // Members arrive as a comma string of `<type>:<vmid>` resources.
        let members: Vec<u64> = entry
            .resources
            .split(',')
            .filter(|r| !r.trim().is_empty())
            .filter_map(|resource| match resource.trim().split(':').nth(1) {
                Some(raw) => match raw.parse() {
                    Ok(vmid) => Some(vmid),
                    Err(_) => {
                        warn!("Malformed resource '{}' in ha-rule {}", resource, entry.rule);
                        None
                    }
                },
                None => {
                    warn!("Malformed resource '{}' in ha-rule {}", resource, entry.rule);
                    None
                }
            })
            .collect();

        let rule_type = if entry.affinity.as_deref() == Some("negative") {
            AffinityType::AntiAffinity
        } else {
            AffinityType::Affinity
        };

        let nodes: Vec<String> = entry
            .nodes
            .as_deref()
            .unwrap_or("")
            .split(',')
            .filter(|n| !n.is_empty())
            .map(|n| n.to_string())
            .collect();

        debug!(
            "Got ha-rule {} as type {:?} affecting guests: {}",
            entry.rule, rule_type, entry.resources
        );
        rules.insert(
            entry.rule.clone(),
            HaRule {
                rule: entry.rule,
                rule_type,
                nodes,
                members,
            },
        );
    }

    Ok(rules)
}
