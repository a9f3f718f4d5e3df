// # Guest Classification
//
// Three independent sources feed the same derived guest fields: raw tags,
// pool memberships with operator-defined policies, and HA rules. Each source
// implements `ConstraintSource`; their contributions are unioned into the
// final affinity, anti-affinity and pin lists. Unknown pin targets are
// logged and dropped, never fatal.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::config::PoolPolicy;
use crate::model::{AffinityType, HaRule, Pool};

/// Tag prefixes understood on the wire.
pub const TAG_AFFINITY: &str = "plb_affinity";
pub const TAG_ANTI_AFFINITY: &str = "plb_anti_affinity";
pub const TAG_PIN: &str = "plb_pin_";
pub const TAG_IGNORE: &str = "plb_ignore";

/// Everything one classification pass needs to know about a guest.
pub struct ClassifyInput<'a> {
    pub guest_name: &'a str,
    pub vmid: u64,
    pub tags: &'a [String],
    /// Pools the guest is a member of, in pool iteration order.
    pub pool_names: &'a [String],
    /// HA rules containing the guest.
    pub ha_rules: Vec<&'a HaRule>,
    pub cluster_nodes: &'a BTreeSet<String>,
    pub policies: &'a BTreeMap<String, PoolPolicy>,
}

/// What one source adds to a guest's constraints.
#[derive(Debug, Default)]
pub struct Contribution {
    pub affinity: Vec<String>,
    pub anti_affinity: Vec<String>,
    pub pins: Vec<String>,
    pub ignore: bool,
    pub strict: Option<bool>,
}

/// A single origin of placement constraints.
pub trait ConstraintSource {
    fn name(&self) -> &'static str;
    fn contribute(&self, input: &ClassifyInput<'_>) -> Contribution;
}

/// The unioned classification result.
#[derive(Debug, Default, Clone)]
pub struct GuestConstraints {
    pub affinity_groups: Vec<String>,
    pub anti_affinity_groups: Vec<String>,
    pub node_relationships: Vec<String>,
    pub ignore: bool,
    pub node_relationships_strict: bool,
}

/// Derive the guest's constraint fields from all sources.
pub fn classify(input: &ClassifyInput<'_>) -> GuestConstraints {
    let sources: [&dyn ConstraintSource; 3] = [&TagSource, &PoolSource, &HaRuleSource];

    let mut result = GuestConstraints {
        node_relationships_strict: true,
        ..Default::default()
    };
    for source in sources {
        let contribution = source.contribute(input);
        debug!(
            "Guest {}: source '{}' contributed {} affinity, {} anti-affinity, {} pin entries",
            input.guest_name,
            source.name(),
            contribution.affinity.len(),
            contribution.anti_affinity.len(),
            contribution.pins.len()
        );
        result.affinity_groups.extend(contribution.affinity);
        result.anti_affinity_groups.extend(contribution.anti_affinity);
        result.node_relationships.extend(contribution.pins);
        result.ignore |= contribution.ignore;
        if let Some(strict) = contribution.strict {
            result.node_relationships_strict = strict;
        }
    }
    result
}

/// Pools the guest is a member of.
pub fn pools_for_guest(guest_name: &str, pools: &BTreeMap<String, Pool>) -> Vec<String> {
    pools
        .values()
        .filter(|pool| pool.members.iter().any(|m| m == guest_name))
        .map(|pool| pool.name.clone())
        .collect()
}

/// HA rules the guest is a member of, by numeric id.
pub fn ha_rules_for_guest(vmid: u64, ha_rules: &BTreeMap<String, HaRule>) -> Vec<&HaRule> {
    ha_rules
        .values()
        .filter(|rule| rule.members.contains(&vmid))
        .collect()
}

/// Constraints carried in guest tags.
struct TagSource;

impl ConstraintSource for TagSource {
    fn name(&self) -> &'static str {
        "tags"
    }

    fn contribute(&self, input: &ClassifyInput<'_>) -> Contribution {
        let mut out = Contribution::default();
        for tag in input.tags {
            if tag.starts_with(TAG_ANTI_AFFINITY) {
                out.anti_affinity.push(tag.clone());
            } else if tag.starts_with(TAG_AFFINITY) {
                out.affinity.push(tag.clone());
            } else if let Some(node) = tag.strip_prefix(TAG_PIN) {
                if input.cluster_nodes.contains(node) {
                    out.pins.push(node.to_string());
                } else {
                    warn!(
                        "Pin tag {} on guest {} names a node that does not exist in the cluster. Not applying pinning.",
                        tag, input.guest_name
                    );
                }
            } else if tag.starts_with(TAG_IGNORE) {
                out.ignore = true;
            }
        }
        out
    }
}

/// Constraints carried by pool membership and the operator's pool policies.
struct PoolSource;

impl ConstraintSource for PoolSource {
    fn name(&self) -> &'static str {
        "pools"
    }

    fn contribute(&self, input: &ClassifyInput<'_>) -> Contribution {
        let mut out = Contribution::default();
        for pool_name in input.pool_names {
            let Some(policy) = input.policies.get(pool_name) else {
                debug!(
                    "Skipping pool {} for guest {}: no balancing policy configured",
                    pool_name, input.guest_name
                );
                continue;
            };
            match policy.kind {
                AffinityType::Affinity => out.affinity.push(pool_name.clone()),
                AffinityType::AntiAffinity => out.anti_affinity.push(pool_name.clone()),
            }
            for node in &policy.pin {
                if input.cluster_nodes.contains(node) {
                    out.pins.push(node.clone());
                } else {
                    warn!(
                        "Pool {} pins guest {} to node {} which does not exist in the cluster. Not applying pinning.",
                        pool_name, input.guest_name, node
                    );
                }
            }
            // The last configured pool decides strictness.
            out.strict = Some(policy.strict);
        }
        out
    }
}

/// Constraints carried by HA rules.
struct HaRuleSource;

impl ConstraintSource for HaRuleSource {
    fn name(&self) -> &'static str {
        "ha-rules"
    }

    fn contribute(&self, input: &ClassifyInput<'_>) -> Contribution {
        let mut out = Contribution::default();
        for rule in &input.ha_rules {
            match rule.rule_type {
                AffinityType::Affinity => {
                    out.affinity.push(rule.rule.clone());
                    for node in &rule.nodes {
                        if input.cluster_nodes.contains(node) {
                            out.pins.push(node.clone());
                        } else {
                            warn!(
                                "HA rule {} names node {} which does not exist in the cluster. Not applying pinning.",
                                rule.rule, node
                            );
                        }
                    }
                }
                AffinityType::AntiAffinity => out.anti_affinity.push(rule.rule.clone()),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn input_with<'a>(
        tags: &'a [String],
        pool_names: &'a [String],
        ha_rules: Vec<&'a HaRule>,
        cluster_nodes: &'a BTreeSet<String>,
        policies: &'a BTreeMap<String, PoolPolicy>,
    ) -> ClassifyInput<'a> {
        ClassifyInput {
            guest_name: "web01",
            vmid: 101,
            tags,
            pool_names,
            ha_rules,
            cluster_nodes,
            policies,
        }
    }

    #[test]
    fn test_tag_classification() {
        let tags = vec![
            "plb_affinity_web".to_string(),
            "plb_anti_affinity_db".to_string(),
            "plb_pin_pve02".to_string(),
            "plb_ignore".to_string(),
            "unrelated".to_string(),
        ];
        let cluster = nodes(&["pve01", "pve02"]);
        let policies = BTreeMap::new();
        let result = classify(&input_with(&tags, &[], Vec::new(), &cluster, &policies));

        assert_eq!(result.affinity_groups, vec!["plb_affinity_web"]);
        assert_eq!(result.anti_affinity_groups, vec!["plb_anti_affinity_db"]);
        assert_eq!(result.node_relationships, vec!["pve02"]);
        assert!(result.ignore);
        assert!(result.node_relationships_strict);
    }

    #[test]
    fn test_anti_affinity_tag_not_misread_as_affinity() {
        let tags = vec!["plb_anti_affinity_x".to_string()];
        let cluster = nodes(&["pve01"]);
        let policies = BTreeMap::new();
        let result = classify(&input_with(&tags, &[], Vec::new(), &cluster, &policies));
        assert!(result.affinity_groups.is_empty());
        assert_eq!(result.anti_affinity_groups, vec!["plb_anti_affinity_x"]);
    }

    #[test]
    fn test_unknown_pin_target_dropped() {
        let tags = vec!["plb_pin_ghost".to_string()];
        let cluster = nodes(&["pve01"]);
        let policies = BTreeMap::new();
        let result = classify(&input_with(&tags, &[], Vec::new(), &cluster, &policies));
        assert!(result.node_relationships.is_empty());
    }

    #[test]
    fn test_pool_policy_contributions() {
        let cluster = nodes(&["pve01", "pve02"]);
        let mut policies = BTreeMap::new();
        policies.insert(
            "licensed".to_string(),
            PoolPolicy {
                kind: AffinityType::Affinity,
                pin: vec!["pve02".to_string(), "ghost".to_string()],
                strict: false,
            },
        );
        let pool_names = vec!["licensed".to_string(), "unconfigured".to_string()];
        let result = classify(&input_with(&[], &pool_names, Vec::new(), &cluster, &policies));

        assert_eq!(result.affinity_groups, vec!["licensed"]);
        assert_eq!(result.node_relationships, vec!["pve02"]);
        assert!(!result.node_relationships_strict);
    }

    #[test]
    fn test_ha_rule_contributions() {
        let cluster = nodes(&["pve01", "pve02"]);
        let policies = BTreeMap::new();
        let affinity_rule = HaRule {
            rule: "keep-together".to_string(),
            rule_type: AffinityType::Affinity,
            nodes: vec!["pve01".to_string()],
            members: vec![101, 102],
        };
        let anti_rule = HaRule {
            rule: "spread".to_string(),
            rule_type: AffinityType::AntiAffinity,
            nodes: Vec::new(),
            members: vec![101],
        };
        let result = classify(&input_with(
            &[],
            &[],
            vec![&affinity_rule, &anti_rule],
            &cluster,
            &policies,
        ));

        assert_eq!(result.affinity_groups, vec!["keep-together"]);
        assert_eq!(result.anti_affinity_groups, vec!["spread"]);
        assert_eq!(result.node_relationships, vec!["pve01"]);
    }

    #[test]
    fn test_pools_and_rules_for_guest() {
        let mut pools = BTreeMap::new();
        pools.insert(
            "web".to_string(),
            Pool {
                name: "web".to_string(),
                members: vec!["web01".to_string(), "web02".to_string()],
            },
        );
        pools.insert(
            "db".to_string(),
            Pool {
                name: "db".to_string(),
                members: vec!["db01".to_string()],
            },
        );
        assert_eq!(pools_for_guest("web01", &pools), vec!["web"]);
        assert!(pools_for_guest("other", &pools).is_empty());

        let mut rules = BTreeMap::new();
        rules.insert(
            "spread".to_string(),
            HaRule {
                rule: "spread".to_string(),
                rule_type: AffinityType::AntiAffinity,
                nodes: Vec::new(),
                members: vec![101],
            },
        );
        assert_eq!(ha_rules_for_guest(101, &rules).len(), 1);
        assert!(ha_rules_for_guest(999, &rules).is_empty());
    }
}
