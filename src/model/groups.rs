//! Materialized affinity and anti-affinity groups.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Guests that must be co-located, with aggregate resource sums used for
/// group ordering. Guests without any explicit affinity source live in
/// synthetic singleton groups so the planner treats everything uniformly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AffinityGroup {
    pub guests: Vec<String>,
    pub counter: usize,
    pub cpu_total: f64,
    pub cpu_used: f64,
    pub memory_total: f64,
    pub memory_used: f64,
    pub disk_total: f64,
    pub disk_used: f64,
}

/// Guests that must spread across distinct nodes. `used_nodes` is the running
/// list of nodes already handed out to members during planning; it never
/// grows past the group size.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AntiAffinityGroup {
    pub guests: Vec<String>,
    pub counter: usize,
    pub used_nodes: Vec<String>,
}

/// All materialized groups of one cycle plus the ordered list of guests that
/// must leave maintenance nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupSet {
    pub affinity: BTreeMap<String, AffinityGroup>,
    pub anti_affinity: BTreeMap<String, AntiAffinityGroup>,
    pub maintenance: Vec<String>,
}
