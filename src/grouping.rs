//! Group materialization.
//!
//! Guests fold into affinity groups (with aggregate resource sums used for
//! planner ordering), anti-affinity groups, and the maintenance migration
//! list. A guest without any affinity source gets a synthetic singleton
//! group under a fresh opaque id so the planner treats all guests uniformly.
//! A guest listing several affinity sources lands in the last one.

use tracing::debug;
use uuid::Uuid;

use crate::model::{GroupSet, WorldState};

/// Materialize all groups from the classified guests.
pub fn build_groups(world: &mut WorldState) {
    let mut groups = GroupSet::default();

    for (guest_name, guest) in &world.guests {
        let group_name = match guest.affinity_groups.last() {
            Some(group) => {
                debug!("Affinity group {} for {} will be used", group, guest_name);
                group.clone()
            }
            None => {
                let synthetic = Uuid::new_v4().to_string();
                debug!("Synthetic group {} for {} will be used", synthetic, guest_name);
                synthetic
            }
        };

        let affinity = groups.affinity.entry(group_name).or_default();
        affinity.guests.push(guest_name.clone());
        affinity.counter += 1;
        affinity.cpu_total += guest.cpu.total;
        affinity.cpu_used += guest.cpu.used;
        affinity.memory_total += guest.memory.total;
        affinity.memory_used += guest.memory.used;
        affinity.disk_total += guest.disk.total;
        affinity.disk_used += guest.disk.used;

        for group in &guest.anti_affinity_groups {
            let anti = groups.anti_affinity.entry(group.clone()).or_default();
            anti.guests.push(guest_name.clone());
            anti.counter += 1;
        }

        if let Some(node) = world.nodes.get(&guest.node_current) {
            if node.maintenance {
                debug!(
                    "{} will be migrated because node {} is in maintenance",
                    guest_name, guest.node_current
                );
                groups.maintenance.push(guest_name.clone());
            }
        }
    }

    world.groups = groups;
}
