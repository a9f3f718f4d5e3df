// Shared test harness: an in-memory cluster API and world-state builders.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use proxbalance::api::{
    ClusterApi, Consolidation, CtMigration, GuestConfigInfo, GuestListEntry, HaRuleEntry,
    HaStatusEntry, NodeConfigInfo, NodeListEntry, PoolDetail, PoolListEntry, PressureSample,
    TaskListEntry, TaskStatusInfo, VersionInfo, VmMigration,
};
use proxbalance::config::Config;
use proxbalance::error::{BalancerError, Result};
use proxbalance::model::{
    Guest, GuestKind, GuestResource, Node, PressureSet, ResourceStat, WorldState,
};

/// Recorded interaction with the mock cluster, stamped with a global
/// sequence number so ordering across concurrent tasks can be asserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub seq: u64,
    pub what: String,
}

#[derive(Default)]
pub struct MockCluster {
    pub nodes: Vec<NodeListEntry>,
    pub versions: BTreeMap<String, String>,
    pub vms: BTreeMap<String, Vec<GuestListEntry>>,
    pub cts: BTreeMap<String, Vec<GuestListEntry>>,
    /// vmid → raw tag string.
    pub tags: BTreeMap<u64, String>,
    pub pools: BTreeMap<String, Vec<String>>,
    pub ha_rules: Vec<HaRuleEntry>,
    pub ha_status: Vec<HaStatusEntry>,
    pub permissions: BTreeMap<String, BTreeMap<String, u8>>,
    /// vmids whose migration dispatch fails.
    pub fail_dispatch: Vec<u64>,
    /// Polls a task reports `running` before turning `stopped`.
    pub polls_before_stop: u32,
    /// Tasks that report `hamigrate` on their first status and must be
    /// resolved to `qmigrate` tasks.
    pub ha_wrapped: Vec<u64>,
    /// Exit status reported once stopped; defaults to OK.
    pub exit_status: BTreeMap<u64, String>,
    /// Tasks that never stop (for soft-timeout tests).
    pub never_stops: Vec<u64>,

    pub seq: AtomicU64,
    pub events: Mutex<Vec<Event>>,
    pub poll_counts: Mutex<BTreeMap<String, u32>>,
}

impl MockCluster {
    pub fn record(&self, what: impl Into<String>) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(Event {
            seq,
            what: what.into(),
        });
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Sequence numbers of all events whose label starts with the prefix.
    pub fn seqs_with_prefix(&self, prefix: &str) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter(|e| e.what.starts_with(prefix))
            .map(|e| e.seq)
            .collect()
    }

    fn upid_for(vmid: u64, wrapped: bool) -> String {
        if wrapped {
            format!("UPID:ha:{}", vmid)
        } else {
            format!("UPID:qm:{}", vmid)
        }
    }

    fn vmid_of(upid: &str) -> u64 {
        upid.rsplit(':').next().and_then(|v| v.parse().ok()).unwrap_or(0)
    }
}

pub fn node_entry(name: &str, maxmem: f64, mem: f64) -> NodeListEntry {
    NodeListEntry {
        node: name.to_string(),
        status: "online".to_string(),
        maxcpu: 16.0,
        cpu: 0.1,
        maxmem,
        mem,
        maxdisk: 1000.0,
        disk: 100.0,
    }
}

pub fn guest_entry(name: &str, vmid: u64, maxmem: f64, mem: f64) -> GuestListEntry {
    GuestListEntry {
        name: name.to_string(),
        vmid,
        status: "running".to_string(),
        cpus: 4.0,
        cpu: 0.2,
        maxmem,
        mem,
        maxdisk: 100.0,
        disk: 20.0,
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeListEntry>> {
        self.record("list_nodes");
        Ok(self.nodes.clone())
    }

    async fn node_version(&self, node: &str) -> Result<VersionInfo> {
        self.record(format!("version:{}", node));
        match self.versions.get(node) {
            Some(version) => Ok(VersionInfo {
                version: version.clone(),
            }),
            None => Err(BalancerError::Api(format!("no version for {}", node))),
        }
    }

    async fn list_vms(&self, node: &str) -> Result<Vec<GuestListEntry>> {
        self.record(format!("list_vms:{}", node));
        Ok(self.vms.get(node).cloned().unwrap_or_default())
    }

    async fn list_containers(&self, node: &str) -> Result<Vec<GuestListEntry>> {
        self.record(format!("list_cts:{}", node));
        Ok(self.cts.get(node).cloned().unwrap_or_default())
    }

    async fn guest_config(
        &self,
        _node: &str,
        _kind: GuestKind,
        vmid: u64,
    ) -> Result<GuestConfigInfo> {
        self.record(format!("guest_config:{}", vmid));
        Ok(GuestConfigInfo {
            tags: self.tags.get(&vmid).cloned(),
        })
    }

    async fn guest_pressure(
        &self,
        _node: &str,
        _kind: GuestKind,
        vmid: u64,
        cf: Consolidation,
    ) -> Result<Vec<PressureSample>> {
        self.record(format!("guest_pressure:{}:{}", vmid, cf.as_str()));
        Ok(Vec::new())
    }

    async fn node_pressure(
        &self,
        node: &str,
        cf: Consolidation,
    ) -> Result<Vec<PressureSample>> {
        self.record(format!("node_pressure:{}:{}", node, cf.as_str()));
        Err(BalancerError::Api("rrd data unavailable".to_string()))
    }

    async fn list_pools(&self) -> Result<Vec<PoolListEntry>> {
        self.record("list_pools");
        Ok(self
            .pools
            .keys()
            .map(|poolid| PoolListEntry {
                poolid: poolid.clone(),
            })
            .collect())
    }

    async fn pool_detail(&self, poolid: &str) -> Result<PoolDetail> {
        self.record(format!("pool_detail:{}", poolid));
        Ok(PoolDetail {
            members: self
                .pools
                .get(poolid)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|name| proxbalance::api::types::PoolMemberEntry { name: Some(name) })
                .collect(),
        })
    }

    async fn list_ha_rules(&self) -> Result<Vec<HaRuleEntry>> {
        self.record("list_ha_rules");
        Ok(self.ha_rules.clone())
    }

    async fn ha_status(&self) -> Result<Vec<HaStatusEntry>> {
        self.record("ha_status");
        Ok(self.ha_status.clone())
    }

    async fn migrate_vm(&self, _node: &str, vmid: u64, options: &VmMigration) -> Result<String> {
        self.record(format!(
            "migrate_vm:{}:target={}:online={}:local-disks={}:conntrack={}",
            vmid,
            options.target,
            options.online,
            options.with_local_disks,
            options.with_conntrack_state
        ));
        if self.fail_dispatch.contains(&vmid) {
            return Err(BalancerError::Api("resource is locked".to_string()));
        }
        Ok(Self::upid_for(vmid, self.ha_wrapped.contains(&vmid)))
    }

    async fn migrate_container(
        &self,
        _node: &str,
        vmid: u64,
        options: &CtMigration,
    ) -> Result<String> {
        self.record(format!(
            "migrate_ct:{}:target={}:restart={}",
            vmid, options.target, options.restart
        ));
        if self.fail_dispatch.contains(&vmid) {
            return Err(BalancerError::Api("resource is locked".to_string()));
        }
        Ok(Self::upid_for(vmid, false))
    }

    async fn task_status(&self, _node: &str, upid: &str) -> Result<TaskStatusInfo> {
        self.record(format!("task_status:{}", upid));
        let vmid = Self::vmid_of(upid);

        if upid.starts_with("UPID:ha:") {
            return Ok(TaskStatusInfo {
                status: "running".to_string(),
                exitstatus: None,
                task_type: "hamigrate".to_string(),
                upid: upid.to_string(),
            });
        }

        let mut counts = self.poll_counts.lock().unwrap();
        let count = counts.entry(upid.to_string()).or_insert(0);
        *count += 1;

        if self.never_stops.contains(&vmid) || *count <= self.polls_before_stop {
            return Ok(TaskStatusInfo {
                status: "running".to_string(),
                exitstatus: None,
                task_type: "qmigrate".to_string(),
                upid: upid.to_string(),
            });
        }

        self.record(format!("stopped:{}", vmid));
        Ok(TaskStatusInfo {
            status: "stopped".to_string(),
            exitstatus: Some(
                self.exit_status
                    .get(&vmid)
                    .cloned()
                    .unwrap_or_else(|| "OK".to_string()),
            ),
            task_type: "qmigrate".to_string(),
            upid: upid.to_string(),
        })
    }

    async fn find_migration_task(
        &self,
        _node: &str,
        vmid: u64,
    ) -> Result<Option<TaskListEntry>> {
        self.record(format!("find_task:{}", vmid));
        Ok(Some(TaskListEntry {
            upid: Self::upid_for(vmid, false),
            task_type: "qmigrate".to_string(),
        }))
    }

    async fn permissions(&self) -> Result<BTreeMap<String, BTreeMap<String, u8>>> {
        self.record("permissions");
        Ok(self.permissions.clone())
    }

    async fn node_config(&self, node: &str) -> Result<NodeConfigInfo> {
        self.record(format!("node_config:{}", node));
        Ok(NodeConfigInfo {
            wakeonlan: Some("aa:bb:cc:dd:ee:ff".to_string()),
        })
    }

    async fn shutdown_node(&self, node: &str) -> Result<()> {
        self.record(format!("shutdown:{}", node));
        Ok(())
    }
}

// World-state builders for planner-level tests.

pub fn make_node(name: &str, memory_total: f64, memory_used: f64) -> Node {
    Node {
        name: name.to_string(),
        version: "9.0.3".to_string(),
        cpu: ResourceStat::new(16.0, 2.0),
        memory: ResourceStat::new(memory_total, memory_used),
        disk: ResourceStat::new(1000.0, 100.0),
        pressure: PressureSet::default(),
        maintenance: false,
        ignore: false,
        pressure_hot: false,
        powered_down: false,
    }
}

pub fn make_guest(name: &str, vmid: u64, node: &str, memory_used: f64) -> Guest {
    Guest {
        name: name.to_string(),
        id: vmid,
        kind: GuestKind::Vm,
        node_current: node.to_string(),
        node_target: node.to_string(),
        cpu: GuestResource { total: 4.0, used: 0.5 },
        memory: GuestResource {
            total: memory_used * 1.2,
            used: memory_used,
        },
        disk: GuestResource {
            total: 100.0,
            used: 20.0,
        },
        pressure: PressureSet::default(),
        pressure_hot: false,
        tags: Vec::new(),
        affinity_groups: Vec::new(),
        anti_affinity_groups: Vec::new(),
        ignore: false,
        node_relationships: Vec::new(),
        node_relationships_strict: true,
        processed: false,
    }
}

/// Assemble a world and materialize its groups.
pub fn make_world(nodes: Vec<Node>, guests: Vec<Guest>) -> WorldState {
    let mut world = WorldState::new(&Config::default());
    for node in nodes {
        world.nodes.insert(node.name.clone(), node);
    }
    for guest in guests {
        world.guests.insert(guest.name.clone(), guest);
    }
    proxbalance::grouping::build_groups(&mut world);
    world
}

/// Run the planning stages (scoring through relocation) on a prepared world.
pub fn plan(world: &mut WorldState) {
    proxbalance::scoring::set_node_assignments(world);
    proxbalance::scoring::set_node_hot(world);
    proxbalance::scoring::set_guest_hot(world);
    proxbalance::scoring::detect_affinity_violations(world);
    proxbalance::planner::drain_maintenance(world);
    proxbalance::scoring::decide_balance(world);
    proxbalance::planner::relocate(world);
}
