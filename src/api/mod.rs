// # Cluster API
//
// The pipeline consumes the cluster through the `ClusterApi` trait; the
// production implementation is `ProxmoxClient`. Tests substitute mocks, and
// nothing outside this module knows about HTTP.

pub mod client;
pub mod types;

pub use client::ProxmoxClient;
pub use types::{
    Consolidation, CtMigration, GuestConfigInfo, GuestListEntry, HaRuleEntry, HaStatusEntry,
    NodeConfigInfo, NodeListEntry, PoolDetail, PoolListEntry, PressureSample, TaskListEntry,
    TaskStatusInfo, VersionInfo, VmMigration,
};

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{BalancerError, Result};
use crate::model::GuestKind;

/// Permissions the configured identity must hold.
pub const REQUIRED_PERMISSIONS: [&str; 4] =
    ["Datastore.Audit", "Sys.Audit", "VM.Audit", "VM.Migrate"];

/// Abstraction over the cluster API consumed by inventory, executor and
/// power management.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeListEntry>>;

    async fn node_version(&self, node: &str) -> Result<VersionInfo>;

    async fn list_vms(&self, node: &str) -> Result<Vec<GuestListEntry>>;

    async fn list_containers(&self, node: &str) -> Result<Vec<GuestListEntry>>;

    async fn guest_config(
        &self,
        node: &str,
        kind: GuestKind,
        vmid: u64,
    ) -> Result<GuestConfigInfo>;

    /// Hourly pressure series for a guest under the given consolidation.
    async fn guest_pressure(
        &self,
        node: &str,
        kind: GuestKind,
        vmid: u64,
        cf: Consolidation,
    ) -> Result<Vec<PressureSample>>;

    /// Hourly pressure series for a node under the given consolidation.
    async fn node_pressure(&self, node: &str, cf: Consolidation)
        -> Result<Vec<PressureSample>>;

    async fn list_pools(&self) -> Result<Vec<PoolListEntry>>;

    async fn pool_detail(&self, poolid: &str) -> Result<PoolDetail>;

    async fn list_ha_rules(&self) -> Result<Vec<HaRuleEntry>>;

    async fn ha_status(&self) -> Result<Vec<HaStatusEntry>>;

    /// Start a VM migration; returns the task id.
    async fn migrate_vm(&self, node: &str, vmid: u64, options: &VmMigration) -> Result<String>;

    /// Start a container migration; returns the task id.
    async fn migrate_container(
        &self,
        node: &str,
        vmid: u64,
        options: &CtMigration,
    ) -> Result<String>;

    async fn task_status(&self, node: &str, upid: &str) -> Result<TaskStatusInfo>;

    /// Locate the active qemu-migrate task for a guest on its source node,
    /// used to unwrap HA-managed migrations.
    async fn find_migration_task(&self, node: &str, vmid: u64) -> Result<Option<TaskListEntry>>;

    /// Permissions of the configured identity, path to privilege map.
    async fn permissions(&self) -> Result<BTreeMap<String, BTreeMap<String, u8>>>;

    async fn node_config(&self, node: &str) -> Result<NodeConfigInfo>;

    async fn shutdown_node(&self, node: &str) -> Result<()>;
}

/// Preflight: ensure the configured identity holds every required
/// permission. An unknown user and a missing permission are both fatal.
pub async fn verify_permissions(api: &dyn ClusterApi) -> Result<()> {
    let permissions = match api.permissions().await {
        Ok(p) => p,
        Err(e) => {
            let text = e.to_string();
            if text.contains("no such user") {
                return Err(BalancerError::UnknownIdentity(text));
            }
            return Err(e);
        }
    };

    let available: Vec<&str> = permissions
        .values()
        .flat_map(|privs| privs.keys().map(String::as_str))
        .collect();

    for required in REQUIRED_PERMISSIONS {
        if !available.contains(&required) {
            return Err(BalancerError::Permission(required.to_string()));
        }
    }

    debug!("All required API permissions are present");
    Ok(())
}
