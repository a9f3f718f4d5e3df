//! Wire types for the cluster API.
//!
//! Fields mirror the JSON the cluster returns; everything the pipeline does
//! not consume is left out. Numeric resource figures arrive as JSON numbers
//! and are decoded as `f64` so downstream accounting never converts.

use serde::{Deserialize, Serialize};

use crate::model::ResourceKind;

/// Envelope wrapping every API response body.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub data: T,
}

/// RRD consolidation function selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consolidation {
    Average,
    Max,
}

impl Consolidation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Consolidation::Average => "AVERAGE",
            Consolidation::Max => "MAX",
        }
    }
}

/// `GET /nodes` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeListEntry {
    pub node: String,
    pub status: String,
    #[serde(default)]
    pub maxcpu: f64,
    /// Load fraction in 0..1, scaled by `maxcpu` to get cores in use.
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub maxmem: f64,
    #[serde(default)]
    pub mem: f64,
    #[serde(default)]
    pub maxdisk: f64,
    #[serde(default)]
    pub disk: f64,
}

/// `GET /nodes/{node}/version`.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    pub version: String,
}

/// `GET /nodes/{node}/qemu` and `/lxc` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct GuestListEntry {
    #[serde(default)]
    pub name: String,
    pub vmid: u64,
    pub status: String,
    #[serde(default)]
    pub cpus: f64,
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub maxmem: f64,
    #[serde(default)]
    pub mem: f64,
    #[serde(default)]
    pub maxdisk: f64,
    #[serde(default)]
    pub disk: f64,
}

/// Guest configuration; only the tag string matters here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuestConfigInfo {
    pub tags: Option<String>,
}

impl GuestConfigInfo {
    /// Tags are `;`-delimited on the wire.
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .unwrap_or("")
            .split(';')
            .filter(|t| !t.is_empty())
            .map(|t| t.trim().to_string())
            .collect()
    }
}

/// One hourly RRD sample. Pressure fields are absent on platforms that do
/// not export stall information; absent means zero downstream.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PressureSample {
    #[serde(default)]
    pub pressurecpusome: Option<f64>,
    #[serde(default)]
    pub pressurecpufull: Option<f64>,
    #[serde(default)]
    pub pressurememorysome: Option<f64>,
    #[serde(default)]
    pub pressurememoryfull: Option<f64>,
    #[serde(default)]
    pub pressureiosome: Option<f64>,
    #[serde(default)]
    pub pressureiofull: Option<f64>,
}

impl PressureSample {
    /// Stall share with any task blocked. Disk pressure rides the io fields.
    pub fn some(&self, kind: ResourceKind) -> Option<f64> {
        match kind {
            ResourceKind::Cpu => self.pressurecpusome,
            ResourceKind::Memory => self.pressurememorysome,
            ResourceKind::Disk => self.pressureiosome,
        }
    }

    /// Stall share with all tasks blocked.
    pub fn full(&self, kind: ResourceKind) -> Option<f64> {
        match kind {
            ResourceKind::Cpu => self.pressurecpufull,
            ResourceKind::Memory => self.pressurememoryfull,
            ResourceKind::Disk => self.pressureiofull,
        }
    }
}

/// `GET /pools` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolListEntry {
    pub poolid: String,
}

/// `GET /pools/{poolid}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolDetail {
    #[serde(default)]
    pub members: Vec<PoolMemberEntry>,
}

/// Pool member; storage members carry no `name` and are skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolMemberEntry {
    pub name: Option<String>,
}

/// `GET /cluster/ha/rules` entry, still in wire vocabulary.
#[derive(Debug, Clone, Deserialize)]
pub struct HaRuleEntry {
    pub rule: String,
    /// `negative` means anti-affinity; anything else is affinity.
    pub affinity: Option<String>,
    /// Comma string of `<type>:<vmid>` members.
    #[serde(default)]
    pub resources: String,
    /// Optional comma string of permitted nodes.
    pub nodes: Option<String>,
    #[serde(default)]
    pub disable: u8,
}

/// `GET /cluster/ha/status` entry. Quorum rows carry no `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct HaStatusEntry {
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl HaStatusEntry {
    /// Numeric guest id for `vm:<id>` / `ct:<id>` rows.
    pub fn vmid(&self) -> Option<u64> {
        self.id
            .as_deref()
            .and_then(|id| id.split(':').nth(1))
            .and_then(|raw| raw.parse().ok())
    }
}

/// `GET /nodes/{node}/tasks/{upid}/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatusInfo {
    pub status: String,
    pub exitstatus: Option<String>,
    #[serde(rename = "type", default)]
    pub task_type: String,
    #[serde(default)]
    pub upid: String,
}

/// `GET /nodes/{node}/tasks` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskListEntry {
    pub upid: String,
    #[serde(rename = "type", default)]
    pub task_type: String,
}

/// `GET /nodes/{node}/config`; only the Wake-on-LAN MAC matters here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfigInfo {
    pub wakeonlan: Option<String>,
}

/// VM migration request options.
#[derive(Debug, Clone, Serialize)]
pub struct VmMigration {
    pub target: String,
    pub online: bool,
    pub with_local_disks: bool,
    /// Only honored on clusters past the feature cutoff; the gate forces it
    /// off elsewhere.
    pub with_conntrack_state: bool,
}

/// Container migration request options. Containers restart-migrate.
#[derive(Debug, Clone, Serialize)]
pub struct CtMigration {
    pub target: String,
    pub restart: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_list_splits_and_trims() {
        let config = GuestConfigInfo {
            tags: Some("plb_affinity_web; plb_ignore;".to_string()),
        };
        assert_eq!(config.tag_list(), vec!["plb_affinity_web", "plb_ignore"]);
        assert!(GuestConfigInfo::default().tag_list().is_empty());
    }

    #[test]
    fn test_ha_status_vmid() {
        let entry = HaStatusEntry {
            id: Some("vm:101".to_string()),
            status: Some("started".to_string()),
        };
        assert_eq!(entry.vmid(), Some(101));
        let quorum = HaStatusEntry {
            id: None,
            status: Some("OK".to_string()),
        };
        assert_eq!(quorum.vmid(), None);
    }

    #[test]
    fn test_pressure_sample_disk_uses_io_fields() {
        let sample = PressureSample {
            pressureiofull: Some(12.5),
            ..Default::default()
        };
        assert_eq!(sample.full(ResourceKind::Disk), Some(12.5));
        assert_eq!(sample.full(ResourceKind::Cpu), None);
    }
}
