//! Hypervisor node representation.

use serde::{Deserialize, Serialize};

use super::{BalanceMode, PressureSet, ResourceKind};

/// One resource dimension of a node.
///
/// `assigned` may exceed `total`: overcommit is allowed and not an error.
/// `free` is clamped at zero and all percentages are guarded against a zero
/// total.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceStat {
    pub total: f64,
    pub assigned: f64,
    pub used: f64,
    pub free: f64,
    pub assigned_percent: f64,
    pub used_percent: f64,
    pub free_percent: f64,
}

impl ResourceStat {
    pub fn new(total: f64, used: f64) -> Self {
        let mut stat = Self {
            total,
            assigned: 0.0,
            used,
            ..Default::default()
        };
        stat.recompute();
        stat
    }

    /// Re-derive `free` and all percentages from the absolute values.
    pub fn recompute(&mut self) {
        self.free = (self.total - self.used).max(0.0);
        if self.total > 0.0 {
            self.assigned_percent = self.assigned / self.total * 100.0;
            self.used_percent = self.used / self.total * 100.0;
            self.free_percent = self.free / self.total * 100.0;
        } else {
            self.assigned_percent = 0.0;
            self.used_percent = 0.0;
            self.free_percent = 0.0;
        }
    }

    /// Load percentage for the given comparison mode. PSI comparisons read
    /// pressure data instead and never call this.
    pub fn percent(&self, mode: BalanceMode) -> f64 {
        match mode {
            BalanceMode::Assigned => self.assigned_percent,
            BalanceMode::Used => self.used_percent,
            BalanceMode::Psi => self.used_percent,
        }
    }
}

/// A hypervisor node as seen during one planning cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// Platform version string; empty when the version query failed, which
    /// downstream gating treats as older than the cutoff.
    pub version: String,
    pub cpu: ResourceStat,
    pub memory: ResourceStat,
    pub disk: ResourceStat,
    pub pressure: PressureSet,
    pub maintenance: bool,
    pub ignore: bool,
    pub pressure_hot: bool,
    /// Flagged by power management: drain this node, then shut it down.
    pub powered_down: bool,
}

impl Node {
    pub fn resource(&self, kind: ResourceKind) -> &ResourceStat {
        match kind {
            ResourceKind::Cpu => &self.cpu,
            ResourceKind::Memory => &self.memory,
            ResourceKind::Disk => &self.disk,
        }
    }

    pub fn resource_mut(&mut self, kind: ResourceKind) -> &mut ResourceStat {
        match kind {
            ResourceKind::Cpu => &mut self.cpu,
            ResourceKind::Memory => &mut self.memory,
            ResourceKind::Disk => &mut self.disk,
        }
    }

    /// Comparison metric for most-free / most-loaded selection: the load
    /// percentage for assigned/used modes, the full-pressure spike for psi.
    pub fn load_metric(&self, method: ResourceKind, mode: BalanceMode) -> f64 {
        match mode {
            BalanceMode::Assigned | BalanceMode::Used => self.resource(method).percent(mode),
            BalanceMode::Psi => self.pressure.get(method).full_spike,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recompute_guards_zero_total() {
        let stat = ResourceStat::new(0.0, 5.0);
        assert_eq!(stat.used_percent, 0.0);
        assert_eq!(stat.free, 0.0);
    }

    #[test]
    fn test_free_clamped_non_negative() {
        let stat = ResourceStat::new(10.0, 14.0);
        assert_eq!(stat.free, 0.0);
        assert!((stat.used_percent - 140.0).abs() < 1e-9);
    }

    #[test]
    fn test_percent_modes() {
        let mut stat = ResourceStat::new(100.0, 40.0);
        stat.assigned = 120.0;
        stat.recompute();
        assert!((stat.percent(BalanceMode::Used) - 40.0).abs() < 1e-9);
        assert!((stat.percent(BalanceMode::Assigned) - 120.0).abs() < 1e-9);
    }
}
