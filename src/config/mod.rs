// # Configuration
//
// YAML configuration schema, defaults and validation. The file is re-read on
// SIGHUP, so loading lives behind a `Loader` that remembers the resolved
// path. Credentials are mutually exclusive: either user/pass or an API token
// pair, never both.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{BalancerError, Result};
use crate::model::{AffinityType, BalanceMode, GuestKind, ResourceKind};

/// Fallback location when `-c/--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/proxbalance/proxbalance.yaml";

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub proxmox_api: ApiConfig,
    #[serde(default)]
    pub proxmox_cluster: ClusterConfig,
    #[serde(default)]
    pub balancing: BalancingConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub power_management: PowerConfig,
}

/// Connection settings for the cluster API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub hosts: Vec<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub token_id: Option<String>,
    pub token_secret: Option<String>,
    #[serde(default = "default_true")]
    pub ssl_verification: bool,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Connectivity probe attempts per host.
    #[serde(default = "default_one")]
    pub retries: u32,
    /// Seconds between probe attempts.
    #[serde(default = "default_one_u64")]
    pub wait_time: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            hosts: Vec::new(),
            user: None,
            pass: None,
            token_id: None,
            token_secret: None,
            ssl_verification: true,
            timeout: default_timeout(),
            retries: default_one(),
            wait_time: default_one_u64(),
        }
    }
}

impl ApiConfig {
    /// Overwrite in-memory secrets once the API client holds its own copy,
    /// so later dumps cannot leak them.
    pub fn scrub_secrets(&mut self) {
        if self.pass.is_some() {
            self.pass = Some("********".to_string());
        }
        if self.token_secret.is_some() {
            self.token_secret = Some("********".to_string());
        }
    }
}

/// Operator-maintained node lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub maintenance_nodes: Vec<String>,
    #[serde(default)]
    pub ignore_nodes: Vec<String>,
}

/// Balancing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancingConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_method")]
    pub method: ResourceKind,
    #[serde(default = "default_mode")]
    pub mode: BalanceMode,
    /// Permitted spread, in percentage points, between the most and least
    /// loaded node before balancing triggers.
    #[serde(default = "default_balanciness")]
    pub balanciness: f64,
    pub cpu_threshold: Option<f64>,
    pub memory_threshold: Option<f64>,
    pub disk_threshold: Option<f64>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default = "default_parallel_jobs")]
    pub parallel_jobs: usize,
    #[serde(default = "default_balance_types")]
    pub balance_types: Vec<GuestKind>,
    #[serde(default = "default_true")]
    pub live: bool,
    #[serde(default = "default_true")]
    pub with_local_disks: bool,
    #[serde(default)]
    pub with_conntrack_state: bool,
    /// Poll iterations before a migration job is abandoned.
    #[serde(default = "default_max_job_validation")]
    pub max_job_validation: u32,
    #[serde(default)]
    pub balance_larger_guests_first: bool,
    #[serde(default)]
    pub enforce_affinity: bool,
    #[serde(default)]
    pub enforce_pinning: bool,
    #[serde(default)]
    pub psi_thresholds: PsiThresholds,
    #[serde(default)]
    pub psi: PsiScopes,
    #[serde(default)]
    pub pools: BTreeMap<String, PoolPolicy>,
    /// Capacity withheld per node (or `defaults`), in GiB for memory and
    /// disk, in cores for cpu.
    #[serde(default)]
    pub node_resource_reserve: BTreeMap<String, ResourceReserve>,
}

impl Default for BalancingConfig {
    fn default() -> Self {
        BalancingConfig {
            enable: false,
            method: default_method(),
            mode: default_mode(),
            balanciness: default_balanciness(),
            cpu_threshold: None,
            memory_threshold: None,
            disk_threshold: None,
            parallel: false,
            parallel_jobs: default_parallel_jobs(),
            balance_types: default_balance_types(),
            live: true,
            with_local_disks: true,
            with_conntrack_state: false,
            max_job_validation: default_max_job_validation(),
            balance_larger_guests_first: false,
            enforce_affinity: false,
            enforce_pinning: false,
            psi_thresholds: PsiThresholds::default(),
            psi: PsiScopes::default(),
            pools: BTreeMap::new(),
            node_resource_reserve: BTreeMap::new(),
        }
    }
}

impl BalancingConfig {
    /// Absolute threshold for the given method, when configured.
    pub fn threshold(&self, method: ResourceKind) -> Option<f64> {
        match method {
            ResourceKind::Cpu => self.cpu_threshold,
            ResourceKind::Memory => self.memory_threshold,
            ResourceKind::Disk => self.disk_threshold,
        }
    }

    /// Pressure thresholds applied to nodes; `psi.nodes` overrides the
    /// shared defaults.
    pub fn node_psi(&self, kind: ResourceKind) -> PsiTriple {
        self.psi
            .nodes
            .as_ref()
            .unwrap_or(&self.psi_thresholds)
            .get(kind)
    }

    /// Pressure thresholds applied to guests; `psi.guests` overrides the
    /// shared defaults.
    pub fn guest_psi(&self, kind: ResourceKind) -> PsiTriple {
        self.psi
            .guests
            .as_ref()
            .unwrap_or(&self.psi_thresholds)
            .get(kind)
    }

    /// Reservation for one node and resource, falling back to `defaults`.
    pub fn reserve_for(&self, node: &str, kind: ResourceKind) -> Option<f64> {
        let pick = |r: &ResourceReserve| match kind {
            ResourceKind::Cpu => r.cpu,
            ResourceKind::Memory => r.memory,
            ResourceKind::Disk => r.disk,
        };
        self.node_resource_reserve
            .get(node)
            .and_then(pick)
            .or_else(|| self.node_resource_reserve.get("defaults").and_then(pick))
    }
}

/// Pressure thresholds for one resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PsiTriple {
    #[serde(default = "default_pressure_full")]
    pub pressure_full: f64,
    #[serde(default = "default_pressure_some")]
    pub pressure_some: f64,
    #[serde(default = "default_pressure_spikes")]
    pub pressure_spikes: f64,
}

impl Default for PsiTriple {
    fn default() -> Self {
        PsiTriple {
            pressure_full: default_pressure_full(),
            pressure_some: default_pressure_some(),
            pressure_spikes: default_pressure_spikes(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PsiThresholds {
    #[serde(default)]
    pub cpu: PsiTriple,
    #[serde(default)]
    pub memory: PsiTriple,
    #[serde(default)]
    pub disk: PsiTriple,
}

impl PsiThresholds {
    pub fn get(&self, kind: ResourceKind) -> PsiTriple {
        match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Memory => self.memory,
            ResourceKind::Disk => self.disk,
        }
    }
}

/// Separate node/guest threshold overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PsiScopes {
    pub nodes: Option<PsiThresholds>,
    pub guests: Option<PsiThresholds>,
}

/// Balancing semantics attached to a resource pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolPolicy {
    #[serde(rename = "type")]
    pub kind: AffinityType,
    #[serde(default)]
    pub pin: Vec<String>,
    #[serde(default = "default_true")]
    pub strict: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceReserve {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    pub disk: Option<f64>,
}

/// Daemonization and scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub daemon: bool,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub delay: Delay,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            daemon: false,
            schedule: Schedule::default(),
            delay: Delay::default(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalFormat {
    Hours,
    Minutes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default = "default_schedule_format")]
    pub format: IntervalFormat,
    #[serde(default = "default_schedule_interval")]
    pub interval: u64,
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule {
            format: default_schedule_format(),
            interval: default_schedule_interval(),
        }
    }
}

/// Optional startup delay before the first cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delay {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_delay_format")]
    pub format: IntervalFormat,
    #[serde(default)]
    pub time: u64,
}

impl Default for Delay {
    fn default() -> Self {
        Delay {
            enable: false,
            format: default_delay_format(),
            time: 0,
        }
    }
}

/// Node power management. Only the static mode survives; unknown modes are
/// rejected at parse time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub mode: PowerMode,
    #[serde(default = "default_method")]
    pub method: ResourceKind,
    /// Minimum free share of `method` the remaining cluster must keep, in
    /// percent.
    #[serde(default)]
    pub cluster_min_free_resources: f64,
    #[serde(default = "default_min_nodes")]
    pub cluster_min_nodes: usize,
}

impl Default for PowerConfig {
    fn default() -> Self {
        PowerConfig {
            enable: false,
            mode: PowerMode::Static,
            method: default_method(),
            cluster_min_free_resources: 0.0,
            cluster_min_nodes: default_min_nodes(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerMode {
    #[default]
    Static,
}

/// Resolves and remembers the configuration path so the daemon can re-read
/// the file on reload.
#[derive(Debug, Clone)]
pub struct Loader {
    path: PathBuf,
}

impl Loader {
    /// Validate that a configuration file exists at the given path, falling
    /// back to [`DEFAULT_CONFIG_PATH`] when none was supplied.
    pub fn new(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(BalancerError::Config(format!(
                        "The file {} does not exist",
                        p.display()
                    )));
                }
                p
            }
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !fallback.exists() {
                    return Err(BalancerError::Config(format!(
                        "The config file {} does not exist",
                        fallback.display()
                    )));
                }
                fallback
            }
        };
        debug!("Using config file {}", path.display());
        Ok(Loader { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse and validate the configuration file.
    pub fn load(&self) -> Result<Config> {
        info!("Using config path: {}", self.path.display());
        let raw = fs::read_to_string(&self.path)?;
        let config: Config = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Reject configurations the pipeline cannot act on.
    pub fn validate(&self) -> Result<()> {
        let api = &self.proxmox_api;
        if api.hosts.is_empty() {
            return Err(BalancerError::Config(
                "No proxmox_api hosts are defined".to_string(),
            ));
        }
        if api.pass.is_some() && api.token_secret.is_some() {
            return Err(BalancerError::Config(
                "Username/password and API token authentication are mutually exclusive".to_string(),
            ));
        }
        if let Some(token_id) = &api.token_id {
            if token_id.contains('@') || token_id.contains('!') {
                return Err(BalancerError::Config(
                    "Wrong user/token format: user and token id must be split".to_string(),
                ));
            }
        }
        if self.balancing.parallel_jobs == 0 {
            return Err(BalancerError::Config(
                "balancing.parallel_jobs must be at least 1".to_string(),
            ));
        }
        if self.service.schedule.interval == 0 {
            return Err(BalancerError::Config(
                "service.schedule.interval must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Split an endpoint into host and port, defaulting the port to 8006.
/// Bracketed IPv6 literals are understood.
pub fn split_host_port(endpoint: &str) -> (String, u16) {
    if let Some(rest) = endpoint.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(8006);
            return (host.to_string(), port);
        }
    }
    match endpoint.rsplit_once(':') {
        // A second ':' means an unbracketed IPv6 address without a port.
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(p) => (host.to_string(), p),
            Err(_) => (endpoint.to_string(), 8006),
        },
        _ => (endpoint.to_string(), 8006),
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    10
}

fn default_one() -> u32 {
    1
}

fn default_one_u64() -> u64 {
    1
}

fn default_method() -> ResourceKind {
    ResourceKind::Memory
}

fn default_mode() -> BalanceMode {
    BalanceMode::Used
}

fn default_balanciness() -> f64 {
    10.0
}

fn default_parallel_jobs() -> usize {
    5
}

fn default_balance_types() -> Vec<GuestKind> {
    vec![GuestKind::Vm, GuestKind::Ct]
}

fn default_max_job_validation() -> u32 {
    1800
}

fn default_pressure_full() -> f64 {
    10.0
}

fn default_pressure_some() -> f64 {
    40.0
}

fn default_pressure_spikes() -> f64 {
    80.0
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_schedule_format() -> IntervalFormat {
    IntervalFormat::Hours
}

fn default_schedule_interval() -> u64 {
    12
}

fn default_delay_format() -> IntervalFormat {
    IntervalFormat::Minutes
}

fn default_min_nodes() -> usize {
    3
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_yaml() -> &'static str {
        "proxmox_api:\n  hosts:\n    - pve01.example.com\n  user: root@pam\n  pass: secret\n"
    }

    #[test]
    fn test_load_minimal_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(minimal_yaml().as_bytes()).unwrap();
        let loader = Loader::new(Some(file.path().to_path_buf())).unwrap();
        let config = loader.load().unwrap();
        assert_eq!(config.proxmox_api.hosts, vec!["pve01.example.com"]);
        assert!(config.proxmox_api.ssl_verification);
        assert_eq!(config.balancing.method, ResourceKind::Memory);
        assert_eq!(config.balancing.mode, BalanceMode::Used);
        assert_eq!(config.balancing.balanciness, 10.0);
        assert_eq!(config.balancing.parallel_jobs, 5);
        assert_eq!(config.balancing.max_job_validation, 1800);
        assert_eq!(config.service.schedule.format, IntervalFormat::Hours);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Loader::new(Some(PathBuf::from("/nonexistent/proxbalance.yaml"))).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_conflicting_credentials_rejected() {
        let yaml = "proxmox_api:\n  hosts: [pve01]\n  user: root@pam\n  pass: secret\n  token_id: balancer\n  token_secret: sssh\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_token_id_format_rejected() {
        let yaml = "proxmox_api:\n  hosts: [pve01]\n  user: root@pam\n  token_id: 'root@pam!balancer'\n  token_secret: sssh\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_power_mode_auto_rejected_at_parse() {
        let yaml = "power_management:\n  enable: true\n  mode: auto\n";
        let parsed: std::result::Result<Config, _> = serde_yaml::from_str(yaml);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_reserve_falls_back_to_defaults() {
        let yaml = "balancing:\n  node_resource_reserve:\n    defaults:\n      memory: 4\n    pve02:\n      memory: 8\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.balancing.reserve_for("pve02", ResourceKind::Memory),
            Some(8.0)
        );
        assert_eq!(
            config.balancing.reserve_for("pve01", ResourceKind::Memory),
            Some(4.0)
        );
        assert_eq!(config.balancing.reserve_for("pve01", ResourceKind::Cpu), None);
    }

    #[test]
    fn test_psi_scope_overrides() {
        let yaml = "balancing:\n  psi_thresholds:\n    cpu:\n      pressure_full: 5\n  psi:\n    nodes:\n      cpu:\n        pressure_full: 20\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.balancing.node_psi(ResourceKind::Cpu).pressure_full, 20.0);
        assert_eq!(config.balancing.guest_psi(ResourceKind::Cpu).pressure_full, 5.0);
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("pve01"), ("pve01".to_string(), 8006));
        assert_eq!(split_host_port("pve01:443"), ("pve01".to_string(), 443));
        assert_eq!(split_host_port("[fd00::1]:443"), ("fd00::1".to_string(), 443));
        assert_eq!(split_host_port("[fd00::1]"), ("fd00::1".to_string(), 8006));
        assert_eq!(split_host_port("fd00::1"), ("fd00::1".to_string(), 8006));
    }

    #[test]
    fn test_scrub_secrets() {
        let mut api = ApiConfig {
            pass: Some("hunter2".to_string()),
            ..Default::default()
        };
        api.scrub_secrets();
        assert_eq!(api.pass.as_deref(), Some("********"));
        assert!(api.token_secret.is_none());
    }
}
