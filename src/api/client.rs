//! HTTP client for the Proxmox VE API.
//!
//! Connection setup probes every configured endpoint over TCP (with the
//! configured retries and wait time), then picks one reachable endpoint at
//! random to spread load across the cluster. Authentication is either an API
//! token header or a session ticket obtained with username/password.

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::types::*;
use super::ClusterApi;
use crate::config::{split_host_port, ApiConfig, Config};
use crate::error::{BalancerError, Result};
use crate::model::GuestKind;

/// TCP reachability probe timeout per attempt.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
enum Auth {
    Token(String),
    Ticket { cookie: String, csrf: String },
}

/// Authenticated API client bound to one endpoint.
pub struct ProxmoxClient {
    http: reqwest::Client,
    base_url: String,
    endpoint: String,
    auth: Auth,
}

#[derive(Debug, Deserialize)]
struct TicketData {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

impl ProxmoxClient {
    /// Probe the configured endpoints, pick one and authenticate against it.
    pub async fn connect(config: &Config) -> Result<Self> {
        let api = &config.proxmox_api;
        let (host, port) = select_endpoint(api).await?;
        let endpoint = format!("{}:{}", host, port);
        let base_url = format!("https://{}/api2/json", endpoint);

        if !api.ssl_verification {
            warn!(
                "SSL certificate validation to host {} is deactivated",
                endpoint
            );
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.timeout))
            .danger_accept_invalid_certs(!api.ssl_verification)
            .build()
            .map_err(|e| BalancerError::Network(format!("failed to build HTTP client: {}", e)))?;

        let auth = if let Some(secret) = &api.token_secret {
            let user = api.user.clone().unwrap_or_default();
            let token_id = api.token_id.clone().unwrap_or_default();
            debug!("Using API token authentication");
            Auth::Token(format!("PVEAPIToken={}!{}={}", user, token_id, secret))
        } else {
            debug!("Using username/password authentication");
            let ticket = login(&http, &base_url, api).await?;
            Auth::Ticket {
                cookie: format!("PVEAuthCookie={}", ticket.ticket),
                csrf: ticket.csrf_token,
            }
        };

        info!("API connection to host {} succeeded", endpoint);
        Ok(ProxmoxClient {
            http,
            base_url,
            endpoint,
            auth,
        })
    }

    /// The `host:port` this client is bound to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.http.get(&url);
        request = match &self.auth {
            Auth::Token(header) => request.header("Authorization", header),
            Auth::Ticket { cookie, .. } => request.header("Cookie", cookie),
        };
        let response = request
            .send()
            .await
            .map_err(|e| BalancerError::Network(format!("GET {} failed: {}", path, e)))?;
        decode(path, response).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, form: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.http.post(&url).form(form);
        request = match &self.auth {
            Auth::Token(header) => request.header("Authorization", header),
            Auth::Ticket { cookie, csrf } => request
                .header("Cookie", cookie)
                .header("CSRFPreventionToken", csrf),
        };
        let response = request
            .send()
            .await
            .map_err(|e| BalancerError::Network(format!("POST {} failed: {}", path, e)))?;
        decode(path, response).await
    }

    fn guest_segment(kind: GuestKind) -> &'static str {
        match kind {
            GuestKind::Vm => "qemu",
            GuestKind::Ct => "lxc",
        }
    }
}

/// Authenticate with username/password and obtain a session ticket.
async fn login(http: &reqwest::Client, base_url: &str, api: &ApiConfig) -> Result<TicketData> {
    let form = [
        ("username", api.user.clone().unwrap_or_default()),
        ("password", api.pass.clone().unwrap_or_default()),
    ];
    let response = http
        .post(format!("{}/access/ticket", base_url))
        .form(&form)
        .send()
        .await
        .map_err(|e| BalancerError::Network(format!("login request failed: {}", e)))?;

    if response.status() == StatusCode::UNAUTHORIZED {
        let body = response.text().await.unwrap_or_default();
        return Err(BalancerError::Auth(format!(
            "please check the defined credentials: {}",
            body
        )));
    }
    decode("access/ticket", response).await
}

async fn decode<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return Err(BalancerError::Auth(format!("{}: {} {}", path, status, body)));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BalancerError::Api(format!("{}: {} {}", path, status, body)));
    }
    let envelope: ApiEnvelope<T> = response
        .json()
        .await
        .map_err(|e| BalancerError::Serialization(format!("{}: {}", path, e)))?;
    Ok(envelope.data)
}

/// Probe all configured endpoints and pick one reachable endpoint at random.
async fn select_endpoint(api: &ApiConfig) -> Result<(String, u16)> {
    if api.hosts.is_empty() {
        return Err(BalancerError::Config(
            "No proxmox_api hosts are defined".to_string(),
        ));
    }

    let mut reachable: Vec<(String, u16)> = Vec::new();
    for raw in &api.hosts {
        let (host, port) = split_host_port(raw);
        for attempt in 1..=api.retries.max(1) {
            if probe(&host, port).await {
                debug!("Host {} is reachable on tcp/{}", host, port);
                reachable.push((host.clone(), port));
                break;
            }
            warn!(
                "Attempt {}/{} failed for host {}. Retrying in {} seconds...",
                attempt,
                api.retries.max(1),
                host,
                api.wait_time
            );
            tokio::time::sleep(Duration::from_secs(api.wait_time)).await;
        }
    }

    reachable
        .choose(&mut rand::rng())
        .cloned()
        .ok_or_else(|| BalancerError::Network("No valid API hosts found".to_string()))
}

async fn probe(host: &str, port: u16) -> bool {
    matches!(
        timeout(PROBE_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

#[async_trait]
impl ClusterApi for ProxmoxClient {
    async fn list_nodes(&self) -> Result<Vec<NodeListEntry>> {
        self.get("nodes").await
    }

    async fn node_version(&self, node: &str) -> Result<VersionInfo> {
        self.get(&format!("nodes/{}/version", node)).await
    }

    async fn list_vms(&self, node: &str) -> Result<Vec<GuestListEntry>> {
        self.get(&format!("nodes/{}/qemu", node)).await
    }

    async fn list_containers(&self, node: &str) -> Result<Vec<GuestListEntry>> {
        self.get(&format!("nodes/{}/lxc", node)).await
    }

    async fn guest_config(
        &self,
        node: &str,
        kind: GuestKind,
        vmid: u64,
    ) -> Result<GuestConfigInfo> {
        self.get(&format!(
            "nodes/{}/{}/{}/config",
            node,
            Self::guest_segment(kind),
            vmid
        ))
        .await
    }

    async fn guest_pressure(
        &self,
        node: &str,
        kind: GuestKind,
        vmid: u64,
        cf: Consolidation,
    ) -> Result<Vec<PressureSample>> {
        self.get(&format!(
            "nodes/{}/{}/{}/rrddata?timeframe=hour&cf={}",
            node,
            Self::guest_segment(kind),
            vmid,
            cf.as_str()
        ))
        .await
    }

    async fn node_pressure(
        &self,
        node: &str,
        cf: Consolidation,
    ) -> Result<Vec<PressureSample>> {
        self.get(&format!(
            "nodes/{}/rrddata?timeframe=hour&cf={}",
            node,
            cf.as_str()
        ))
        .await
    }

    async fn list_pools(&self) -> Result<Vec<PoolListEntry>> {
        self.get("pools").await
    }

    async fn pool_detail(&self, poolid: &str) -> Result<PoolDetail> {
        self.get(&format!("pools/{}", poolid)).await
    }

    async fn list_ha_rules(&self) -> Result<Vec<HaRuleEntry>> {
        self.get("cluster/ha/rules").await
    }

    async fn ha_status(&self) -> Result<Vec<HaStatusEntry>> {
        self.get("cluster/ha/status").await
    }

    async fn migrate_vm(&self, node: &str, vmid: u64, options: &VmMigration) -> Result<String> {
        let mut form = vec![
            ("target", options.target.clone()),
            ("online", flag(options.online)),
            ("with-local-disks", flag(options.with_local_disks)),
        ];
        if options.with_conntrack_state {
            form.push(("with-conntrack-state", "1".to_string()));
        }
        self.post(&format!("nodes/{}/qemu/{}/migrate", node, vmid), &form)
            .await
    }

    async fn migrate_container(
        &self,
        node: &str,
        vmid: u64,
        options: &CtMigration,
    ) -> Result<String> {
        let form = vec![
            ("target", options.target.clone()),
            ("restart", flag(options.restart)),
        ];
        self.post(&format!("nodes/{}/lxc/{}/migrate", node, vmid), &form)
            .await
    }

    async fn task_status(&self, node: &str, upid: &str) -> Result<TaskStatusInfo> {
        self.get(&format!("nodes/{}/tasks/{}/status", node, upid))
            .await
    }

    async fn find_migration_task(
        &self,
        node: &str,
        vmid: u64,
    ) -> Result<Option<TaskListEntry>> {
        let tasks: Vec<TaskListEntry> = self
            .get(&format!(
                "nodes/{}/tasks?typefilter=qmigrate&vmid={}&source=active&limit=1",
                node, vmid
            ))
            .await?;
        Ok(tasks.into_iter().next())
    }

    async fn permissions(&self) -> Result<BTreeMap<String, BTreeMap<String, u8>>> {
        self.get("access/permissions").await
    }

    async fn node_config(&self, node: &str) -> Result<NodeConfigInfo> {
        self.get(&format!("nodes/{}/config", node)).await
    }

    async fn shutdown_node(&self, node: &str) -> Result<()> {
        let _: Option<serde_json::Value> = self
            .post(
                &format!("nodes/{}/status", node),
                &[("command", "shutdown".to_string())],
            )
            .await?;
        Ok(())
    }
}

fn flag(value: bool) -> String {
    if value {
        "1".to_string()
    } else {
        "0".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_unreachable_port() {
        // Nothing listens on a freshly bound-then-dropped port.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!probe("127.0.0.1", port).await);
    }

    #[tokio::test]
    async fn test_probe_reachable_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(probe("127.0.0.1", port).await);
    }

    #[tokio::test]
    async fn test_select_endpoint_no_hosts() {
        let api = ApiConfig::default();
        let err = select_endpoint(&api).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_select_endpoint_unreachable_hosts() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let api = ApiConfig {
            hosts: vec![format!("127.0.0.1:{}", port)],
            retries: 1,
            wait_time: 0,
            ..Default::default()
        };
        let err = select_endpoint(&api).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_flag_encoding() {
        assert_eq!(flag(true), "1");
        assert_eq!(flag(false), "0");
    }
}
