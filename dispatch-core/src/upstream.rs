use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::route::TimeoutConfig;

/// A cluster of backend endpoints plus its balancing, timeout, retry and
/// health-check policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upstream {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Load balancer type: roundrobin, chash, ewma.
    #[serde(default, rename = "type")]
    pub lb_type: LoadBalancerType,

    /// Consistent-hash key expression (when `lb_type == chash`). When unset,
    /// the picker falls back to `remote_addr`.
    #[serde(default)]
    pub key: Option<String>,

    /// Backend nodes: "host:port" -> weight. Ignored once `service_name` is
    /// set — the discovery oracle's answer takes precedence at dispatch time.
    #[serde(default)]
    pub nodes: HashMap<String, u32>,

    /// Name resolved against the discovery oracle; when present `nodes` is a
    /// static fallback that is replaced at dispatch time.
    #[serde(default)]
    pub service_name: Option<String>,

    /// Number of retries on failure. Defaults to `len(nodes) - 1` when unset.
    #[serde(default)]
    pub retries: Option<u32>,

    #[serde(default)]
    pub retry_timeout: Option<f64>,

    #[serde(default)]
    pub timeout: Option<TimeoutConfig>,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default)]
    pub pass_host: PassHostMode,

    #[serde(default)]
    pub upstream_host: Option<String>,

    /// Active and/or passive health-check configuration.
    #[serde(default)]
    pub checks: Option<HealthCheckConfig>,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerType {
    #[default]
    Roundrobin,
    Chash,
    Ewma,
    /// Any `type` string this core doesn't recognize. Kept distinct from a
    /// deserialize error so an upstream with an unknown balancer type still
    /// loads — it only fails once the dispatcher actually needs a picker for
    /// it (SPEC_FULL.md §4.2 step 6: "fail with invalid balancer type").
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PassHostMode {
    #[default]
    Pass,
    Node,
    Rewrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub active: Option<ActiveHealthCheck>,
    #[serde(default)]
    pub passive: Option<PassiveHealthCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveHealthCheck {
    #[serde(default = "default_check_type")]
    pub r#type: String,
    #[serde(default = "default_check_interval")]
    pub interval: u64,
    #[serde(default = "default_check_timeout")]
    pub timeout: f64,
    #[serde(default = "default_check_path")]
    pub http_path: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub req_headers: Vec<String>,
    #[serde(default = "default_healthy_statuses")]
    pub healthy_statuses: Vec<u16>,
    #[serde(default = "default_healthy_successes")]
    pub healthy_successes: u32,
    #[serde(default = "default_unhealthy_failures")]
    pub unhealthy_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassiveHealthCheck {
    #[serde(default)]
    pub healthy: PassiveHealthyConfig,
    #[serde(default)]
    pub unhealthy: PassiveUnhealthyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassiveHealthyConfig {
    #[serde(default = "default_passive_healthy_statuses")]
    pub http_statuses: Vec<u16>,
    #[serde(default = "default_passive_successes")]
    pub successes: u32,
}

impl Default for PassiveHealthyConfig {
    fn default() -> Self {
        Self {
            http_statuses: default_passive_healthy_statuses(),
            successes: default_passive_successes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassiveUnhealthyConfig {
    #[serde(default = "default_passive_unhealthy_statuses")]
    pub http_statuses: Vec<u16>,
    #[serde(default = "default_passive_failures")]
    pub http_failures: u32,
    #[serde(default = "default_passive_tcp_failures")]
    pub tcp_failures: u32,
    #[serde(default = "default_passive_timeouts")]
    pub timeouts: u32,
}

impl Default for PassiveUnhealthyConfig {
    fn default() -> Self {
        Self {
            http_statuses: default_passive_unhealthy_statuses(),
            http_failures: default_passive_failures(),
            tcp_failures: default_passive_tcp_failures(),
            timeouts: default_passive_timeouts(),
        }
    }
}

fn default_scheme() -> String {
    "http".to_string()
}
fn default_check_type() -> String {
    "http".to_string()
}
fn default_check_interval() -> u64 {
    5
}
fn default_check_timeout() -> f64 {
    1.0
}
fn default_check_path() -> String {
    "/".to_string()
}
fn default_healthy_statuses() -> Vec<u16> {
    vec![200, 302]
}
fn default_healthy_successes() -> u32 {
    2
}
fn default_unhealthy_failures() -> u32 {
    3
}
fn default_passive_healthy_statuses() -> Vec<u16> {
    (200..=399).collect()
}
fn default_passive_successes() -> u32 {
    5
}
fn default_passive_unhealthy_statuses() -> Vec<u16> {
    vec![500, 502, 503, 504]
}
fn default_passive_failures() -> u32 {
    5
}
fn default_passive_tcp_failures() -> u32 {
    2
}
fn default_passive_timeouts() -> u32 {
    7
}

impl Upstream {
    pub fn first_node(&self) -> Option<&str> {
        self.nodes.keys().next().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.service_name.is_none()
    }

    /// Effective retry count: configured value, or `len(nodes) - 1` when unset.
    pub fn effective_retries(&self) -> u32 {
        match self.retries {
            Some(r) => r,
            None => self.nodes.len().saturating_sub(1) as u32,
        }
    }

    /// The key used by a consistent-hash picker when `key` is unset.
    pub fn chash_key(&self) -> &str {
        self.key.as_deref().unwrap_or("remote_addr")
    }
}
