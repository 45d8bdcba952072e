use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::upstream::Upstream;

/// A Route defines how incoming requests are matched to an upstream cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Primary URI pattern: exact, prefix ending in `*`, or parametric `:name` segments.
    pub uri: String,

    /// Additional URI patterns (OR match).
    #[serde(default)]
    pub uris: Vec<String>,

    /// Allowed HTTP methods (empty = all methods).
    #[serde(default)]
    pub methods: Vec<HttpMethod>,

    #[serde(default)]
    pub host: Option<String>,

    /// Additional host patterns (OR match), each a literal host or a `*.`-prefixed wildcard.
    #[serde(default)]
    pub hosts: Vec<String>,

    /// CIDR ranges the client's remote address must fall within.
    #[serde(default)]
    pub remote_addrs: Vec<String>,

    /// Attribute predicates; all must hold (conjunction).
    #[serde(default)]
    pub vars: Vec<RouteVar>,

    /// Extra predicate, possibly combining groups of `vars`-shaped conditions with OR.
    #[serde(default)]
    pub filter: Option<FilterExpr>,

    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_enabled")]
    pub enable: bool,

    #[serde(default)]
    pub upstream: Option<Upstream>,

    #[serde(default)]
    pub upstream_id: Option<String>,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(default = "default_status")]
    pub status: u8,

    #[serde(default)]
    pub timeout: Option<TimeoutConfig>,

    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Connect,
    Trace,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Trace => "TRACE",
        }
    }
}

/// A single attribute predicate: `(var, operator, value)`.
///
/// `operator` is one of `==`, `~=`, `>=`, `<=`, `>`, `<`, `~~` (regex),
/// `in` (membership in a JSON array).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteVar {
    pub var: String,
    pub operator: String,
    pub value: serde_json::Value,
}

/// Data-only predicate AST bound to a route at insert time. Resolves the
/// "dynamic filter_fun" design note as pure configuration rather than
/// embedded code: a route only matches when its filter evaluates truthy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterExpr {
    /// All of the nested predicates must hold.
    All(Vec<RouteVar>),
    /// Any of the nested groups must hold; each group is itself a conjunction.
    Any(Vec<Vec<RouteVar>>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_timeout")]
    pub connect: f64,
    #[serde(default = "default_timeout")]
    pub send: f64,
    #[serde(default = "default_timeout")]
    pub read: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: default_timeout(),
            send: default_timeout(),
            read: default_timeout(),
        }
    }
}

impl Route {
    pub fn method_allowed(&self, method: &str) -> bool {
        if self.methods.is_empty() {
            return true;
        }
        self.methods.iter().any(|m| m.as_str() == method)
    }

    pub fn is_active(&self) -> bool {
        self.enable && self.status == 1
    }

    pub fn all_uris(&self) -> Vec<&str> {
        let mut uris = vec![self.uri.as_str()];
        for u in &self.uris {
            uris.push(u.as_str());
        }
        uris
    }

    pub fn all_hosts(&self) -> Vec<&str> {
        let mut hosts = Vec::new();
        if let Some(ref h) = self.host {
            hosts.push(h.as_str());
        }
        for h in &self.hosts {
            hosts.push(h.as_str());
        }
        hosts
    }
}

fn default_enabled() -> bool {
    true
}

fn default_status() -> u8 {
    1
}

fn default_timeout() -> f64 {
    6.0
}
