use std::collections::HashMap;

use dashmap::DashMap;
use serde_json::Value;

/// Names that, in addition to being memoized, fan out a write to the
/// transport variable table. See SPEC_FULL.md §6.
pub const WRITABLE_VAR_NAMES: &[&str] = &[
    "upstream_scheme",
    "upstream_host",
    "upstream_upgrade",
    "upstream_connection",
    "upstream_uri",
    "upstream_mirror_host",
    "upstream_cache_zone",
    "upstream_cache_zone_info",
    "upstream_no_cache",
    "upstream_cache_key",
    "upstream_cache_bypass",
    "upstream_hdr_expires",
    "upstream_hdr_cache_control",
];

/// Per-request state: the attributes the trie matcher, picker and filter
/// predicates read, plus the fields the dispatcher writes as it resolves an
/// endpoint.
#[derive(Debug)]
pub struct RequestContext {
    pub method: String,
    pub host: String,
    pub uri: String,
    pub remote_addr: String,

    /// Request headers, keyed by lowercase name.
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,

    /// The transport's named variable table (connection/request attributes:
    /// `uri`, `host`, `remote_addr`, `request_method`, `args_*`, `arg_*`, …).
    /// Seeded at construction from the attributes above plus caller-supplied
    /// extras; writable names also land here.
    transport_vars: HashMap<String, String>,

    /// Per-request memoization of resolved variable lookups.
    memo: DashMap<String, Value>,

    // ---- fields written by route matching / the dispatcher ----
    pub matched_route: Option<String>,
    pub upstream_key: Option<String>,
    pub upstream_version: u64,
    pub balancer_try_count: u32,
    pub balancer_ip: Option<String>,
    pub balancer_port: Option<u16>,
    pub proxy_passed: bool,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, host: impl Into<String>, uri: impl Into<String>, remote_addr: impl Into<String>) -> Self {
        let method = method.into();
        let host = host.into();
        let uri = uri.into();
        let remote_addr = remote_addr.into();

        let mut transport_vars = HashMap::new();
        transport_vars.insert("uri".to_string(), uri.clone());
        transport_vars.insert("host".to_string(), host.clone());
        transport_vars.insert("remote_addr".to_string(), remote_addr.clone());
        transport_vars.insert("request_method".to_string(), method.clone());

        Self {
            method,
            host,
            uri,
            remote_addr,
            headers: HashMap::new(),
            cookies: HashMap::new(),
            transport_vars,
            memo: DashMap::new(),
            matched_route: None,
            upstream_key: None,
            upstream_version: 0,
            balancer_try_count: 0,
            balancer_ip: None,
            balancer_port: None,
            proxy_passed: false,
        }
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into().to_lowercase(), value.into());
    }

    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    /// Seed an arbitrary transport variable (e.g. `args_x`, `arg_key`) that
    /// isn't one of the fixed request attributes.
    pub fn set_transport_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.transport_vars.insert(name.into(), value.into());
    }

    /// Resolve `name` following the fixed precedence in SPEC_FULL.md §6:
    /// `method` → `cookie` → `cookie_*` → `http_*` → transport variable table.
    /// The result is memoized for the life of the request.
    pub fn get_var(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.memo.get(name) {
            return Some(v.clone());
        }

        let resolved = if name == "method" {
            Some(Value::String(self.method.clone()))
        } else if name == "cookie" {
            Some(serde_json::to_value(&self.cookies).ok()?)
        } else if let Some(cookie_name) = name.strip_prefix("cookie_") {
            self.cookies.get(cookie_name).map(|v| Value::String(v.clone()))
        } else if let Some(header_name) = name.strip_prefix("http_") {
            let key = header_name.replace('_', "-");
            self.headers.get(&key).map(|v| Value::String(v.clone()))
        } else {
            self.transport_vars.get(name).map(|v| Value::String(v.clone()))
        };

        if let Some(ref v) = resolved {
            self.memo.insert(name.to_string(), v.clone());
        }
        resolved
    }

    /// Resolve `name` as a plain string, the common case for trie predicates
    /// and picker key derivation.
    pub fn get_var_str(&self, name: &str) -> Option<String> {
        self.get_var(name).map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    /// Write a variable. Writable names (see [`WRITABLE_VAR_NAMES`]) also
    /// propagate into the transport variable table; any other name is simply
    /// memoized for the remainder of the request.
    pub fn set_var(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if WRITABLE_VAR_NAMES.contains(&name) {
            self.transport_vars.insert(name.to_string(), value.clone());
        }
        self.memo.insert(name.to_string(), Value::String(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_method() {
        let ctx = RequestContext::new("GET", "a.example", "/foo", "10.0.0.1");
        assert_eq!(ctx.get_var_str("method").as_deref(), Some("GET"));
    }

    #[test]
    fn resolves_cookie_prefixed_name() {
        let mut ctx = RequestContext::new("GET", "a.example", "/foo", "10.0.0.1");
        ctx.set_cookie("session", "abc123");
        assert_eq!(ctx.get_var_str("cookie_session").as_deref(), Some("abc123"));
        assert!(ctx.get_var_str("cookie_missing").is_none());
    }

    #[test]
    fn resolves_http_prefixed_header_with_dash_underscore_translation() {
        let mut ctx = RequestContext::new("GET", "a.example", "/foo", "10.0.0.1");
        ctx.set_header("X-Api-Version", "2");
        assert_eq!(ctx.get_var_str("http_x_api_version").as_deref(), Some("2"));
    }

    #[test]
    fn falls_back_to_transport_var_table() {
        let mut ctx = RequestContext::new("GET", "a.example", "/foo", "10.0.0.1");
        ctx.set_transport_var("arg_key", "abc");
        assert_eq!(ctx.get_var_str("arg_key").as_deref(), Some("abc"));
        assert_eq!(ctx.get_var_str("remote_addr").as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn writable_name_fans_out_to_transport_table() {
        let mut ctx = RequestContext::new("GET", "a.example", "/foo", "10.0.0.1");
        ctx.set_var("upstream_host", "backend.internal");
        assert_eq!(ctx.get_var_str("upstream_host").as_deref(), Some("backend.internal"));
        assert_eq!(ctx.transport_vars.get("upstream_host").map(String::as_str), Some("backend.internal"));
    }

    #[test]
    fn non_writable_name_is_memoized_only() {
        let mut ctx = RequestContext::new("GET", "a.example", "/foo", "10.0.0.1");
        ctx.set_var("scratch", "x");
        assert_eq!(ctx.get_var_str("scratch").as_deref(), Some("x"));
        assert!(!ctx.transport_vars.contains_key("scratch"));
    }

    #[test]
    fn lookups_are_memoized() {
        let mut ctx = RequestContext::new("GET", "a.example", "/foo", "10.0.0.1");
        ctx.set_header("X-Once", "first");
        assert_eq!(ctx.get_var_str("http_x_once").as_deref(), Some("first"));
        // Mutating the header after the first resolution must not change the memoized value.
        ctx.set_header("X-Once", "second");
        assert_eq!(ctx.get_var_str("http_x_once").as_deref(), Some("first"));
    }
}
