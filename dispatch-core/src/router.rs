use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use ipnet::IpNet;
use tracing::{info, warn};

use crate::context::RequestContext;
use crate::route::Route;
use crate::trie::Trie;
use crate::vars::{eval_all, eval_filter, validate_route_predicates};

/// Pre-compiled host constraints for a route.
#[derive(Clone, Debug)]
struct HostConstraint {
    exact: Vec<String>,
    wildcard_suffixes: Vec<String>,
}

impl HostConstraint {
    fn from_route(route: &Route) -> Self {
        let hosts = route.all_hosts();
        let mut exact = Vec::new();
        let mut wildcard_suffixes = Vec::new();
        for h in hosts {
            if let Some(suffix) = h.strip_prefix('*') {
                wildcard_suffixes.push(suffix.to_string());
            } else {
                exact.push(h.to_string());
            }
        }
        Self { exact, wildcard_suffixes }
    }

    fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcard_suffixes.is_empty()
    }

    fn matches(&self, request_host: Option<&str>) -> bool {
        if self.is_empty() {
            return true;
        }
        let Some(host) = request_host else { return false };
        let host = host.split(':').next().unwrap_or(host);
        self.exact.iter().any(|h| h == host) || self.wildcard_suffixes.iter().any(|s| host.ends_with(s.as_str()))
    }
}

/// Pre-parsed CIDR constraints for a route's `remote_addrs`.
struct RemoteConstraint(Vec<IpNet>);

impl RemoteConstraint {
    fn from_route(route: &Route) -> Option<Self> {
        if route.remote_addrs.is_empty() {
            return None;
        }
        let nets: Vec<IpNet> = route
            .remote_addrs
            .iter()
            .filter_map(|s| {
                s.parse::<IpNet>().ok().or_else(|| s.parse::<IpAddr>().ok().map(IpNet::from))
            })
            .collect();
        Some(Self(nets))
    }

    fn matches(&self, remote_addr: &str) -> bool {
        let Ok(addr) = remote_addr.parse::<IpAddr>() else { return false };
        self.0.iter().any(|net| net.contains(&addr))
    }
}

struct CompiledRouter {
    method_tries: HashMap<String, Trie>,
    any_method_trie: Trie,
    host_constraints: HashMap<Arc<str>, HostConstraint>,
    remote_constraints: HashMap<Arc<str>, RemoteConstraint>,
    /// Pre-compiled predicate/method data, keyed by id, so dispatch never
    /// touches the source-of-truth `routes` DashMap.
    compiled_routes: HashMap<Arc<str>, Arc<Route>>,
}

#[derive(Debug)]
pub struct RouteMatch {
    pub route_id: Arc<str>,
    pub params: Vec<(String, String)>,
}

/// Versioned, concurrently-readable store of routes plus the compiled trie
/// used to dispatch requests. Readers never block writers and vice versa:
/// `dispatch` loads an `ArcSwap` guard and never touches the `routes`
/// DashMap that backs rebuilds.
pub struct RouteStore {
    inner: arc_swap::ArcSwap<CompiledRouter>,
    routes: DashMap<String, Route>,
    version: AtomicU64,
}

impl RouteStore {
    pub fn new() -> Self {
        let compiled = CompiledRouter {
            method_tries: HashMap::new(),
            any_method_trie: Trie::new(),
            host_constraints: HashMap::new(),
            remote_constraints: HashMap::new(),
            compiled_routes: HashMap::new(),
        };
        Self {
            inner: arc_swap::ArcSwap::new(Arc::new(compiled)),
            routes: DashMap::new(),
            version: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    pub fn add_route(&self, route: Route) -> Result<(), crate::error::DispatchError> {
        info!(route_id = %route.id, uri = %route.uri, "adding route");
        self.routes.insert(route.id.clone(), route);
        self.rebuild()
    }

    pub fn remove_route(&self, route_id: &str) -> Result<(), crate::error::DispatchError> {
        info!(route_id = %route_id, "removing route");
        self.routes.remove(route_id);
        self.rebuild()
    }

    pub fn get_route(&self, route_id: &str) -> Option<Route> {
        self.routes.get(route_id).map(|r| r.clone())
    }

    pub fn all_routes(&self) -> Vec<Route> {
        self.routes.iter().map(|r| r.value().clone()).collect()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn replace_all(&self, routes: Vec<Route>) -> Result<(), crate::error::DispatchError> {
        self.routes.clear();
        for route in routes {
            self.routes.insert(route.id.clone(), route);
        }
        self.rebuild()
    }

    /// Rebuild the compiled trie and predicate data from the current route
    /// set, `extra` (plugin-contributed routes, inserted first per
    /// SPEC_FULL.md §4.1) plus the current DashMap contents. Atomically
    /// swaps the compiled snapshot and bumps `version`.
    pub fn rebuild_with(&self, extra: Vec<Route>) -> Result<(), crate::error::DispatchError> {
        let mut method_tries: HashMap<String, Trie> = HashMap::new();
        let mut any_method_trie = Trie::new();
        let mut host_constraints = HashMap::new();
        let mut remote_constraints = HashMap::new();
        let mut compiled_routes = HashMap::new();

        let mut routes: Vec<Route> = extra;
        routes.extend(self.routes.iter().map(|r| r.value().clone()));
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));

        for route in &routes {
            if !route.is_active() {
                continue;
            }
            if let Err(e) = validate_route_predicates(route) {
                warn!(route_id = %route.id, error = %e, "skipping route with malformed predicate");
                continue;
            }
            let route_id: Arc<str> = Arc::from(route.id.as_str());

            let hc = HostConstraint::from_route(route);
            if !hc.is_empty() {
                host_constraints.insert(Arc::clone(&route_id), hc);
            }
            if let Some(rc) = RemoteConstraint::from_route(route) {
                remote_constraints.insert(Arc::clone(&route_id), rc);
            }
            compiled_routes.insert(Arc::clone(&route_id), Arc::new(route.clone()));

            for uri in route.all_uris() {
                if route.methods.is_empty() {
                    if let Err(e) = any_method_trie.insert(uri, Arc::clone(&route_id), route.priority) {
                        warn!(route_id = %route.id, uri = %uri, error = %e, "failed to insert route");
                    }
                } else {
                    for method in &route.methods {
                        let trie = method_tries.entry(method.as_str().to_string()).or_default();
                        if let Err(e) = trie.insert(uri, Arc::clone(&route_id), route.priority) {
                            warn!(route_id = %route.id, uri = %uri, method = ?method, error = %e, "failed to insert route");
                        }
                    }
                }
            }
        }

        let compiled = CompiledRouter {
            method_tries,
            any_method_trie,
            host_constraints,
            remote_constraints,
            compiled_routes,
        };
        self.inner.store(Arc::new(compiled));
        self.version.fetch_add(1, Ordering::Release);
        info!(count = routes.len(), "route store rebuilt");
        Ok(())
    }

    pub fn rebuild(&self) -> Result<(), crate::error::DispatchError> {
        self.rebuild_with(Vec::new())
    }

    /// Dispatch a request: walk the compiled trie(s), filter candidates in
    /// descending-priority order by host, remote address, `vars` and
    /// `filter`, and return the first surviving candidate. At most one
    /// candidate is ever returned (SPEC_FULL.md §4.1: "At most one handler
    /// runs per dispatch").
    pub fn dispatch(&self, ctx: &RequestContext) -> Option<RouteMatch> {
        let compiled = self.inner.load();
        let method = ctx.method.as_str();
        let path = ctx.uri.as_str();

        let mut candidates = compiled
            .method_tries
            .get(method)
            .map(|t| t.matches(path))
            .unwrap_or_default();
        candidates.extend(compiled.any_method_trie.matches(path));
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

        for candidate in candidates {
            if !Self::check_host(&compiled, &candidate.route_id, Some(ctx.host.as_str())) {
                continue;
            }
            if !Self::check_remote_addr(&compiled, &candidate.route_id, ctx.remote_addr.as_str()) {
                continue;
            }
            if let Some(route) = compiled.compiled_routes.get(&candidate.route_id) {
                if !eval_all(&route.vars, ctx) {
                    continue;
                }
                if !eval_filter(&route.filter, ctx) {
                    continue;
                }
            }
            return Some(RouteMatch {
                route_id: candidate.route_id,
                params: candidate.params,
            });
        }
        None
    }

    fn check_host(compiled: &CompiledRouter, route_id: &str, host: Option<&str>) -> bool {
        match compiled.host_constraints.get(route_id) {
            Some(hc) => hc.matches(host),
            None => true,
        }
    }

    fn check_remote_addr(compiled: &CompiledRouter, route_id: &str, remote_addr: &str) -> bool {
        match compiled.remote_constraints.get(route_id) {
            Some(rc) => rc.matches(remote_addr),
            None => true,
        }
    }
}

impl Default for RouteStore {
    fn default() -> Self {
        Self::new()
    }
}
