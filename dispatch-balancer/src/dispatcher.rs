use std::sync::Arc;
use std::time::Duration;

use dispatch_core::config::DispatchConfig;
use dispatch_core::context::RequestContext;
use dispatch_core::route::Route;
use dispatch_core::router::RouteStore;
use dispatch_core::upstream::Upstream;
use tracing::info;

use crate::address_cache::AddressCache;
use crate::discovery::DiscoveryOracle;
use crate::error::BalancerError;
use crate::health_check::{EndpointKey, HealthCheckerRegistry};
use crate::picker::PickerNode;
use crate::picker_registry::PickerRegistry;
use crate::transport::Transport;

/// Orchestrates route matching and endpoint resolution: owns the per-worker
/// registries (§2 components 4-6) and exposes the two public entry points,
/// `match_route` and `run`, described in SPEC_FULL.md §4.2.
pub struct Dispatcher {
    route_store: Arc<RouteStore>,
    picker_registry: PickerRegistry,
    checker_registry: HealthCheckerRegistry,
    address_cache: AddressCache,
    discovery: Arc<dyn DiscoveryOracle>,
}

impl Dispatcher {
    /// Build a dispatcher sized from `config.cache` (SPEC_FULL.md §4.5's
    /// picker/checker/address cache capacities and shared TTL).
    pub fn new(route_store: Arc<RouteStore>, discovery: Arc<dyn DiscoveryOracle>, config: &DispatchConfig) -> Self {
        let ttl = Duration::from_secs(config.cache.ttl_secs);
        Self {
            route_store,
            picker_registry: PickerRegistry::new(config.cache.picker_cache_capacity, ttl),
            checker_registry: HealthCheckerRegistry::new(config.cache.checker_cache_capacity, ttl),
            address_cache: AddressCache::new(config.cache.address_cache_capacity, ttl),
            discovery,
        }
    }

    /// `match(ctx)`: resolve the route for a request without running the
    /// balancer. Writes `ctx.matched_route` on success.
    pub fn match_route(&self, ctx: &mut RequestContext) -> Option<Route> {
        let m = self.route_store.dispatch(ctx)?;
        ctx.matched_route = Some(m.route_id.to_string());
        self.route_store.get_route(&m.route_id)
    }

    /// `run(route, ctx)`: resolve `upstream` to a concrete endpoint and hand
    /// it to `transport`, following the nine steps of SPEC_FULL.md §4.2.
    /// `upstream_key` identifies the cluster for caching purposes (embedded
    /// upstreams use the owning route id; referenced upstreams use their own
    /// id — resolving the reference is the caller's responsibility per the
    /// data model's "reference resolved by the caller before run").
    pub async fn run(
        &self,
        upstream: &Upstream,
        upstream_key: &str,
        ctx: &mut RequestContext,
        transport: &mut dyn Transport,
    ) -> Result<(), BalancerError> {
        // 1. Resolve endpoints.
        let nodes: Vec<(String, u32)> = if let Some(service_name) = &upstream.service_name {
            let discovered = self.discovery.nodes(service_name).await?;
            if discovered.is_empty() {
                return Err(BalancerError::NoValidNode(service_name.clone()));
            }
            discovered.into_iter().map(|n| (format!("{}:{}", n.host, n.port), n.weight)).collect()
        } else {
            if upstream.nodes.is_empty() {
                return Err(BalancerError::NoValidNode(upstream_key.to_string()));
            }
            upstream.nodes.iter().map(|(addr, weight)| (addr.clone(), *weight)).collect()
        };

        // 2. Per-cluster socket timeouts.
        if let Some(t) = &upstream.timeout {
            transport.set_timeouts(t.connect, t.send, t.read);
        }

        // 3. Fast path: single endpoint, no picker.
        if nodes.len() == 1 {
            let resolved = self.address_cache.resolve(&nodes[0].0, default_port(&upstream.scheme))?;
            ctx.balancer_ip = Some(resolved.host.clone());
            ctx.balancer_port = Some(resolved.port);
            ctx.balancer_try_count += 1;
            transport.set_current_peer(&resolved.host, resolved.port).map_err(BalancerError::SetPeerFailed)?;
            return Ok(());
        }

        let checker = upstream.checks.as_ref().map(|c| {
            self.checker_registry.get_or_create(upstream_key, c.active.clone(), c.passive.clone())
        });

        // 4. Retry accounting: report the previous attempt before picking again.
        ctx.balancer_try_count += 1;
        if ctx.balancer_try_count > 1 {
            if let (Some(checker), Some(host), Some(port)) = (&checker, &ctx.balancer_ip, ctx.balancer_port) {
                let key = EndpointKey::new(host.clone(), port, None);
                if let Some(failure) = transport.get_last_failure() {
                    match failure.status_code {
                        None => checker.report_tcp_failure(&key),
                        Some(504) => checker.report_timeout(&key),
                        Some(status) => checker.report_http_status(&key, status),
                    }
                    info!(upstream = %upstream_key, node = %key.addr(), try_count = ctx.balancer_try_count, "reported previous attempt outcome");
                }
            }
        }

        // 5. On the first attempt, configure the transport's retry budget.
        if ctx.balancer_try_count == 1 {
            let retries = upstream.effective_retries();
            if retries > 0 {
                transport.set_more_tries(retries);
            }
        }

        // 6. Obtain a picker from the registry, keyed by (upstream_key, version # status_ver).
        let status_ver = checker.as_ref().map(|c| c.status_ver()).unwrap_or(0);
        let version = upstream_version(upstream) ^ status_ver.wrapping_mul(0x9E3779B97F4A7C15);

        let eligible: Vec<(String, u32)> = match &checker {
            Some(checker) => {
                let host_port_pairs: Vec<(String, u16)> = nodes.iter().map(|(addr, _)| split_addr(addr)).collect();
                let subset = checker.healthy_subset(&host_port_pairs);
                let healthy_addrs: std::collections::HashSet<String> =
                    subset.into_iter().map(|(h, p)| format!("{h}:{p}")).collect();
                nodes.iter().filter(|(addr, _)| healthy_addrs.contains(addr)).cloned().collect()
            }
            None => nodes.clone(),
        };

        let picker_nodes: Vec<PickerNode> = eligible
            .iter()
            .map(|(addr, weight)| {
                let (host, port) = split_addr(addr);
                PickerNode { host, port, weight: *weight }
            })
            .collect();

        let picker = self.picker_registry.get_or_build(upstream_key, version, upstream.lb_type, upstream.chash_key(), picker_nodes)?;

        // 7. Ask the picker for an endpoint.
        let picked = picker.get(ctx)?;

        // 8. Resolve the endpoint string via the address cache.
        let resolved = self.address_cache.resolve(&picked.addr(), default_port(&upstream.scheme))?;

        // 9. Hand off to the transport.
        ctx.balancer_ip = Some(resolved.host.clone());
        ctx.balancer_port = Some(resolved.port);
        ctx.proxy_passed = true;
        transport.set_current_peer(&resolved.host, resolved.port).map_err(BalancerError::SetPeerFailed)?;

        Ok(())
    }
}

fn default_port(scheme: &str) -> u16 {
    if scheme == "https" { 443 } else { 80 }
}

fn split_addr(addr: &str) -> (String, u16) {
    match addr.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(0)),
        None => (addr.to_string(), 0),
    }
}

fn upstream_version(upstream: &Upstream) -> u64 {
    upstream.updated_at.map(|t| t.timestamp() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dispatch_core::route::HttpMethod;
    use dispatch_core::upstream::{LoadBalancerType, PassHostMode};
    use std::collections::HashMap;

    use crate::discovery::{DiscoveredNode, UninitializedDiscovery};
    use crate::transport::{FailureState, LastFailure};

    #[derive(Default)]
    struct TestTransport {
        peer: Option<(String, u16)>,
        more_tries: Option<u32>,
        failure: Option<LastFailure>,
    }

    impl Transport for TestTransport {
        fn set_timeouts(&mut self, _connect: f64, _send: f64, _read: f64) {}
        fn set_more_tries(&mut self, n: u32) {
            self.more_tries = Some(n);
        }
        fn set_current_peer(&mut self, host: &str, port: u16) -> Result<(), String> {
            self.peer = Some((host.to_string(), port));
            Ok(())
        }
        fn get_last_failure(&self) -> Option<LastFailure> {
            self.failure
        }
    }

    fn upstream(nodes: Vec<(&str, u32)>, lb_type: LoadBalancerType) -> Upstream {
        Upstream {
            id: "us1".into(),
            name: String::new(),
            description: String::new(),
            lb_type,
            key: None,
            nodes: nodes.into_iter().map(|(a, w)| (a.to_string(), w)).collect(),
            service_name: None,
            retries: None,
            retry_timeout: None,
            timeout: None,
            scheme: "http".into(),
            pass_host: PassHostMode::Pass,
            upstream_host: None,
            checks: None,
            labels: HashMap::new(),
            created_at: None,
            updated_at: None,
        }
    }

    fn route_store_with_one_route() -> Arc<RouteStore> {
        let store = Arc::new(RouteStore::new());
        store
            .add_route(Route {
                id: "r1".into(),
                name: String::new(),
                description: String::new(),
                uri: "/p".into(),
                uris: vec![],
                methods: vec![HttpMethod::Get],
                host: None,
                hosts: vec![],
                remote_addrs: vec![],
                vars: vec![],
                filter: None,
                priority: 0,
                enable: true,
                upstream: None,
                upstream_id: None,
                labels: HashMap::new(),
                status: 1,
                timeout: None,
                created_at: None,
                updated_at: None,
            })
            .unwrap();
        store
    }

    #[tokio::test]
    async fn single_node_cluster_takes_fast_path_without_a_picker() {
        let dispatcher = Dispatcher::new(route_store_with_one_route(), Arc::new(UninitializedDiscovery), &DispatchConfig::default());
        let up = upstream(vec![("10.0.0.1:80", 1)], LoadBalancerType::Roundrobin);
        let mut ctx = RequestContext::new("GET", "h", "/p", "10.0.0.2");
        let mut transport = TestTransport::default();

        dispatcher.run(&up, "us1", &mut ctx, &mut transport).await.unwrap();

        assert_eq!(ctx.balancer_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(ctx.balancer_port, Some(80));
        assert_eq!(ctx.balancer_try_count, 1);
        assert_eq!(transport.peer, Some(("10.0.0.1".to_string(), 80)));
    }

    #[tokio::test]
    async fn two_node_round_robin_alternates_across_fresh_contexts() {
        let dispatcher = Dispatcher::new(route_store_with_one_route(), Arc::new(UninitializedDiscovery), &DispatchConfig::default());
        let up = upstream(vec![("a:80", 1), ("b:80", 1)], LoadBalancerType::Roundrobin);

        let mut picks = Vec::new();
        for _ in 0..4 {
            let mut ctx = RequestContext::new("GET", "h", "/p", "10.0.0.2");
            let mut transport = TestTransport::default();
            dispatcher.run(&up, "us1", &mut ctx, &mut transport).await.unwrap();
            picks.push(ctx.balancer_ip.unwrap());
        }
        assert_eq!(picks, vec!["a", "b", "a", "b"]);
    }

    #[tokio::test]
    async fn retry_increments_try_count_and_reports_previous_failure_once() {
        let dispatcher = Dispatcher::new(route_store_with_one_route(), Arc::new(UninitializedDiscovery), &DispatchConfig::default());
        let mut up = upstream(vec![("a:80", 1), ("b:80", 1)], LoadBalancerType::Roundrobin);
        up.checks = Some(dispatch_core::upstream::HealthCheckConfig {
            active: None,
            passive: Some(dispatch_core::upstream::PassiveHealthCheck {
                healthy: dispatch_core::upstream::PassiveHealthyConfig { http_statuses: (200..=399).collect(), successes: 2 },
                unhealthy: dispatch_core::upstream::PassiveUnhealthyConfig { http_statuses: vec![500, 502, 503, 504], http_failures: 2, tcp_failures: 1, timeouts: 2 },
            }),
        });

        let mut ctx = RequestContext::new("GET", "h", "/p", "10.0.0.2");
        let mut transport = TestTransport::default();
        dispatcher.run(&up, "us1", &mut ctx, &mut transport).await.unwrap();
        assert_eq!(ctx.balancer_try_count, 1);
        let first_pick = ctx.balancer_ip.clone().unwrap();

        transport.failure = Some(LastFailure { state: FailureState::Next, status_code: None });
        dispatcher.run(&up, "us1", &mut ctx, &mut transport).await.unwrap();
        assert_eq!(ctx.balancer_try_count, 2);
        let second_pick = ctx.balancer_ip.clone().unwrap();
        assert_ne!(first_pick, second_pick, "failed node's single TCP failure should not yet evict it, but round robin still alternates");
    }

    #[tokio::test]
    async fn no_nodes_and_no_service_name_is_no_valid_node() {
        let dispatcher = Dispatcher::new(route_store_with_one_route(), Arc::new(UninitializedDiscovery), &DispatchConfig::default());
        let up = upstream(vec![], LoadBalancerType::Roundrobin);
        let mut ctx = RequestContext::new("GET", "h", "/p", "10.0.0.2");
        let mut transport = TestTransport::default();

        let err = dispatcher.run(&up, "us1", &mut ctx, &mut transport).await.unwrap_err();
        assert!(matches!(err, BalancerError::NoValidNode(_)));
    }

    #[tokio::test]
    async fn service_name_without_discovery_fails_with_uninitialized() {
        let dispatcher = Dispatcher::new(route_store_with_one_route(), Arc::new(UninitializedDiscovery), &DispatchConfig::default());
        let mut up = upstream(vec![], LoadBalancerType::Roundrobin);
        up.service_name = Some("payments".into());
        let mut ctx = RequestContext::new("GET", "h", "/p", "10.0.0.2");
        let mut transport = TestTransport::default();

        let err = dispatcher.run(&up, "us1", &mut ctx, &mut transport).await.unwrap_err();
        assert!(matches!(err, BalancerError::DiscoveryUninitialized(_)));
    }

    #[tokio::test]
    async fn service_name_resolves_through_discovery_oracle() {
        struct FakeOracle;
        #[async_trait]
        impl DiscoveryOracle for FakeOracle {
            async fn nodes(&self, _service_name: &str) -> Result<Vec<DiscoveredNode>, BalancerError> {
                Ok(vec![DiscoveredNode { host: "10.1.1.1".into(), port: 9000, weight: 1 }])
            }
        }

        let dispatcher = Dispatcher::new(route_store_with_one_route(), Arc::new(FakeOracle), &DispatchConfig::default());
        let mut up = upstream(vec![], LoadBalancerType::Roundrobin);
        up.service_name = Some("payments".into());
        let mut ctx = RequestContext::new("GET", "h", "/p", "10.0.0.2");
        let mut transport = TestTransport::default();

        dispatcher.run(&up, "us1", &mut ctx, &mut transport).await.unwrap();
        assert_eq!(ctx.balancer_ip.as_deref(), Some("10.1.1.1"));
        assert_eq!(ctx.balancer_port, Some(9000));
    }

    #[tokio::test]
    async fn match_route_sets_matched_route_on_context() {
        let dispatcher = Dispatcher::new(route_store_with_one_route(), Arc::new(UninitializedDiscovery), &DispatchConfig::default());
        let mut ctx = RequestContext::new("GET", "h", "/p", "10.0.0.2");
        let route = dispatcher.match_route(&mut ctx).unwrap();
        assert_eq!(route.id, "r1");
        assert_eq!(ctx.matched_route.as_deref(), Some("r1"));
    }
}
