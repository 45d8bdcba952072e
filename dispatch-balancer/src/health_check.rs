use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dispatch_core::cache::TtlLru;
use dispatch_core::upstream::{ActiveHealthCheck, PassiveHealthCheck};
use tokio::time::interval;
use tracing::{info, warn};

/// Fingerprint identifying one probed endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub host: String,
    pub port: u16,
    pub hostname: Option<String>,
}

impl EndpointKey {
    pub fn new(host: impl Into<String>, port: u16, hostname: Option<String>) -> Self {
        Self { host: host.into(), port, hostname }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The four-state health machine from SPEC_FULL.md §4.3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    MostlyHealthy,
    MostlyUnhealthy,
    Unhealthy,
}

impl HealthState {
    /// `get_target_status`: true iff the state counts as eligible for picking.
    pub fn is_target_healthy(self) -> bool {
        matches!(self, HealthState::Healthy | HealthState::MostlyHealthy)
    }
}

#[derive(Debug, Clone)]
struct EndpointRecord {
    state: HealthState,
    success_count: u32,
    fail_count: u32,
}

impl Default for EndpointRecord {
    fn default() -> Self {
        Self { state: HealthState::Healthy, success_count: 0, fail_count: 0 }
    }
}

impl EndpointRecord {
    /// Apply a success observation. `healthy_successes` is the threshold to
    /// cross from `mostly_unhealthy` back to `healthy`. Returns whether the
    /// target-status predicate flipped (§4.3.1: only flips bump `status_ver`).
    fn on_success(&mut self, healthy_successes: u32) -> bool {
        let before = self.state.is_target_healthy();
        self.state = match self.state {
            HealthState::Healthy => {
                self.fail_count = 0;
                HealthState::Healthy
            }
            HealthState::MostlyHealthy => {
                self.success_count = 0;
                self.fail_count = 0;
                HealthState::Healthy
            }
            HealthState::Unhealthy => {
                self.success_count = 1;
                HealthState::MostlyUnhealthy
            }
            HealthState::MostlyUnhealthy => {
                self.success_count += 1;
                if self.success_count >= healthy_successes.max(1) {
                    self.success_count = 0;
                    HealthState::Healthy
                } else {
                    HealthState::MostlyUnhealthy
                }
            }
        };
        before != self.state.is_target_healthy()
    }

    /// Apply a failure observation. `unhealthy_failures` is the threshold to
    /// cross from `mostly_healthy` to `unhealthy`.
    fn on_failure(&mut self, unhealthy_failures: u32) -> bool {
        let before = self.state.is_target_healthy();
        self.state = match self.state {
            HealthState::Unhealthy => {
                self.fail_count = 0;
                HealthState::Unhealthy
            }
            HealthState::MostlyUnhealthy => {
                self.success_count = 0;
                self.fail_count = 0;
                HealthState::Unhealthy
            }
            HealthState::Healthy => {
                self.fail_count = 1;
                HealthState::MostlyHealthy
            }
            HealthState::MostlyHealthy => {
                self.fail_count += 1;
                if self.fail_count >= unhealthy_failures.max(1) {
                    self.fail_count = 0;
                    HealthState::Unhealthy
                } else {
                    HealthState::MostlyHealthy
                }
            }
        };
        before != self.state.is_target_healthy()
    }
}

/// Per-process shared view of endpoint health. A single in-process,
/// `DashMap`-backed implementation is provided (`LocalHealthRegion`); a
/// multi-process deployment can supply an mmap-backed implementation
/// without the checker itself changing (SPEC_FULL.md §4.3.2).
pub trait SharedHealthRegion: Send + Sync {
    fn get(&self, key: &EndpointKey) -> Option<HealthState>;
    fn record_success(&self, key: &EndpointKey, threshold: u32) -> bool;
    fn record_failure(&self, key: &EndpointKey, threshold: u32) -> bool;
}

#[derive(Default)]
pub struct LocalHealthRegion {
    records: DashMap<EndpointKey, EndpointRecord>,
}

impl SharedHealthRegion for LocalHealthRegion {
    fn get(&self, key: &EndpointKey) -> Option<HealthState> {
        self.records.get(key).map(|r| r.state)
    }

    fn record_success(&self, key: &EndpointKey, threshold: u32) -> bool {
        self.records.entry(key.clone()).or_default().on_success(threshold)
    }

    fn record_failure(&self, key: &EndpointKey, threshold: u32) -> bool {
        self.records.entry(key.clone()).or_default().on_failure(threshold)
    }
}

/// Executes one active probe against an endpoint. Kept as a trait so the
/// health checker does not depend on any particular HTTP client or
/// transport — those are assumed external collaborators.
#[async_trait]
pub trait ActiveProber: Send + Sync {
    async fn probe(&self, key: &EndpointKey, config: &ActiveHealthCheck) -> bool;
}

/// Health checker for a single upstream cluster: owns the shared health
/// region, the active/passive thresholds, and a version counter bumped on
/// every target-status flip so the balancer can invalidate its picker cache.
pub struct HealthChecker {
    region: Arc<dyn SharedHealthRegion>,
    active: Option<ActiveHealthCheck>,
    passive: Option<PassiveHealthCheck>,
    status_ver: AtomicU64,
    probe_handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HealthChecker {
    pub fn new(active: Option<ActiveHealthCheck>, passive: Option<PassiveHealthCheck>) -> Self {
        Self {
            region: Arc::new(LocalHealthRegion::default()),
            active,
            passive,
            status_ver: AtomicU64::new(0),
            probe_handle: std::sync::Mutex::new(None),
        }
    }

    pub fn status_ver(&self) -> u64 {
        self.status_ver.load(Ordering::Acquire)
    }

    fn bump_if(&self, flipped: bool) {
        if flipped {
            self.status_ver.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn get_target_status(&self, key: &EndpointKey) -> bool {
        self.region.get(key).map(|s| s.is_target_healthy()).unwrap_or(true)
    }

    /// Passive report: previous attempt timed out.
    pub fn report_timeout(&self, key: &EndpointKey) {
        let threshold = self.passive.as_ref().map(|p| p.unhealthy.timeouts).unwrap_or(7);
        let flipped = self.region.record_failure(key, threshold);
        self.bump_if(flipped);
    }

    /// Passive report: previous attempt failed the TCP exchange.
    pub fn report_tcp_failure(&self, key: &EndpointKey) {
        let threshold = self.passive.as_ref().map(|p| p.unhealthy.tcp_failures).unwrap_or(2);
        let flipped = self.region.record_failure(key, threshold);
        self.bump_if(flipped);
    }

    /// Passive report: previous attempt completed with `status`.
    pub fn report_http_status(&self, key: &EndpointKey, status: u16) {
        let Some(passive) = &self.passive else { return };
        let flipped = if passive.healthy.http_statuses.contains(&status) {
            self.region.record_success(key, passive.healthy.successes)
        } else if passive.unhealthy.http_statuses.contains(&status) {
            self.region.record_failure(key, passive.unhealthy.http_failures)
        } else {
            false
        };
        self.bump_if(flipped);
    }

    /// Returns the subset of `nodes` currently considered healthy, falling
    /// back to the full set when the subset would otherwise be empty
    /// (SPEC_FULL.md §4.3, healthy-subset-with-fallback rule). If no active
    /// or passive config exists, all nodes are eligible.
    pub fn healthy_subset<'a>(&self, nodes: &'a [(String, u16)]) -> Vec<&'a (String, u16)> {
        if self.active.is_none() && self.passive.is_none() {
            return nodes.iter().collect();
        }
        let healthy: Vec<&(String, u16)> = nodes
            .iter()
            .filter(|(host, port)| self.get_target_status(&EndpointKey::new(host.clone(), *port, None)))
            .collect();
        if healthy.is_empty() { nodes.iter().collect() } else { healthy }
    }

    /// Start the active probe loop against `nodes`, driving the same state
    /// machine `report_*` feeds. No-op if no `active` config is set.
    pub fn spawn_active_checks(self: &Arc<Self>, upstream_key: String, nodes: Vec<(String, u16)>, prober: Arc<dyn ActiveProber>) {
        let Some(config) = self.active.clone() else { return };
        let checker = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(config.interval));
            loop {
                tick.tick().await;
                for (host, port) in &nodes {
                    let key = EndpointKey::new(host.clone(), *port, None);
                    let healthy = prober.probe(&key, &config).await;
                    let flipped = if healthy {
                        checker.region.record_success(&key, config.healthy_successes)
                    } else {
                        checker.region.record_failure(&key, config.unhealthy_failures)
                    };
                    if flipped {
                        let now_healthy = checker.get_target_status(&key);
                        if now_healthy {
                            info!(upstream = %upstream_key, node = %key.addr(), "node recovered");
                        } else {
                            warn!(upstream = %upstream_key, node = %key.addr(), "node marked unhealthy");
                        }
                        checker.status_ver.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
        });

        *self.probe_handle.lock().unwrap() = Some(handle);
    }

    /// Stop the active probe loop; cleanup handler invoked on cache eviction.
    pub fn stop(&self) {
        if let Some(handle) = self.probe_handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bounded TTL+LRU cache of checkers, one per upstream cluster, keyed
/// `"upstream#" + parent_key` per SPEC_FULL.md §4.5 (same capacity/TTL shape
/// as the picker and address caches). Capacity or TTL eviction drops the
/// registry's `Arc<HealthChecker>`; once no other owner is holding it,
/// `HealthChecker`'s `Drop` stops its active-probe task, so evicting from
/// this cache is what retires a checker's background work.
pub struct HealthCheckerRegistry {
    cache: TtlLru<String, Arc<HealthChecker>>,
}

impl HealthCheckerRegistry {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { cache: TtlLru::new(capacity, ttl) }
    }

    pub fn get_or_create(
        &self,
        upstream_key: &str,
        active: Option<ActiveHealthCheck>,
        passive: Option<PassiveHealthCheck>,
    ) -> Arc<HealthChecker> {
        let key = format!("upstream#{upstream_key}");
        self.cache.get_or_insert_with(key, 0, || Arc::new(HealthChecker::new(active, passive)))
    }

    pub fn get(&self, upstream_key: &str) -> Option<Arc<HealthChecker>> {
        self.cache.get(&format!("upstream#{upstream_key}"), 0)
    }

    /// Evict and stop the checker for `upstream_key` ahead of its natural
    /// TTL/capacity eviction, e.g. when an upstream is deleted outright.
    pub fn evict(&self, upstream_key: &str) {
        if let Some(checker) = self.cache.remove(&format!("upstream#{upstream_key}")) {
            checker.stop();
        }
    }
}
