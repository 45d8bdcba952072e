use async_trait::async_trait;

use crate::error::BalancerError;

/// One endpoint as reported by a discovery oracle.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredNode {
    pub host: String,
    pub port: u16,
    pub weight: u32,
}

/// External service-discovery collaborator. No concrete resolver (DNS SRV,
/// etcd, Kubernetes endpoints, …) ships with this crate — discovery storage
/// and its watch semantics are out of scope; this trait is only the
/// boundary the dispatcher calls through.
#[async_trait]
pub trait DiscoveryOracle: Send + Sync {
    async fn nodes(&self, service_name: &str) -> Result<Vec<DiscoveredNode>, BalancerError>;
}

/// A discovery oracle that never resolves anything, for upstreams that are
/// statically configured. Looking up any `service_name` against it is a
/// caller error — see [`BalancerError::DiscoveryUninitialized`].
pub struct UninitializedDiscovery;

#[async_trait]
impl DiscoveryOracle for UninitializedDiscovery {
    async fn nodes(&self, service_name: &str) -> Result<Vec<DiscoveredNode>, BalancerError> {
        Err(BalancerError::DiscoveryUninitialized(service_name.to_string()))
    }
}
