use std::sync::Arc;
use std::time::Duration;

use dispatch_core::upstream::LoadBalancerType;
use dispatch_core::cache::TtlLru;

use crate::error::BalancerError;
use crate::picker::{ConsistentHashPicker, EwmaPicker, Picker, PickerNode, RoundRobinPicker};

/// Caches one picker per `(upstream_key, version)`, where `version` folds in
/// both the upstream's own config version and the health checker's
/// `status_ver` so a node flipping healthy/unhealthy invalidates the picker
/// without touching the upstream's edit history (SPEC_FULL.md §4.5, §8
/// property 5).
pub struct PickerRegistry {
    cache: TtlLru<String, Arc<dyn Picker>>,
}

impl PickerRegistry {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { cache: TtlLru::new(capacity, ttl) }
    }

    pub fn get_or_build(
        &self,
        upstream_key: &str,
        version: u64,
        lb_type: LoadBalancerType,
        chash_key: &str,
        nodes: Vec<PickerNode>,
    ) -> Result<Arc<dyn Picker>, BalancerError> {
        if nodes.is_empty() {
            return Err(BalancerError::NoValidNode(upstream_key.to_string()));
        }
        if lb_type == LoadBalancerType::Unknown {
            return Err(BalancerError::InvalidBalancerType(upstream_key.to_string()));
        }
        Ok(self.cache.get_or_insert_with(upstream_key.to_string(), version, || build_picker(lb_type, chash_key, nodes)))
    }
}

fn build_picker(lb_type: LoadBalancerType, chash_key: &str, nodes: Vec<PickerNode>) -> Arc<dyn Picker> {
    match lb_type {
        LoadBalancerType::Roundrobin => Arc::new(RoundRobinPicker::new(nodes)),
        LoadBalancerType::Chash => Arc::new(ConsistentHashPicker::new(chash_key.to_string(), nodes)),
        LoadBalancerType::Ewma => Arc::new(EwmaPicker::new(nodes)),
        LoadBalancerType::Unknown => unreachable!("caller rejects Unknown before reaching the cache"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::context::RequestContext;

    fn nodes() -> Vec<PickerNode> {
        vec![PickerNode { host: "a".into(), port: 80, weight: 1 }]
    }

    #[test]
    fn same_version_returns_cached_picker_instance() {
        let registry = PickerRegistry::new(8, Duration::from_secs(300));
        let p1 = registry.get_or_build("us1", 1, LoadBalancerType::Roundrobin, "remote_addr", nodes()).unwrap();
        let p2 = registry.get_or_build("us1", 1, LoadBalancerType::Roundrobin, "remote_addr", nodes()).unwrap();
        assert!(Arc::ptr_eq(&p1, &p2));
    }

    #[test]
    fn version_bump_rebuilds_picker() {
        let registry = PickerRegistry::new(8, Duration::from_secs(300));
        let p1 = registry.get_or_build("us1", 1, LoadBalancerType::Roundrobin, "remote_addr", nodes()).unwrap();
        let p2 = registry.get_or_build("us1", 2, LoadBalancerType::Roundrobin, "remote_addr", nodes()).unwrap();
        assert!(!Arc::ptr_eq(&p1, &p2));
    }

    #[test]
    fn empty_node_list_is_an_error_not_a_cached_empty_picker() {
        let registry = PickerRegistry::new(8, Duration::from_secs(300));
        let err = registry.get_or_build("us1", 1, LoadBalancerType::Roundrobin, "remote_addr", vec![]).unwrap_err();
        assert!(matches!(err, BalancerError::NoValidNode(_)));
    }

    #[test]
    fn unknown_balancer_type_is_an_error_not_a_panic() {
        let registry = PickerRegistry::new(8, Duration::from_secs(300));
        let err = registry.get_or_build("us1", 1, LoadBalancerType::Unknown, "remote_addr", nodes()).unwrap_err();
        assert!(matches!(err, BalancerError::InvalidBalancerType(_)));
    }

    #[test]
    fn built_picker_is_usable() {
        let registry = PickerRegistry::new(8, Duration::from_secs(300));
        let picker = registry.get_or_build("us1", 1, LoadBalancerType::Roundrobin, "remote_addr", nodes()).unwrap();
        let ctx = RequestContext::new("GET", "h", "/p", "10.0.0.1");
        assert_eq!(picker.get(&ctx).unwrap().host, "a");
    }
}
