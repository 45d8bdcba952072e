use std::time::Duration;

use dispatch_core::cache::TtlLru;

use crate::error::BalancerError;

/// A resolved `host:port` endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAddress {
    pub host: String,
    pub port: u16,
}

/// Caches the `host:port` parse of an endpoint string (SPEC_FULL.md §4.5:
/// ttl 300s, capacity 4096, keyed by the endpoint string itself — there is
/// no version dimension here since the string fully determines the result).
pub struct AddressCache {
    cache: TtlLru<String, ResolvedAddress>,
}

const FIXED_VERSION: u64 = 0;

impl AddressCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { cache: TtlLru::new(capacity, ttl) }
    }

    pub fn resolve(&self, endpoint: &str, default_port: u16) -> Result<ResolvedAddress, BalancerError> {
        if let Some(hit) = self.cache.get(&endpoint.to_string(), FIXED_VERSION) {
            return Ok(hit);
        }
        let resolved = parse_endpoint(endpoint, default_port)?;
        self.cache.insert(endpoint.to_string(), FIXED_VERSION, resolved.clone());
        Ok(resolved)
    }
}

fn parse_endpoint(endpoint: &str, default_port: u16) -> Result<ResolvedAddress, BalancerError> {
    match endpoint.rsplit_once(':') {
        Some((host, port_str)) if !host.is_empty() => {
            let port: u16 = port_str
                .parse()
                .map_err(|_| BalancerError::AddressParseFailed(endpoint.to_string(), "invalid port".to_string()))?;
            Ok(ResolvedAddress { host: host.to_string(), port })
        }
        _ if !endpoint.is_empty() => Ok(ResolvedAddress { host: endpoint.to_string(), port: default_port }),
        _ => Err(BalancerError::AddressParseFailed(endpoint.to_string(), "empty endpoint".to_string())),
    }
}
