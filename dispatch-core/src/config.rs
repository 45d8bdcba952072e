use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the dispatch core, layered from a YAML file
/// and environment overrides (`DISPATCH_*`), following the teacher's
/// figment-based config loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub balancer: BalancerConfig,
}

/// Sizing for the three bounded caches (SPEC_FULL.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_picker_cache_capacity")]
    pub picker_cache_capacity: usize,
    #[serde(default = "default_checker_cache_capacity")]
    pub checker_cache_capacity: usize,
    #[serde(default = "default_address_cache_capacity")]
    pub address_cache_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            picker_cache_capacity: default_picker_cache_capacity(),
            checker_cache_capacity: default_checker_cache_capacity(),
            address_cache_capacity: default_address_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BalancerConfig {
    /// Default retry count when an upstream leaves `retries` unset; `None`
    /// means fall back to `len(nodes) - 1` as specified.
    #[serde(default)]
    pub default_retries: Option<u32>,
}

fn default_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_picker_cache_capacity() -> usize {
    256
}
fn default_checker_cache_capacity() -> usize {
    256
}
fn default_address_cache_capacity() -> usize {
    4096
}

impl DispatchConfig {
    /// Load configuration from `path` (YAML) layered with `DISPATCH_`-prefixed
    /// environment variables, the latter taking precedence.
    pub fn load(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("DISPATCH_").split("_"))
            .extract()
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            cache: CacheConfig::default(),
            balancer: BalancerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_budget() {
        let cfg = DispatchConfig::default();
        assert_eq!(cfg.cache.ttl_secs, 300);
        assert_eq!(cfg.cache.picker_cache_capacity, 256);
        assert_eq!(cfg.cache.checker_cache_capacity, 256);
        assert_eq!(cfg.cache.address_cache_capacity, 4096);
    }

    #[test]
    fn env_override_takes_precedence() {
        // SAFETY: test-local env var, not shared with other tests' assertions.
        unsafe {
            std::env::set_var("DISPATCH_CACHE_TTL_SECS", "60");
        }
        let cfg: DispatchConfig = Figment::new()
            .merge(Env::prefixed("DISPATCH_").split("_"))
            .join(figment::providers::Serialized::defaults(DispatchConfig::default()))
            .extract()
            .unwrap();
        assert_eq!(cfg.cache.ttl_secs, 60);
        unsafe {
            std::env::remove_var("DISPATCH_CACHE_TTL_SECS");
        }
    }
}
