use thiserror::Error;

/// Errors the balancer/dispatcher can surface to the request path. All map
/// to a 502 per SPEC_FULL.md §7 — the dispatcher never retries on its own,
/// it only reports why the previous attempt can't continue.
///
/// Passive health signals (`report_timeout`, `report_tcp_failure`,
/// `report_http_status`) are deliberately NOT part of this enum: they are
/// not errors in the request path, just plain method calls on
/// [`crate::health_check::HealthChecker`].
#[derive(Error, Debug)]
pub enum BalancerError {
    #[error("discovery is uninitialized for {0}")]
    DiscoveryUninitialized(String),

    #[error("no valid upstream node for {0}")]
    NoValidNode(String),

    #[error("invalid balancer type: {0}")]
    InvalidBalancerType(String),

    #[error("failed to find valid upstream server")]
    PickerExhausted,

    #[error("failed to set current peer: {0}")]
    SetPeerFailed(String),

    #[error("failed to resolve address {0}: {1}")]
    AddressParseFailed(String, String),

    #[error("discovery error: {0}")]
    Discovery(String),
}

impl BalancerError {
    pub fn status_code(&self) -> u16 {
        502
    }
}
