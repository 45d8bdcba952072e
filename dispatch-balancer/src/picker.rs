use std::collections::HashMap;
use std::sync::Mutex;

use dispatch_core::context::RequestContext;

use crate::error::BalancerError;

/// One weighted backend node as seen by a picker.
#[derive(Debug, Clone, PartialEq)]
pub struct PickerNode {
    pub host: String,
    pub port: u16,
    pub weight: u32,
}

impl PickerNode {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Picks one node out of the healthy subset for a request. Implementations
/// are rebuilt (not mutated across versions) whenever the upstream's node
/// list or health status changes.
pub trait Picker: Send + Sync {
    fn get(&self, ctx: &RequestContext) -> Result<PickerNode, BalancerError>;
}

/// Smooth weighted round robin using nginx's interleaved `current_weight`
/// algorithm: each call picks the node with the highest `current_weight`,
/// then reduces it by the sum of all weights; every node's `current_weight`
/// is bumped by its own weight first. This spreads picks proportionally to
/// weight without bursting all picks for the heaviest node together.
pub struct RoundRobinPicker {
    state: Mutex<Vec<(PickerNode, i64)>>,
}

impl RoundRobinPicker {
    pub fn new(nodes: Vec<PickerNode>) -> Self {
        let state = nodes.into_iter().map(|n| (n, 0i64)).collect();
        Self { state: Mutex::new(state) }
    }
}

impl Picker for RoundRobinPicker {
    fn get(&self, _ctx: &RequestContext) -> Result<PickerNode, BalancerError> {
        let mut state = self.state.lock().unwrap();
        if state.is_empty() {
            return Err(BalancerError::PickerExhausted);
        }
        let total: i64 = state.iter().map(|(n, _)| n.weight as i64).sum();
        for (node, current) in state.iter_mut() {
            *current += node.weight as i64;
        }
        // First index wins a tie, matching nginx's `current_weight` picker:
        // `Iterator::max_by_key` keeps the *last* max, which would pick
        // nodes in the wrong order whenever two current_weights are equal.
        let mut best_idx = 0;
        let mut best_weight = i64::MIN;
        for (i, (_, current)) in state.iter().enumerate() {
            if *current > best_weight {
                best_weight = *current;
                best_idx = i;
            }
        }
        state[best_idx].1 -= total;
        Ok(state[best_idx].0.clone())
    }
}

/// Consistent hash with virtual nodes. The hash key is resolved from the
/// request context via the configured variable name (default `remote_addr`).
pub struct ConsistentHashPicker {
    key_var: String,
    ring: Vec<(u64, usize)>,
    nodes: Vec<PickerNode>,
}

const VIRTUAL_NODES_PER_WEIGHT: u32 = 40;

impl ConsistentHashPicker {
    pub fn new(key_var: impl Into<String>, nodes: Vec<PickerNode>) -> Self {
        let mut ring = Vec::new();
        for (idx, node) in nodes.iter().enumerate() {
            let replicas = (node.weight.max(1)) * VIRTUAL_NODES_PER_WEIGHT;
            for r in 0..replicas {
                let h = fnv1a(format!("{}#{r}", node.addr()).as_bytes());
                ring.push((h, idx));
            }
        }
        ring.sort_unstable_by_key(|(h, _)| *h);
        Self { key_var: key_var.into(), ring, nodes }
    }
}

impl Picker for ConsistentHashPicker {
    fn get(&self, ctx: &RequestContext) -> Result<PickerNode, BalancerError> {
        if self.nodes.is_empty() {
            return Err(BalancerError::PickerExhausted);
        }
        let key = ctx.get_var_str(&self.key_var).unwrap_or_default();
        let h = fnv1a(key.as_bytes());
        let pos = self.ring.partition_point(|(node_hash, _)| *node_hash < h);
        let (_, idx) = self.ring.get(pos).or_else(|| self.ring.first()).ok_or(BalancerError::PickerExhausted)?;
        Ok(self.nodes[*idx].clone())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Per-node latency/inflight bookkeeping an EWMA picker uses to score nodes:
/// `score = ewma_latency_ms * (inflight + 1)`, lower wins, weight breaks ties.
#[derive(Debug, Default, Clone, Copy)]
pub struct EwmaStats {
    pub ewma_latency_ms: f64,
    pub inflight: u32,
}

pub struct EwmaPicker {
    nodes: Vec<PickerNode>,
    stats: Mutex<HashMap<String, EwmaStats>>,
}

impl EwmaPicker {
    pub fn new(nodes: Vec<PickerNode>) -> Self {
        Self { nodes, stats: Mutex::new(HashMap::new()) }
    }

    /// Report a completed request's observed latency, feeding the moving
    /// average with smoothing factor 0.3 (more weight on recent samples).
    pub fn report_latency(&self, addr: &str, latency_ms: f64) {
        const ALPHA: f64 = 0.3;
        let mut stats = self.stats.lock().unwrap();
        let entry = stats.entry(addr.to_string()).or_default();
        entry.ewma_latency_ms = if entry.ewma_latency_ms == 0.0 {
            latency_ms
        } else {
            ALPHA * latency_ms + (1.0 - ALPHA) * entry.ewma_latency_ms
        };
    }

    pub fn inc_inflight(&self, addr: &str) {
        self.stats.lock().unwrap().entry(addr.to_string()).or_default().inflight += 1;
    }

    pub fn dec_inflight(&self, addr: &str) {
        if let Some(s) = self.stats.lock().unwrap().get_mut(addr) {
            s.inflight = s.inflight.saturating_sub(1);
        }
    }
}

impl Picker for EwmaPicker {
    fn get(&self, _ctx: &RequestContext) -> Result<PickerNode, BalancerError> {
        if self.nodes.is_empty() {
            return Err(BalancerError::PickerExhausted);
        }
        let stats = self.stats.lock().unwrap();
        let best = self
            .nodes
            .iter()
            .min_by(|a, b| {
                let score = |n: &PickerNode| {
                    let s = stats.get(&n.addr()).copied().unwrap_or_default();
                    s.ewma_latency_ms * (s.inflight as f64 + 1.0)
                };
                score(a)
                    .partial_cmp(&score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.weight.cmp(&a.weight))
            })
            .unwrap();
        Ok(best.clone())
    }
}
