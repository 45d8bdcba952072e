use thiserror::Error;

/// Unified error type for the route-matching side of the dispatch core.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("route not found: {0}")]
    RouteNotFound(String),

    /// A route's `filter` failed to evaluate (e.g. a malformed regex operand).
    /// Non-fatal: the offending route is skipped during rebuild, others remain usable.
    #[error("predicate error on route {route_id}: {message}")]
    PredicateError { route_id: String, message: String },

    #[error("invalid path pattern {0:?}: {1}")]
    InvalidPattern(String, String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl DispatchError {
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::RouteNotFound(_) => 404,
            DispatchError::PredicateError { .. } => 500,
            DispatchError::InvalidPattern(_, _) => 500,
            DispatchError::Serde(_) => 500,
        }
    }

    pub fn to_json_body(&self) -> Vec<u8> {
        let status = self.status_code();
        let msg = self.to_string();
        format!(r#"{{"error":"{}","status":{}}}"#, msg, status).into_bytes()
    }
}
