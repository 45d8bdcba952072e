pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod route;
pub mod router;
pub mod trie;
pub mod upstream;
pub mod vars;

pub use config::DispatchConfig;
pub use context::RequestContext;
pub use error::DispatchError;
pub use route::Route;
pub use router::RouteStore;
pub use upstream::Upstream;
