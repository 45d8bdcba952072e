pub mod address_cache;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod health_check;
pub mod picker;
pub mod picker_registry;
pub mod transport;

pub use dispatcher::Dispatcher;
pub use error::BalancerError;
pub use health_check::{HealthChecker, HealthCheckerRegistry};
pub use picker::{Picker, PickerNode};
