pub mod identity;
pub mod metrics;

pub use identity::{Caller, Role};
pub use metrics::http_metrics_middleware;
