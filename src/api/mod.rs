//! API layer - HTTP endpoint handlers.

mod health;
mod metrics;
mod routes;

pub use health::{health, root, stats, ROOT_MESSAGE};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
