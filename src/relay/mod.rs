//! Fan-out and last-value cache for performance data.

mod cache;
mod dispatcher;

pub use cache::PerformanceCache;
pub use dispatcher::{DeliveryResult, DispatcherStatsSnapshot, RelayDispatcher};
