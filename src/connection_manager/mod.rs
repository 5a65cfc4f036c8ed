mod registry;
mod stats;
mod types;

pub use registry::ConnectionRegistry;
pub use stats::RegistryStats;
pub use types::{ConnectionHandle, Registration, Unregistration};
