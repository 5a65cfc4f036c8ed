//! Registry statistics

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    /// Live connections
    pub total: usize,
    /// Index the next connection will be given
    pub next_index: u64,
}
