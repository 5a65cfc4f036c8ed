use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

/// Single process-wide slot holding the latest uploaded performance.
///
/// The payload is opaque; it is replaced wholesale on every store and never
/// cleared. Readers get a shared `Arc`, so a replay never copies the document.
#[derive(Debug, Default)]
pub struct PerformanceCache {
    slot: RwLock<Option<Arc<Value>>>,
}

impl PerformanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached payload
    pub async fn store(&self, payload: Value) -> Arc<Value> {
        let payload = Arc::new(payload);
        *self.slot.write().await = Some(payload.clone());
        payload
    }

    pub async fn current_or_absent(&self) -> Option<Arc<Value>> {
        self.slot.read().await.clone()
    }

    pub async fn is_cached(&self) -> bool {
        self.slot.read().await.is_some()
    }

    /// Replace the cached payload and run `f` before any reader can observe the slot.
    ///
    /// Paired with [`with_current`](Self::with_current), this lets an upload's
    /// broadcast and a new connection's replay exclude each other.
    pub async fn publish<F, R>(&self, payload: Value, f: F) -> R
    where
        F: FnOnce(&Arc<Value>) -> R,
    {
        let mut slot = self.slot.write().await;
        let payload = Arc::new(payload);
        *slot = Some(payload.clone());
        f(&payload)
    }

    /// Run `f` with the current payload while holding off concurrent publishes
    pub async fn with_current<F, R>(&self, f: F) -> R
    where
        F: FnOnce(Option<&Arc<Value>>) -> R,
    {
        let slot = self.slot.read().await;
        f(slot.as_ref())
    }
}
