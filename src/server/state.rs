use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::connection_manager::ConnectionRegistry;
use crate::relay::{PerformanceCache, RelayDispatcher};
use crate::session::SessionController;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<RelayDispatcher>,
    pub cache: Arc<PerformanceCache>,
    pub controller: Arc<SessionController>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(RelayDispatcher::new(registry.clone()));
        let cache = Arc::new(PerformanceCache::new());
        let controller = Arc::new(SessionController::new(
            registry.clone(),
            dispatcher.clone(),
            cache.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            registry,
            dispatcher,
            cache,
            controller,
            started_at: Instant::now(),
        }
    }
}
