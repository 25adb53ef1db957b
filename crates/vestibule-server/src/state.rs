use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::lifecycle::RoomLifecycle;
use crate::notify::ConnectionRegistry;

/// Shared handles for every request and connection task.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: RoomLifecycle,
    pub registry: ConnectionRegistry,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let config = Arc::new(config);
        let registry = ConnectionRegistry::default();
        // The registry doubles as the notifier: store cascades deliver
        // frames through it without knowing about sockets.
        let lifecycle = RoomLifecycle::new(Arc::clone(&config), Arc::new(registry.clone()));
        Self {
            lifecycle,
            registry,
            config,
            started_at: Instant::now(),
        }
    }
}
