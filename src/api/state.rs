//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::time::Instant;

use crate::realtime::{Hub, Publisher};

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Realtime hub clients are registered with
    pub hub: Hub,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(hub: Hub) -> Self {
        Self {
            hub,
            start_time: Instant::now(),
        }
    }

    /// Publish handle for request handlers that announce changes
    pub fn publisher(&self) -> Publisher {
        self.hub.publisher()
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get WebSocket connection count
    pub async fn ws_connection_count(&self) -> usize {
        self.hub.connection_count().await
    }
}
