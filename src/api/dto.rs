//! Data Transfer Objects
//!
//! Response types for the API endpoints.

use serde::Serialize;

use crate::realtime::{HubConfig, HubStats};

// ============================================
// HEALTH DTOs
// ============================================

/// Full health status response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: healthy or degraded
    pub status: String,
    /// Hub status: running or stopped
    pub hub: String,
    /// Hub counters and subscriber count
    pub stats: HubStats,
    /// Queue bound, deadlines and connection limit in effect
    pub limits: HubConfig,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}
