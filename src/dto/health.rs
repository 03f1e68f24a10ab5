use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Whether the storage backend answered its last health probe.
    pub storage_reachable: bool,
    /// Open audience connections, authenticated or not.
    pub live_connections: usize,
    /// Authenticated connections receiving broadcasts.
    pub audience_size: usize,
}

impl HealthResponse {
    /// Build a response from the listener health flag and connection counters.
    pub fn new(
        healthy: bool,
        storage_reachable: bool,
        live_connections: usize,
        audience_size: usize,
    ) -> Self {
        let status = if healthy { "ok" } else { "degraded" };
        Self {
            status: status.to_string(),
            storage_reachable,
            live_connections,
            audience_size,
        }
    }
}

/// Latency summary of the broadcasts of one event kind.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastLatency {
    /// Audience event name (`StartQuestion`, `PhaseChanged`, ...).
    pub kind: String,
    /// Broadcasts observed.
    pub count: u64,
    /// Mean send duration.
    pub mean_ms: f64,
    /// Slowest send.
    pub max_ms: f64,
    /// Most recent observation.
    pub last_ms: f64,
}
