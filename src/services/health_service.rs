use tracing::warn;

use crate::{
    dto::health::{BroadcastLatency, HealthResponse},
    state::SharedState,
};

/// Report listener health, storage reachability and connection counts.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let storage_reachable = match state.store().health_check().await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            false
        }
    };

    HealthResponse::new(
        state.health().is_healthy(),
        storage_reachable,
        state.audience().live_connections(),
        state.audience().size(),
    )
}

/// Per event kind broadcast latency summaries.
pub fn broadcast_latency(state: &SharedState) -> Vec<BroadcastLatency> {
    state.latency().snapshot()
}
