use axum::{Json, Router, extract::State, routing::get};

use crate::{
    dto::health::{BroadcastLatency, HealthResponse},
    services::health_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/healthcheck",
    tag = "health",
    responses((status = 200, description = "Service health", body = HealthResponse))
)]
/// Return the listener health flag, storage reachability and connection counts.
pub async fn healthcheck(State(state): State<SharedState>) -> Json<HealthResponse> {
    let status = health_service::health_status(&state).await;
    Json(status)
}

#[utoipa::path(
    get,
    path = "/metrics/broadcast",
    tag = "health",
    responses((status = 200, description = "Broadcast latency per event kind", body = [BroadcastLatency]))
)]
/// Return broadcast latency observations grouped by event kind.
pub async fn broadcast_metrics(State(state): State<SharedState>) -> Json<Vec<BroadcastLatency>> {
    Json(health_service::broadcast_latency(&state))
}

/// Configure the health routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/healthcheck", get(healthcheck))
        .route("/metrics/broadcast", get(broadcast_metrics))
}
