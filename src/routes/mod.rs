use axum::Router;

use crate::state::SharedState;

/// Host endpoints guarded by the host secret.
pub mod admin;
/// Participant answer submission.
pub mod answers;
/// Swagger UI and OpenAPI document.
pub mod docs;
/// Health check.
pub mod health;
/// Audience WebSocket upgrade.
pub mod websocket;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(websocket::router())
        .merge(answers::router())
        .merge(admin::router(state.clone()))
        .merge(docs::router())
        .with_state(state)
}
