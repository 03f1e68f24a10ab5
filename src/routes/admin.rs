use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dao::models::GameState,
    dto::admin::{GameStateResponse, HostActionRequest},
    error::AppError,
    services::game_service,
    state::SharedState,
};

const HOST_TOKEN_HEADER: &str = "x-host-token";

/// Host-only endpoints driving the live game.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/admin/game/action", post(apply_action))
        .route("/admin/game/state", get(game_state))
        .route_layer(middleware::from_fn_with_state(state, require_host_token))
}

/// Apply a host action to the live game.
#[utoipa::path(
    post,
    path = "/admin/game/action",
    tag = "host",
    params(("X-Host-Token" = String, Header, description = "Shared host secret")),
    request_body = HostActionRequest,
    responses(
        (status = 200, description = "Action applied; committed state", body = GameState),
        (status = 400, description = "Missing or invalid payload"),
        (status = 404, description = "Unknown question"),
        (status = 409, description = "Action not allowed in the current phase"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn apply_action(
    State(state): State<SharedState>,
    Valid(Json(request)): Valid<Json<HostActionRequest>>,
) -> Result<Json<GameState>, AppError> {
    Ok(Json(game_service::apply_host_action(&state, request).await?))
}

/// Read the current game state.
#[utoipa::path(
    get,
    path = "/admin/game/state",
    tag = "host",
    params(("X-Host-Token" = String, Header, description = "Shared host secret")),
    responses((status = 200, description = "Current state", body = GameStateResponse))
)]
pub async fn game_state(
    State(state): State<SharedState>,
) -> Result<Json<GameStateResponse>, AppError> {
    Ok(Json(GameStateResponse {
        state: game_service::current_state(&state).await?,
    }))
}

async fn require_host_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(HOST_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing host token header `X-Host-Token`".into()))?;

    match state.config().host_token() {
        Some(expected) if expected == provided => Ok(next.run(req).await),
        Some(_) => Err(AppError::Unauthorized("invalid host token".into())),
        None => Err(AppError::Unauthorized(
            "host actions are disabled: no host token configured".into(),
        )),
    }
}
