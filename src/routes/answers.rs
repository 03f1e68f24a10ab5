use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    routing::post,
};
use axum_valid::Valid;

use crate::{
    dto::answer::{AnswerReceipt, SubmitAnswerRequest},
    error::AppError,
    services::answer_service,
    state::SharedState,
};

/// Participant answer endpoints.
pub fn router() -> Router<SharedState> {
    Router::new().route("/answers", post(submit_answer))
}

/// Submit the caller's answer to the open question.
#[utoipa::path(
    post,
    path = "/answers",
    tag = "answers",
    params(("Authorization" = String, Header, description = "`Bearer <token>` issued to the participant")),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 201, description = "Answer recorded", body = AnswerReceipt),
        (status = 400, description = "Invalid choice or latency"),
        (status = 401, description = "Missing or refused token"),
        (status = 409, description = "Question closed, participant dropped or already answered")
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Valid(Json(request)): Valid<Json<SubmitAnswerRequest>>,
) -> Result<(StatusCode, Json<AnswerReceipt>), AppError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;
    let receipt = answer_service::submit_answer_with_token(&state, token, request).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
