use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for Trivia Live Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::health::broadcast_metrics,
        crate::routes::admin::apply_action,
        crate::routes::admin::game_state,
        crate::routes::answers::submit_answer,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::BroadcastLatency,
            crate::dto::admin::HostActionRequest,
            crate::dto::admin::HostActionPayload,
            crate::dto::admin::GameStateResponse,
            crate::dto::answer::SubmitAnswerRequest,
            crate::dto::answer::AnswerReceipt,
            crate::dao::models::GameState,
            crate::dao::models::GameResults,
            crate::dao::models::RankedAnswer,
            crate::dao::models::Period,
            crate::state::state_machine::GamePhase,
            crate::state::state_machine::HostAction,
        )
    ),
    tags(
        (name = "health", description = "Health check and broadcast metrics"),
        (name = "host", description = "Host actions driving the live game"),
        (name = "answers", description = "Participant answer submission"),
        (name = "audience", description = "WebSocket stream of audience events"),
    )
)]
pub struct ApiDoc;
