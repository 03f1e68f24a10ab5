/// Participant answer submission.
pub mod answer_service;
/// Fan-out of audience events with latency tracking.
pub mod broadcast_service;
/// Audience WebSocket handshake and membership.
pub mod connection_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Snapshot to audience event mapping.
pub mod event_mapper;
/// Host actions applied through store transactions.
pub mod game_service;
/// Health check service.
pub mod health_service;
/// Rankings, eliminations and prize carryover.
pub mod ranking_service;
/// Backoff-with-abort executor.
pub mod retry;
/// Subscription to live state revisions driving the broadcasts.
pub mod state_listener;
/// Audience token verification.
pub mod token_verifier;
