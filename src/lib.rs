//! Library crate for trivia-live-back, exposing modules for binaries and integration tests.

/// Environment-driven configuration.
pub mod config;
/// Storage models and backends.
pub mod dao;
/// Wire payloads.
pub mod dto;
/// HTTP error mapping.
pub mod error;
/// Axum routers.
pub mod routes;
/// Game logic and background tasks.
pub mod services;
/// Shared application state.
pub mod state;
