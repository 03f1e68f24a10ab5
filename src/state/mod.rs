/// Broadcast group of authenticated connections.
pub mod audience;
/// Subscription health flag.
pub mod health;
/// Broadcast latency recorder.
pub mod metrics;
/// Phases, host actions and transitions.
pub mod state_machine;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    dao::game_store::GameStore,
    services::token_verifier::TokenVerifier,
};

pub use self::{audience::Audience, health::HealthFlag, metrics::LatencyRecorder};

/// State handle cloned into every handler and task.
pub type SharedState = Arc<AppState>;

/// Central application state shared by routes, the state listener and connections.
pub struct AppState {
    store: Arc<dyn GameStore>,
    config: AppConfig,
    verifier: Arc<dyn TokenVerifier>,
    health: HealthFlag,
    audience: Audience,
    latency: LatencyRecorder,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts degraded until the state listener receives its
    /// first snapshot.
    pub fn new(
        store: Arc<dyn GameStore>,
        config: AppConfig,
        verifier: Arc<dyn TokenVerifier>,
    ) -> SharedState {
        Arc::new(Self {
            store,
            config,
            verifier,
            health: HealthFlag::new(false),
            audience: Audience::new(),
            latency: LatencyRecorder::new(),
        })
    }

    /// Handle to the game store.
    pub fn store(&self) -> &Arc<dyn GameStore> {
        &self.store
    }

    /// Loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Audience token verifier.
    pub fn verifier(&self) -> &Arc<dyn TokenVerifier> {
        &self.verifier
    }

    /// Health of the state subscription; gates new connections.
    pub fn health(&self) -> &HealthFlag {
        &self.health
    }

    /// Authenticated connections receiving broadcasts.
    pub fn audience(&self) -> &Audience {
        &self.audience
    }

    /// Broadcast latency observations.
    pub fn latency(&self) -> &LatencyRecorder {
        &self.latency
    }
}
