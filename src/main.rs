//! Trivia Live Back binary entrypoint wiring configuration, storage, the state
//! listener and the HTTP/WebSocket router.

use std::{env, net::SocketAddr, sync::Arc};
#[cfg(feature = "mongo-store")]
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trivia_live_back::{
    config::AppConfig,
    dao::game_store::{GameStore, InMemoryGameStore},
    routes,
    services::{game_service, state_listener, token_verifier::build_verifier},
    state::{AppState, SharedState},
};

#[cfg(feature = "mongo-store")]
const INITIAL_CONNECT_DELAY: Duration = Duration::from_millis(1_000);
#[cfg(feature = "mongo-store")]
const MAX_CONNECT_DELAY: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let store = open_store().await;

    if !config.seed().is_empty() {
        game_service::load_seed(store.as_ref(), config.seed())
            .await
            .context("loading seed data")?;
    }

    let verifier = build_verifier(config.verifier()).context("building token verifier")?;
    let app_state = AppState::new(store, config, verifier);

    state_listener::spawn(app_state.clone());
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Pick the storage backend: MongoDB when `MONGO_URI` is set, memory otherwise.
async fn open_store() -> Arc<dyn GameStore> {
    match env::var("MONGO_URI") {
        #[cfg(feature = "mongo-store")]
        Ok(uri) => {
            let db_name = env::var("MONGO_DB").ok();
            connect_mongo(&uri, db_name.as_deref()).await
        }
        _ => {
            info!("no MongoDB backend configured; using the in-memory store");
            Arc::new(InMemoryGameStore::new())
        }
    }
}

/// Keep trying to reach MongoDB, backing off exponentially between attempts.
#[cfg(feature = "mongo-store")]
async fn connect_mongo(uri: &str, db_name: Option<&str>) -> Arc<dyn GameStore> {
    use tokio::time::sleep;
    use tracing::warn;
    use trivia_live_back::dao::game_store::mongodb::{MongoConfig, MongoGameStore};

    let mut delay = INITIAL_CONNECT_DELAY;
    loop {
        let attempt = async {
            let config = MongoConfig::from_uri(uri, db_name).await?;
            MongoGameStore::connect(config).await
        };
        match attempt.await {
            Ok(store) => return Arc::new(store),
            Err(err) => {
                warn!(error = %err, retry_in_ms = delay.as_millis() as u64, "MongoDB connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_CONNECT_DELAY);
            }
        }
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
