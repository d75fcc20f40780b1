//! Transport adapter: accepts streaming upgrade requests and hands each
//! connection to a fresh session coordinator.

use crate::codec::Decoder;
use crate::config::Config;
use crate::error::Result;
use crate::session::SessionCoordinator;
use crate::stt::Recognizer;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Shared state handed to every request handler.
///
/// The decoder and recognizer are trait objects so tests can run the full
/// server against mocks.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    decoder: Arc<dyn Decoder>,
    recognizer: Arc<dyn Recognizer>,
    shutdown: watch::Receiver<bool>,
}

impl AppState {
    /// Bundles the server's collaborators.
    pub fn new(
        config: Arc<Config>,
        decoder: Arc<dyn Decoder>,
        recognizer: Arc<dyn Recognizer>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            decoder,
            recognizer,
            shutdown,
        }
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/listen", get(listen_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Upgrade endpoint. Requests that do not ask for a WebSocket upgrade are
/// answered 400 and no session is created.
async fn listen_handler(
    State(state): State<AppState>,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(upgrade) => upgrade
            .on_upgrade(move |socket| async move {
                let coordinator = SessionCoordinator::new(
                    state.config.session.clone(),
                    state.decoder,
                    state.recognizer,
                    state.shutdown,
                );
                coordinator.run(socket).await;
            })
            .into_response(),
        Err(rejection) => {
            debug!(error = %rejection, "rejected non-upgrade request");
            (StatusCode::BAD_REQUEST, "expected websocket upgrade").into_response()
        }
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Binds the configured address and serves until SIGINT/SIGTERM, then
/// drains active sessions.
pub async fn serve(
    config: Config,
    decoder: Arc<dyn Decoder>,
    recognizer: Arc<dyn Recognizer>,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bind = config.server.bind.clone();
    let state = AppState::new(Arc::new(config), decoder, recognizer, shutdown_rx);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    let addr = listener.local_addr()?;
    info!(address = %addr, "listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            info!("shutdown signal received, draining sessions");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}

/// Wait for SIGINT or SIGTERM (the latter is what systemd sends).
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "failed to register SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
