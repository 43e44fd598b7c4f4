/**
 * API STATUS - Serveur HTTP du moniteur
 *
 * RÔLE : Expose l'instantané des sujets et un health check.
 *
 * ROUTES :
 * - GET /, GET /status : StatusResponse en JSON indenté
 * - GET /health        : uptime, sujets suivis, état du bus
 *
 * ARRÊT : axum graceful shutdown sur annulation du token, borné à 5s.
 */

use crate::error::MonitorError;
use crate::health::{HealthTracker, MonitorHealth};
use crate::snapshot::StatusSnapshotter;
use crate::state::StateStore;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::future::IntoFuture;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AppState {
    pub snapshotter: StatusSnapshotter,
    pub health_tracker: HealthTracker,
    pub store: StateStore,
}

impl AppState {
    pub fn new(store: StateStore, health_tracker: HealthTracker) -> Self {
        Self {
            snapshotter: StatusSnapshotter::new(store.clone()),
            health_tracker,
            store,
        }
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(get_status))
        .route("/status", get(get_status))
        .route("/health", get(get_health))
        .with_state(app_state)
}

async fn get_status(State(app): State<AppState>) -> Response {
    let status = app.snapshotter.snapshot(OffsetDateTime::now_utc());
    match serde_json::to_string_pretty(&status) {
        Ok(mut body) => {
            body.push('\n');
            ([(header::CONTENT_TYPE, "application/json")], body).into_response()
        }
        Err(e) => {
            warn!(error = %e, "status response encode failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "encode failed").into_response()
        }
    }
}

async fn get_health(State(app): State<AppState>) -> Json<MonitorHealth> {
    Json(app.health_tracker.get_health(&app.store))
}

/// Bind puis sert jusqu'à annulation
pub async fn serve_status(addr: &str, app_state: AppState, cancel: CancellationToken) -> Result<(), MonitorError> {
    let listener = TcpListener::bind(addr).await.map_err(|source| MonitorError::StatusBind {
        addr: addr.to_string(),
        source,
    })?;
    serve_on(listener, app_state, cancel).await
}

pub async fn serve_on(listener: TcpListener, app_state: AppState, cancel: CancellationToken) -> Result<(), MonitorError> {
    if let Ok(addr) = listener.local_addr() {
        info!("status server listening on http://{addr}");
    }

    let app = build_router(app_state);
    let shutdown = cancel.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move { shutdown.cancelled().await });
    let mut server = std::pin::pin!(server.into_future());

    tokio::select! {
        res = &mut server => return res.map_err(MonitorError::StatusServe),
        _ = cancel.cancelled() => {}
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(res) => res.map_err(MonitorError::StatusServe),
        Err(_) => Err(MonitorError::StatusShutdownTimeout(SHUTDOWN_GRACE)),
    }
}
