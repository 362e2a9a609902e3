// Web server — Axum-based JSON API in front of the term store and the live
// dictionary cache.
//
// Filtering goes straight to the in-memory cache. Term edits go to the store
// only; they become visible to filtering after a reload command, which
// POST /api/reload publishes on the configured broker.

use std::sync::Arc;

use anyhow::Result;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::db::TermStore;
use crate::dictionary::Filterer;
use crate::pubsub::Broker;
use crate::reload::SharedReloadStatus;

pub mod handlers;

/// Shared application state threaded through all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TermStore>,
    pub filterer: Arc<dyn Filterer>,
    pub broker: Arc<dyn Broker>,
    pub config: Arc<Config>,
    pub reload_status: SharedReloadStatus,
}

/// Start the Axum web server and block until `shutdown` fires.
pub async fn run_server(
    state: AppState,
    port: u16,
    bind: &str,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = build_router(state);

    let addr = format!("{bind}:{port}");
    info!("Muzzle API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/filter", post(handlers::filter::filter_text))
        .route(
            "/api/terms",
            get(handlers::terms::list_terms).post(handlers::terms::create_term),
        )
        .route(
            "/api/terms/{id}",
            get(handlers::terms::get_term)
                .put(handlers::terms::update_term)
                .delete(handlers::terms::delete_term),
        )
        .route("/api/reload", post(handlers::reload::trigger_reload))
        .route("/api/status", get(handlers::status::get_status))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check — always returns 200 OK.
async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "status": "ok" })),
    )
}

/// Typed JSON error response helper.
pub fn api_error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
}
