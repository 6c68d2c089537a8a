//! Router assembly and the HTTP server loop.

use std::{future::Future, sync::Arc};

use {
    anyhow::{Context, Result},
    axum::{Json, Router, routing::get},
    serde::Serialize,
    serde_json::json,
    tokio::net::TcpListener,
    tower_http::{cors::CorsLayer, trace::TraceLayer},
    tracing::info,
};

use {
    wabcast_contacts::ContactBook, wabcast_dispatch::Dispatcher,
    wabcast_sessions::SessionController,
};

use crate::{
    contact_routes::contact_router, error::ApiError, session_routes::session_router,
    ws::events_handler,
};

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionController,
    pub dispatcher: Arc<Dispatcher>,
    pub contacts: Arc<ContactBook>,
}

/// Successful body: the payload's fields next to `"success": true`.
#[derive(Serialize)]
pub struct Success<T> {
    success: bool,
    #[serde(flatten)]
    body: T,
}

pub type ApiResult<T = serde_json::Value> = Result<Json<Success<T>>, ApiError>;

pub fn ok<T: Serialize>(body: T) -> Result<Json<Success<T>>, ApiError> {
    Ok(Json(Success {
        success: true,
        body,
    }))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "success": true, "status": "ok" }))
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(session_router())
        .merge(contact_router())
        .route("/events", get(events_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr().context("listener has no local address")?;
    info!(%addr, "gateway listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("gateway server exited unexpectedly")
}
