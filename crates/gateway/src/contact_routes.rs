//! Address book routes.

use {
    axum::{
        Router,
        extract::State,
        routing::{get, post},
    },
    serde_json::json,
};

use crate::server::{AppState, ApiResult, ok};

async fn list_handler(State(state): State<AppState>) -> ApiResult {
    let directory = state.contacts.directory();
    ok(json!({
        "contacts": directory.contacts(),
        "count": directory.len(),
    }))
}

async fn reload_handler(State(state): State<AppState>) -> ApiResult {
    let count = state.contacts.reload()?;
    ok(json!({ "count": count }))
}

pub fn contact_router() -> Router<AppState> {
    Router::new()
        .route("/contacts", get(list_handler))
        .route("/contacts/reload", post(reload_handler))
}
