//! Session lifecycle and broadcast routes.

use {
    axum::{
        Json, Router,
        extract::{Path, State, rejection::JsonRejection},
        routing::{get, post},
    },
    serde::Deserialize,
    serde_json::json,
    tracing::debug,
};

use {
    wabcast_dispatch::{DispatchReport, parse_recipients},
    wabcast_sessions::{StartOutcome, StatusReport},
};

use crate::{
    error::ApiError,
    server::{AppState, ApiResult, ok},
};

/// `recipientNames` as a JSON array or one comma-separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RecipientNames {
    List(Vec<String>),
    Text(String),
}

impl Default for RecipientNames {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl RecipientNames {
    pub fn into_names(self) -> Vec<String> {
        match self {
            Self::List(names) => names,
            Self::Text(raw) => parse_recipients(&raw),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub recipient_names: RecipientNames,
    #[serde(default)]
    pub message: String,
}

async fn start_handler(
    State(state): State<AppState>,
    Path(sender_id): Path<String>,
) -> ApiResult<StartOutcome> {
    let outcome = state.sessions.start_session(&sender_id).await?;
    ok(outcome)
}

async fn status_handler(
    State(state): State<AppState>,
    Path(sender_id): Path<String>,
) -> ApiResult<StatusReport> {
    let report = state.sessions.status(&sender_id).await?;
    ok(report)
}

async fn qr_handler(State(state): State<AppState>, Path(sender_id): Path<String>) -> ApiResult {
    match state.sessions.qr(&sender_id) {
        Some(qr) => ok(json!({ "qr": qr })),
        None => Err(ApiError::not_found(format!(
            "no QR code available for sender '{}'",
            sender_id.trim()
        ))),
    }
}

async fn send_handler(
    State(state): State<AppState>,
    Path(sender_id): Path<String>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult<DispatchReport> {
    let Json(request) = body?;
    let names = request.recipient_names.into_names();
    debug!(sender_id, recipients = names.len(), "broadcast requested");

    let report = state
        .dispatcher
        .send(&sender_id, &names, &request.message)
        .await?;
    ok(report)
}

async fn close_handler(
    State(state): State<AppState>,
    Path(sender_id): Path<String>,
) -> ApiResult {
    let existed = state.sessions.close(&sender_id).await?;
    ok(json!({ "ok": true, "existed": existed }))
}

async fn logout_handler(
    State(state): State<AppState>,
    Path(sender_id): Path<String>,
) -> ApiResult {
    let existed = state.sessions.logout(&sender_id).await?;
    ok(json!({ "ok": true, "existed": existed }))
}

async fn list_handler(State(state): State<AppState>) -> ApiResult {
    ok(json!({ "sessions": state.sessions.list() }))
}

pub fn session_router() -> Router<AppState> {
    Router::new()
        .route("/sessions", get(list_handler))
        .route("/sessions/{sender_id}/start", post(start_handler))
        .route("/sessions/{sender_id}/status", get(status_handler))
        .route("/sessions/{sender_id}/qr", get(qr_handler))
        .route("/sessions/{sender_id}/messages", post(send_handler))
        .route("/sessions/{sender_id}/close", post(close_handler))
        .route("/sessions/{sender_id}/logout", post(logout_handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_names_accept_both_shapes() {
        let list: SendRequest =
            serde_json::from_str(r#"{"recipientNames": ["Bob", "Alice"], "message": "hi"}"#)
                .unwrap();
        assert_eq!(list.recipient_names.into_names(), ["Bob", "Alice"]);

        let text: SendRequest =
            serde_json::from_str(r#"{"recipientNames": "Bob, Alice,", "message": "hi"}"#).unwrap();
        assert_eq!(text.recipient_names.into_names(), ["Bob", "Alice"]);

        let missing: SendRequest = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        assert!(missing.recipient_names.into_names().is_empty());
    }
}
