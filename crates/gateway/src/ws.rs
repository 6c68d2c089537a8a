//! WebSocket push of session events.

use {
    axum::{
        extract::{
            Query, State,
            ws::{Message, WebSocket, WebSocketUpgrade},
        },
        response::IntoResponse,
    },
    serde::Deserialize,
    tokio::sync::broadcast::{self, error::RecvError},
    tracing::{debug, warn},
};

use wabcast_sessions::SessionEvent;

use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    /// Only forward events for this sender.
    pub sender_id: Option<String>,
}

pub async fn events_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> impl IntoResponse {
    let events = state.sessions.events().subscribe();
    ws.on_upgrade(move |socket| push_events(socket, events, filter))
}

async fn push_events(
    mut socket: WebSocket,
    mut events: broadcast::Receiver<SessionEvent>,
    filter: EventFilter,
) {
    debug!(sender = ?filter.sender_id, "event subscriber connected");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(sender) = filter.sender_id.as_deref()
                        && event.sender_id() != sender
                    {
                        continue;
                    }
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "failed to serialize session event");
                            continue;
                        },
                    };
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagging, events dropped");
                },
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {},
            },
        }
    }
    debug!("event subscriber disconnected");
}
