//! Routing of sidecar messages to per-sender sessions and pending requests.

use std::sync::atomic::{AtomicU64, Ordering};

use {
    dashmap::DashMap,
    tokio::sync::oneshot,
    tracing::{debug, info, warn},
    wabcast_sessions::{LifecycleEvent, LifecycleSink},
};

use crate::types::{AccountStatus, SidecarMessage};

/// Outcome of one `send_text` request, `Err` carrying the sidecar's reason.
pub(crate) type SendAck = Result<(), String>;

struct Route {
    id: u64,
    sink: LifecycleSink,
}

/// State shared between the socket reader and every open connection.
#[derive(Default)]
pub(crate) struct SidecarState {
    routes: DashMap<String, Route>,
    next_route: AtomicU64,
    sends: DashMap<String, oneshot::Sender<SendAck>>,
    status_checks: DashMap<String, oneshot::Sender<Vec<AccountStatus>>>,
}

impl SidecarState {
    /// Point lifecycle events for `account_id` at `sink`, replacing any
    /// earlier route. Returns the route id used to detach it later.
    pub(crate) fn attach(&self, account_id: &str, sink: LifecycleSink) -> u64 {
        let id = self.next_route.fetch_add(1, Ordering::Relaxed);
        self.routes.insert(account_id.to_string(), Route { id, sink });
        id
    }

    /// Drop the route for `account_id` if it is still `route_id`.
    pub(crate) fn detach(&self, account_id: &str, route_id: u64) {
        self.routes.remove_if(account_id, |_, r| r.id == route_id);
    }

    pub(crate) fn expect_send(&self, request_id: &str) -> oneshot::Receiver<SendAck> {
        let (tx, rx) = oneshot::channel();
        self.sends.insert(request_id.to_string(), tx);
        rx
    }

    pub(crate) fn expect_status(
        &self,
        request_id: &str,
    ) -> oneshot::Receiver<Vec<AccountStatus>> {
        let (tx, rx) = oneshot::channel();
        self.status_checks.insert(request_id.to_string(), tx);
        rx
    }

    /// Forget a request that timed out or could not be written.
    pub(crate) fn abandon(&self, request_id: &str) {
        self.sends.remove(request_id);
        self.status_checks.remove(request_id);
    }

    fn emit(&self, account_id: &str, event: LifecycleEvent) {
        let Some((id, sink)) = self
            .routes
            .get(account_id)
            .map(|r| (r.id, r.sink.clone()))
        else {
            debug!(account_id, "no session listening for sidecar event");
            return;
        };
        if !sink.emit(event) {
            self.detach(account_id, id);
        }
    }

    /// Dispatch one message read from the socket.
    pub(crate) fn handle(&self, msg: SidecarMessage) {
        match msg {
            SidecarMessage::Qr { account_id, qr } => {
                debug!(account_id, "received QR code from sidecar");
                self.emit(&account_id, LifecycleEvent::Qr(qr));
            },
            SidecarMessage::QrScanned { account_id } => {
                debug!(account_id, "QR code scanned");
                self.emit(&account_id, LifecycleEvent::Scanned);
            },
            SidecarMessage::Connected {
                account_id,
                phone_number,
                auth_token,
            } => {
                info!(account_id, ?phone_number, "whatsapp web connected");
                self.emit(&account_id, LifecycleEvent::Authenticated {
                    token: auth_token,
                });
            },
            SidecarMessage::Disconnected { account_id, reason } => {
                warn!(account_id, reason, "whatsapp web disconnected");
                self.emit(&account_id, LifecycleEvent::Disconnected(reason));
                self.routes.remove(&account_id);
            },
            SidecarMessage::LoggedOut { account_id } => {
                info!(account_id, "whatsapp web logged out");
                self.emit(
                    &account_id,
                    LifecycleEvent::Disconnected("logged out".into()),
                );
                self.routes.remove(&account_id);
            },
            SidecarMessage::SendResult {
                request_id,
                success,
                message_id,
                error,
            } => {
                let ack = if success {
                    debug!(request_id, ?message_id, "message sent");
                    Ok(())
                } else {
                    Err(error.unwrap_or_else(|| "send failed".into()))
                };
                match self.sends.remove(&request_id) {
                    Some((_, tx)) => {
                        let _ = tx.send(ack);
                    },
                    None => debug!(request_id, "send result for unknown request"),
                }
            },
            SidecarMessage::StatusResponse {
                request_id,
                accounts,
            } => {
                if let Some(request_id) = request_id
                    && let Some((_, tx)) = self.status_checks.remove(&request_id)
                {
                    let _ = tx.send(accounts);
                }
            },
            SidecarMessage::Error {
                account_id,
                request_id,
                error,
            } => {
                warn!(?account_id, ?request_id, error, "sidecar error");
                if let Some(request_id) = request_id {
                    if let Some((_, tx)) = self.sends.remove(&request_id) {
                        let _ = tx.send(Err(error));
                    }
                    // Dropping the sender fails the waiting status check.
                    self.status_checks.remove(&request_id);
                } else if let Some(account_id) = account_id {
                    self.emit(&account_id, LifecycleEvent::Failed(error));
                }
            },
        }
    }

    /// The socket is gone: every session is disconnected and every pending
    /// request fails.
    pub(crate) fn connection_lost(&self) {
        let routes: Vec<(String, LifecycleSink)> = self
            .routes
            .iter()
            .map(|r| (r.key().clone(), r.sink.clone()))
            .collect();
        self.routes.clear();
        for (account_id, sink) in routes {
            debug!(account_id, "sidecar gone, disconnecting session");
            sink.disconnected("sidecar connection lost");
        }
        self.sends.clear();
        self.status_checks.clear();
    }
}
