//! Session lifecycle controller.
//!
//! Starts one external connection per sender, applies the connection's
//! lifecycle events to the registry, and answers liveness questions with an
//! active status check rather than the cached state.

use std::{sync::Arc, time::Duration};

use {
    futures::future::join_all,
    serde::Serialize,
    tokio::sync::broadcast::{self, error::RecvError},
    tracing::{debug, error, info, warn},
};

use crate::{
    connection::{ConnectOptions, Connection, Connector, LifecycleSink},
    error::{Error, Result, validate_sender},
    events::{EventBus, SessionEvent},
    registry::{Applied, SessionRecord, SessionRegistry, SessionSummary},
    state::{LifecycleEvent, SessionState},
    store::{MemoryTokenStore, TokenStore},
};

/// Default bound on how long a start request waits for a first signal.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(60);

/// Answer to a start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    /// A live session already existed; nothing was started.
    pub already_ready: bool,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
}

impl StartOutcome {
    fn ready() -> Self {
        Self {
            already_ready: true,
            state: SessionState::Connected,
            qr: None,
        }
    }

    fn from_record(record: &SessionRecord) -> Self {
        Self {
            already_ready: false,
            state: record.state,
            qr: record.last_qr.clone(),
        }
    }
}

/// Cached state plus the result of a live status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub state: SessionState,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

enum Claim {
    Ready,
    InProgress(SessionRecord),
    Fresh { stale: Option<Arc<dyn Connection>> },
}

/// Owns the start/close/logout flows for every sender.
#[derive(Clone)]
pub struct SessionController {
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenStore>,
    events: EventBus,
    start_timeout: Duration,
}

impl SessionController {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            connector,
            tokens: Arc::new(MemoryTokenStore::new()),
            events: EventBus::new(),
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }

    pub fn with_token_store(mut self, tokens: Arc<dyn TokenStore>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Start a session for `sender_id`, or report the one already running.
    ///
    /// Never creates a second connection while one is live or in progress.
    /// Waits up to the start timeout for a QR, a login, or a failure; on
    /// timeout the outcome simply reports `starting`.
    pub async fn start_session(&self, sender_id: &str) -> Result<StartOutcome> {
        let sender_id = validate_sender(sender_id)?;

        let mut dead_epoch = None;
        if let Some(record) = self.registry.get(sender_id)
            && record.state == SessionState::Connected
            && let Some(conn) = record.connection.as_ref()
        {
            if is_live(sender_id, conn.as_ref()).await {
                debug!(sender_id, "session already connected");
                return Ok(StartOutcome::ready());
            }
            info!(sender_id, "connected session failed its status check, restarting");
            dead_epoch = Some(record.epoch);
        }

        // Subscribe before claiming so no signal can slip past the wait.
        let mut signals = self.events.subscribe();
        let epoch = self.registry.next_epoch();
        let claim = self.registry.upsert(sender_id, |record| match record.state {
            state if state.is_in_progress() => Claim::InProgress(record.clone()),
            SessionState::Connected if Some(record.epoch) != dead_epoch => Claim::Ready,
            _ => Claim::Fresh {
                stale: record.restart(epoch),
            },
        });

        match claim {
            Claim::Ready => return Ok(StartOutcome::ready()),
            Claim::InProgress(record) => {
                debug!(sender_id, state = %record.state, "session start already in progress");
                return Ok(StartOutcome::from_record(&record));
            },
            Claim::Fresh { stale } => {
                // The old handle must be released before the new attempt
                // connects, both may share one transport.
                if let Some(conn) = stale {
                    close_quietly(sender_id, conn).await;
                }
            },
        }

        info!(sender_id, epoch, "starting session");
        self.events.publish(SessionEvent::StateChanged {
            sender_id: sender_id.to_string(),
            state: SessionState::Starting,
        });

        let this = self.clone();
        let sender = sender_id.to_string();
        tokio::spawn(async move { this.run_connection(sender, epoch).await });

        self.await_first_signal(sender_id, epoch, &mut signals)
            .await
    }

    async fn await_first_signal(
        &self,
        sender_id: &str,
        epoch: u64,
        signals: &mut broadcast::Receiver<SessionEvent>,
    ) -> Result<StartOutcome> {
        let deadline = tokio::time::sleep(self.start_timeout);
        tokio::pin!(deadline);

        loop {
            let Some(record) = self.registry.get(sender_id) else {
                debug!(sender_id, "session closed while starting");
                return Ok(StartOutcome {
                    already_ready: false,
                    state: SessionState::NotStarted,
                    qr: None,
                });
            };
            if record.epoch != epoch {
                return Ok(StartOutcome::from_record(&record));
            }
            match record.state {
                SessionState::Starting => {},
                SessionState::Failed => {
                    return Err(Error::ExternalConnection(
                        record
                            .failure
                            .unwrap_or_else(|| "session failed to start".into()),
                    ));
                },
                _ => return Ok(StartOutcome::from_record(&record)),
            }

            tokio::select! {
                _ = &mut deadline => {
                    debug!(sender_id, "no QR or login yet, answering with starting");
                    let record = self.registry.get(sender_id);
                    return Ok(record.as_ref().map(StartOutcome::from_record).unwrap_or(StartOutcome {
                        already_ready: false,
                        state: SessionState::Starting,
                        qr: None,
                    }));
                },
                signal = signals.recv() => match signal {
                    Ok(_) | Err(RecvError::Lagged(_)) => {},
                    Err(RecvError::Closed) => {
                        (&mut deadline).await;
                    },
                },
            }
        }
    }

    /// Create the connection for one start attempt and pump its events until
    /// the attempt ends.
    async fn run_connection(self, sender_id: String, epoch: u64) {
        let restore_token = match self.tokens.load(&sender_id).await {
            Ok(token) => token,
            Err(e) => {
                warn!(sender_id, error = %e, "failed to load session token");
                None
            },
        };

        let (sink, mut lifecycle) = LifecycleSink::channel();
        let options = ConnectOptions { restore_token };
        let conn = match self.connector.connect(&sender_id, options, sink).await {
            Ok(conn) => conn,
            Err(e) => {
                error!(sender_id, error = %e, "failed to create connection");
                self.apply(
                    &sender_id,
                    epoch,
                    LifecycleEvent::Failed(format!("failed to create connection: {e}")),
                )
                .await;
                return;
            },
        };

        let attached = self.registry.update_epoch(&sender_id, epoch, |record| {
            if record.state == SessionState::Starting {
                record.connection = Some(Arc::clone(&conn));
                true
            } else {
                false
            }
        });
        if attached != Some(true) {
            info!(sender_id, epoch, "session closed while connecting, releasing connection");
            close_quietly(&sender_id, conn).await;
            return;
        }
        drop(conn);

        while let Some(event) = lifecycle.recv().await {
            if !self.apply(&sender_id, epoch, event).await {
                break;
            }
        }
        debug!(sender_id, epoch, "lifecycle stream ended");
    }

    /// Apply one event. Returns whether further events for this attempt
    /// still matter.
    async fn apply(&self, sender_id: &str, epoch: u64, event: LifecycleEvent) -> bool {
        let Some(applied) = self
            .registry
            .update_epoch(sender_id, epoch, |record| record.apply_event(&event))
        else {
            debug!(sender_id, epoch, ?event, "dropping event for closed or replaced session");
            return false;
        };

        let (from, to, released) = match applied {
            Applied::Ignored(state) => {
                debug!(sender_id, %state, ?event, "event does not apply");
                return !state.is_terminal();
            },
            Applied::Moved { from, to, released } => (from, to, released),
        };

        if from == to {
            debug!(sender_id, state = %to, "session state refreshed");
        } else {
            info!(sender_id, from = %from, to = %to, "session state changed");
        }

        match event {
            LifecycleEvent::Qr(qr) => self.events.publish(SessionEvent::Qr {
                sender_id: sender_id.to_string(),
                qr,
            }),
            LifecycleEvent::Authenticated { token: Some(token) } => {
                if let Err(e) = self.tokens.save(sender_id, &token).await {
                    warn!(sender_id, error = %e, "failed to save session token");
                }
            },
            LifecycleEvent::Failed(reason) | LifecycleEvent::Disconnected(reason) => {
                warn!(sender_id, reason, "session ended");
            },
            _ => {},
        }
        if from != to {
            self.events.publish(SessionEvent::StateChanged {
                sender_id: sender_id.to_string(),
                state: to,
            });
        }

        if let Some(conn) = released {
            close_quietly(sender_id, Arc::clone(&conn)).await;
            self.registry
                .update_epoch(sender_id, epoch, |record| record.finish_release(&conn));
        }
        !to.is_terminal()
    }

    /// Cached state plus a live connectivity check.
    pub async fn status(&self, sender_id: &str) -> Result<StatusReport> {
        let sender_id = validate_sender(sender_id)?;
        let record = self
            .registry
            .get(sender_id)
            .ok_or_else(|| Error::SessionNotFound(sender_id.to_string()))?;

        let connected = match record.connection.as_ref() {
            Some(conn) => is_live(sender_id, conn.as_ref()).await,
            None => false,
        };

        Ok(StatusReport {
            state: record.state,
            connected,
            qr: record.last_qr,
            error: record.failure,
        })
    }

    /// Last QR payload, while pairing is pending.
    pub fn qr(&self, sender_id: &str) -> Option<String> {
        self.registry
            .get(sender_id.trim())
            .and_then(|record| record.last_qr)
    }

    /// The sender's connection, provided it passes a live status check.
    pub async fn connected_handle(&self, sender_id: &str) -> Result<Arc<dyn Connection>> {
        let sender_id = validate_sender(sender_id)?;
        let record = self
            .registry
            .get(sender_id)
            .ok_or_else(|| Error::SessionNotFound(sender_id.to_string()))?;
        let conn = record
            .connection
            .ok_or_else(|| Error::NotConnected(sender_id.to_string()))?;

        if is_live(sender_id, conn.as_ref()).await {
            Ok(conn)
        } else {
            Err(Error::NotConnected(sender_id.to_string()))
        }
    }

    /// Summaries of every known session.
    pub fn list(&self) -> Vec<SessionSummary> {
        self.registry.list().iter().map(SessionRecord::summary).collect()
    }

    /// Drop the session and release its connection. Idempotent; returns
    /// whether a session existed. Release failures are only logged.
    pub async fn close(&self, sender_id: &str) -> Result<bool> {
        let sender_id = validate_sender(sender_id)?;
        let Some(mut record) = self.registry.remove(sender_id) else {
            debug!(sender_id, "close: no session");
            return Ok(false);
        };

        self.events.publish(SessionEvent::Closed {
            sender_id: sender_id.to_string(),
        });
        if let Some(conn) = record.take_handle() {
            close_quietly(sender_id, conn).await;
        }
        info!(sender_id, "session closed");
        Ok(true)
    }

    /// Like [`Self::close`], but unlinks the device and forgets the stored
    /// auth token.
    pub async fn logout(&self, sender_id: &str) -> Result<bool> {
        let sender_id = validate_sender(sender_id)?;
        let record = self.registry.remove(sender_id);

        if let Err(e) = self.tokens.delete(sender_id).await {
            warn!(sender_id, error = %e, "failed to delete session token");
        }

        let Some(mut record) = record else {
            debug!(sender_id, "logout: no session");
            return Ok(false);
        };
        self.events.publish(SessionEvent::Closed {
            sender_id: sender_id.to_string(),
        });
        if let Some(conn) = record.take_handle()
            && let Err(e) = conn.logout().await
        {
            warn!(sender_id, error = %e, "logout failed, session dropped anyway");
        }
        info!(sender_id, "session logged out");
        Ok(true)
    }

    /// Close every session. Used on process shutdown.
    pub async fn shutdown(&self) {
        let records = self.registry.drain();
        info!(count = records.len(), "closing all sessions");
        join_all(records.into_iter().filter_map(|mut record| {
            let conn = record.take_handle()?;
            Some(async move { close_quietly(&record.sender_id, conn).await })
        }))
        .await;
    }
}

async fn is_live(sender_id: &str, conn: &dyn Connection) -> bool {
    match conn.is_connected().await {
        Ok(connected) => connected,
        Err(e) => {
            debug!(sender_id, error = %e, "connectivity check failed");
            false
        },
    }
}

async fn close_quietly(sender_id: &str, conn: Arc<dyn Connection>) {
    if let Err(e) = conn.close().await {
        warn!(sender_id, error = %e, "failed to close connection");
    }
}
