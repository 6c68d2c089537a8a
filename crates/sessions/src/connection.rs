//! Seams to the external automation client.

use std::sync::Arc;

use {anyhow::Result, async_trait::async_trait, tokio::sync::mpsc};

use crate::state::LifecycleEvent;

/// Options handed to a connector for one start attempt.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Auth token saved from an earlier login, if any.
    pub restore_token: Option<String>,
}

/// A live handle on one sender's external session.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Ask the external side whether the session can currently send.
    async fn is_connected(&self) -> Result<bool>;

    /// Send a text message. `to` is a phone number in digits.
    async fn send_text(&self, to: &str, body: &str) -> Result<()>;

    /// Release the session, keeping its stored credentials.
    ///
    /// May be called more than once, also concurrently. Returns once the
    /// release has been handed to the transport, so a later connect for the
    /// same sender is ordered after it.
    async fn close(&self) -> Result<()>;

    /// Release the session and unlink the device.
    async fn logout(&self) -> Result<()> {
        self.close().await
    }
}

/// Creates external connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Start a session for `sender_id`.
    ///
    /// Lifecycle events are reported through `sink` from whatever task the
    /// connector likes. They are buffered and applied only once this call
    /// has returned the handle.
    async fn connect(
        &self,
        sender_id: &str,
        options: ConnectOptions,
        sink: LifecycleSink,
    ) -> Result<Arc<dyn Connection>>;
}

/// Write side of a connection's lifecycle event stream.
#[derive(Clone, Debug)]
pub struct LifecycleSink {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl LifecycleSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report an event. Returns `false` once nobody listens any more, i.e.
    /// the session was closed or replaced.
    pub fn emit(&self, event: LifecycleEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn qr(&self, payload: impl Into<String>) -> bool {
        self.emit(LifecycleEvent::Qr(payload.into()))
    }

    pub fn scanned(&self) -> bool {
        self.emit(LifecycleEvent::Scanned)
    }

    pub fn authenticated(&self, token: Option<String>) -> bool {
        self.emit(LifecycleEvent::Authenticated { token })
    }

    pub fn failed(&self, reason: impl Into<String>) -> bool {
        self.emit(LifecycleEvent::Failed(reason.into()))
    }

    pub fn disconnected(&self, reason: impl Into<String>) -> bool {
        self.emit(LifecycleEvent::Disconnected(reason.into()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
