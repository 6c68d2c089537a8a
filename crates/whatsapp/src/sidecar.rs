//! The single WebSocket shared by every sender session.
//!
//! Outgoing commands go through a bounded queue drained by one writer task,
//! so commands reach the sidecar in the order they were queued. Incoming
//! frames are decoded by a reader task and handed to a callback.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Context, Result},
    futures::{
        SinkExt, StreamExt,
        stream::{SplitSink, SplitStream},
    },
    tokio::{
        net::TcpStream,
        sync::{mpsc, oneshot},
    },
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
};

use crate::types::{GatewayMessage, SidecarMessage};

/// Default sidecar WebSocket port.
pub const DEFAULT_SIDECAR_PORT: u16 = 9876;

const OUTBOX_CAPACITY: usize = 64;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Queue handle for the sidecar socket. Clones share the socket.
#[derive(Clone)]
pub struct SidecarHandle {
    outbox: mpsc::Sender<GatewayMessage>,
    alive: Arc<AtomicBool>,
}

impl SidecarHandle {
    /// Queue `msg` behind everything queued before it.
    pub async fn send(&self, msg: GatewayMessage) -> Result<()> {
        self.outbox
            .send(msg)
            .await
            .context("sidecar connection is closed")
    }

    pub fn is_connected(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.outbox.is_closed()
    }
}

pub type MessageCallback = Arc<dyn Fn(SidecarMessage) + Send + Sync>;

/// A live link plus a receiver that resolves when the socket is lost.
pub type SidecarLink = (SidecarHandle, oneshot::Receiver<()>);

/// Dial the sidecar on localhost and start pumping frames.
pub async fn connect_to_sidecar(port: u16, on_message: MessageCallback) -> Result<SidecarLink> {
    let url = format!("ws://127.0.0.1:{port}");
    let (socket, _) = connect_async(&url)
        .await
        .with_context(|| format!("failed to connect to sidecar at {url}"))?;
    info!(url = %url, "sidecar connected");

    let (sink, stream) = socket.split();
    let (outbox, queued) = mpsc::channel(OUTBOX_CAPACITY);
    let (lost_tx, lost_rx) = oneshot::channel();
    let alive = Arc::new(AtomicBool::new(true));

    tokio::spawn(read_loop(stream, on_message, Arc::clone(&alive), lost_tx));
    tokio::spawn(write_loop(sink, queued, Arc::clone(&alive)));

    Ok((SidecarHandle { outbox, alive }, lost_rx))
}

async fn read_loop(
    mut stream: SplitStream<Socket>,
    on_message: MessageCallback,
    alive: Arc<AtomicBool>,
    lost: oneshot::Sender<()>,
) {
    loop {
        let frame = match stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!(error = %e, "sidecar socket errored");
                break;
            },
            None => break,
        };
        match frame {
            Message::Text(text) => {
                if let Some(msg) = decode(&text) {
                    on_message(msg);
                }
            },
            Message::Close(reason) => {
                debug!(?reason, "sidecar sent close frame");
                break;
            },
            _ => {},
        }
    }

    alive.store(false, Ordering::SeqCst);
    let _ = lost.send(());
}

fn decode(text: &str) -> Option<SidecarMessage> {
    match serde_json::from_str(text) {
        Ok(msg) => {
            debug!(?msg, "sidecar ->");
            Some(msg)
        },
        Err(e) => {
            warn!(error = %e, frame = text, "ignoring malformed sidecar frame");
            None
        },
    }
}

async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut queued: mpsc::Receiver<GatewayMessage>,
    alive: Arc<AtomicBool>,
) {
    while let Some(msg) = queued.recv().await {
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, ?msg, "dropping unserializable sidecar command");
                continue;
            },
        };
        if let Err(e) = sink.send(Message::Text(json.into())).await {
            warn!(error = %e, "sidecar write failed");
            break;
        }
        debug!(?msg, "sidecar <-");
    }

    alive.store(false, Ordering::SeqCst);
    if let Err(e) = sink.close().await {
        debug!(error = %e, "sidecar socket already gone");
    }
}

/// [`connect_to_sidecar`], tried `attempts` times with `retry_delay` between
/// tries. Zero attempts counts as one.
pub async fn connect_with_retry(
    port: u16,
    on_message: MessageCallback,
    attempts: u32,
    retry_delay: Duration,
) -> Result<SidecarLink> {
    let attempts = attempts.max(1);
    for attempt in 1..attempts {
        match connect_to_sidecar(port, Arc::clone(&on_message)).await {
            Ok(link) => return Ok(link),
            Err(e) => {
                warn!(attempt, attempts, error = %e, "sidecar not reachable yet");
                tokio::time::sleep(retry_delay).await;
            },
        }
    }
    connect_to_sidecar(port, on_message)
        .await
        .with_context(|| format!("sidecar unreachable after {attempts} attempts"))
}

#[cfg(test)]
mod tests {
    use {tokio::net::TcpListener, tokio_tungstenite::accept_async};

    use super::*;

    #[tokio::test]
    async fn dropped_socket_marks_handle_dead() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            drop(ws);
        });

        let ignore: MessageCallback = Arc::new(|_| {});
        let (handle, lost) = connect_to_sidecar(port, ignore).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), lost)
            .await
            .unwrap()
            .unwrap();
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn retry_gives_up_after_attempts() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let ignore: MessageCallback = Arc::new(|_| {});
        let err = connect_with_retry(port, ignore, 3, Duration::from_millis(1))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("after 3 attempts"));
    }
}
