//! [`Connector`] backed by the WhatsApp Web sidecar.

use std::sync::Arc;

use {
    anyhow::Result,
    async_trait::async_trait,
    tokio::sync::Mutex,
    tracing::{info, warn},
    wabcast_sessions::{ConnectOptions, Connection, Connector, LifecycleSink},
};

use crate::{
    config::SidecarOptions,
    outbound::SidecarConnection,
    sidecar::{MessageCallback, SidecarHandle, connect_with_retry},
    state::SidecarState,
    types::GatewayMessage,
};

/// Opens sender sessions over one shared sidecar socket.
///
/// The socket is dialled on first use and redialled when it has dropped.
pub struct SidecarConnector {
    options: SidecarOptions,
    state: Arc<SidecarState>,
    sidecar: Mutex<Option<SidecarHandle>>,
}

impl SidecarConnector {
    pub fn new(options: SidecarOptions) -> Self {
        Self {
            options,
            state: Arc::new(SidecarState::default()),
            sidecar: Mutex::new(None),
        }
    }

    async fn ensure_sidecar(&self) -> Result<SidecarHandle> {
        let mut sidecar = self.sidecar.lock().await;
        if let Some(handle) = sidecar.as_ref()
            && handle.is_connected()
        {
            return Ok(handle.clone());
        }

        let state = Arc::clone(&self.state);
        let callback: MessageCallback = Arc::new(move |msg| state.handle(msg));
        let (handle, disconnected) = connect_with_retry(
            self.options.port,
            callback,
            self.options.connect_retries,
            self.options.retry_delay,
        )
        .await?;

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let _ = disconnected.await;
            warn!("lost connection to WhatsApp sidecar");
            state.connection_lost();
        });

        *sidecar = Some(handle.clone());
        Ok(handle)
    }
}

#[async_trait]
impl Connector for SidecarConnector {
    async fn connect(
        &self,
        sender_id: &str,
        options: ConnectOptions,
        sink: LifecycleSink,
    ) -> Result<Arc<dyn Connection>> {
        let handle = self.ensure_sidecar().await?;
        let route_id = self.state.attach(sender_id, sink);

        info!(
            sender_id,
            restoring = options.restore_token.is_some(),
            "starting whatsapp web session"
        );
        let login = GatewayMessage::Login {
            account_id: sender_id.to_string(),
            auth_dir: self.options.auth_dir_for(sender_id),
            auth_token: options.restore_token,
        };
        if let Err(e) = handle.send(login).await {
            self.state.detach(sender_id, route_id);
            return Err(e);
        }

        Ok(Arc::new(SidecarConnection::new(
            sender_id,
            route_id,
            handle,
            Arc::clone(&self.state),
            self.options.request_timeout,
        )))
    }
}
