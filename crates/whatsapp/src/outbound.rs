//! One sender's session on the shared sidecar socket.

use std::{sync::Arc, time::Duration};

use {
    anyhow::{Result, anyhow, bail},
    async_trait::async_trait,
    tokio::sync::Mutex,
    tracing::debug,
    uuid::Uuid,
    wabcast_sessions::Connection,
};

use crate::{
    sidecar::SidecarHandle,
    state::SidecarState,
    types::{GatewayMessage, to_jid},
};

pub struct SidecarConnection {
    account_id: String,
    route_id: u64,
    handle: SidecarHandle,
    state: Arc<SidecarState>,
    request_timeout: Duration,
    /// Set once Close or Logout has been queued; held while queueing.
    released: Mutex<bool>,
}

impl SidecarConnection {
    pub(crate) fn new(
        account_id: &str,
        route_id: u64,
        handle: SidecarHandle,
        state: Arc<SidecarState>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            account_id: account_id.to_string(),
            route_id,
            handle,
            state,
            request_timeout,
            released: Mutex::new(false),
        }
    }

    async fn await_reply<T>(
        &self,
        request_id: &str,
        reply: tokio::sync::oneshot::Receiver<T>,
    ) -> Result<T> {
        match tokio::time::timeout(self.request_timeout, reply).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(anyhow!("sidecar dropped request {request_id}")),
            Err(_) => {
                self.state.abandon(request_id);
                Err(anyhow!(
                    "sidecar did not answer within {}s",
                    self.request_timeout.as_secs_f32()
                ))
            },
        }
    }
}

#[async_trait]
impl Connection for SidecarConnection {
    async fn is_connected(&self) -> Result<bool> {
        if !self.handle.is_connected() {
            return Ok(false);
        }

        let request_id = Uuid::new_v4().to_string();
        let reply = self.state.expect_status(&request_id);
        if let Err(e) = self
            .handle
            .send(GatewayMessage::Status {
                account_id: Some(self.account_id.clone()),
                request_id: request_id.clone(),
            })
            .await
        {
            self.state.abandon(&request_id);
            return Err(e);
        }

        let accounts = self.await_reply(&request_id, reply).await?;
        Ok(accounts
            .iter()
            .any(|a| a.account_id == self.account_id && a.connected))
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<()> {
        let request_id = Uuid::new_v4().to_string();
        let to = to_jid(to);
        debug!(account_id = %self.account_id, to, request_id, "sending text message");

        let reply = self.state.expect_send(&request_id);
        if let Err(e) = self
            .handle
            .send(GatewayMessage::SendText {
                account_id: self.account_id.clone(),
                to,
                text: body.to_string(),
                request_id: request_id.clone(),
            })
            .await
        {
            self.state.abandon(&request_id);
            return Err(e);
        }

        match self.await_reply(&request_id, reply).await? {
            Ok(()) => Ok(()),
            Err(reason) => bail!("{reason}"),
        }
    }

    async fn close(&self) -> Result<()> {
        let mut released = self.released.lock().await;
        if *released {
            return Ok(());
        }
        self.state.detach(&self.account_id, self.route_id);
        if self.handle.is_connected() {
            self.handle
                .send(GatewayMessage::Close {
                    account_id: self.account_id.clone(),
                })
                .await?;
        }
        *released = true;
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        let mut released = self.released.lock().await;
        self.state.detach(&self.account_id, self.route_id);
        self.handle
            .send(GatewayMessage::Logout {
                account_id: self.account_id.clone(),
            })
            .await?;
        *released = true;
        Ok(())
    }
}
