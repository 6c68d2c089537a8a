//! Scripted connector and connection doubles.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Result, anyhow},
    async_trait::async_trait,
};

use crate::{
    connection::{ConnectOptions, Connection, Connector, LifecycleSink},
    registry::SessionRegistry,
    state::{LifecycleEvent, SessionState},
};

/// In-memory connection that records every call.
#[derive(Default)]
pub struct FakeConnection {
    connected: AtomicBool,
    check_error: AtomicBool,
    closed: AtomicBool,
    logged_out: AtomicBool,
    checks: AtomicUsize,
    close_delay_ms: AtomicU64,
    fail_to: Mutex<HashSet<String>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl FakeConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connected() -> Arc<Self> {
        let conn = Self::new();
        conn.set_connected(true);
        conn
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make every status check return an error.
    pub fn set_check_error(&self, fail: bool) {
        self.check_error.store(fail, Ordering::SeqCst);
    }

    /// Hold every close for `delay` before it takes effect.
    pub fn set_close_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.close_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Reject sends to `to`.
    pub fn fail_sends_to(&self, to: &str) {
        lock(&self.fail_to).insert(to.to_string());
    }

    /// `(to, body)` for every send attempt, in call order.
    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.sent).clone()
    }

    pub fn send_count(&self) -> usize {
        lock(&self.sent).len()
    }

    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn is_connected(&self) -> Result<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.check_error.load(Ordering::SeqCst) {
            return Err(anyhow!("status check failed"));
        }
        Ok(self.connected.load(Ordering::SeqCst) && !self.is_closed())
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<()> {
        lock(&self.sent).push((to.to_string(), body.to_string()));
        if lock(&self.fail_to).contains(to) {
            return Err(anyhow!("delivery to {to} rejected"));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let delay = self.close_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.closed.store(true, Ordering::SeqCst);
        self.set_connected(false);
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.logged_out.store(true, Ordering::SeqCst);
        self.close().await
    }
}

/// Connector that hands out [`FakeConnection`]s and replays a script of
/// lifecycle events on every connect.
#[derive(Default)]
pub struct FakeConnector {
    script: Vec<LifecycleEvent>,
    fail_with: Option<String>,
    delay: Duration,
    close_delay: Duration,
    connects: AtomicUsize,
    created: Mutex<Vec<(Arc<FakeConnection>, LifecycleSink)>>,
    released: Mutex<Vec<bool>>,
    options: Mutex<Vec<ConnectOptions>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `events` right after each connect.
    pub fn with_script(events: impl IntoIterator<Item = LifecycleEvent>) -> Self {
        Self {
            script: events.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Every connect fails with `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Connections handed out take `delay` to close.
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    /// Whether every earlier connection was already closed when connect
    /// `index` began.
    pub fn released_before(&self, index: usize) -> Option<bool> {
        lock(&self.released).get(index).copied()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn connection(&self, index: usize) -> Option<Arc<FakeConnection>> {
        lock(&self.created).get(index).map(|(c, _)| Arc::clone(c))
    }

    pub fn sink(&self, index: usize) -> Option<LifecycleSink> {
        lock(&self.created).get(index).map(|(_, s)| s.clone())
    }

    /// Options passed to the `index`-th connect.
    pub fn options(&self, index: usize) -> Option<ConnectOptions> {
        lock(&self.options).get(index).cloned()
    }

    /// Mark connection `index` live and report the login.
    pub fn authenticate(&self, index: usize, token: Option<&str>) -> bool {
        let Some((conn, sink)) = lock(&self.created).get(index).cloned() else {
            return false;
        };
        conn.set_connected(true);
        sink.authenticated(token.map(String::from))
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _sender_id: &str,
        options: ConnectOptions,
        sink: LifecycleSink,
    ) -> Result<Arc<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let released = lock(&self.created).iter().all(|(c, _)| c.is_closed());
        lock(&self.released).push(released);
        lock(&self.options).push(options);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(reason) = &self.fail_with {
            return Err(anyhow!("{reason}"));
        }

        let conn = FakeConnection::new();
        conn.set_close_delay(self.close_delay);
        for event in &self.script {
            if matches!(event, LifecycleEvent::Authenticated { .. }) {
                conn.set_connected(true);
            }
            sink.emit(event.clone());
        }
        lock(&self.created).push((Arc::clone(&conn), sink));
        Ok(conn)
    }
}

/// Poll until `sender_id` reaches `state`. Panics after two seconds.
pub async fn wait_for_state(registry: &SessionRegistry, sender_id: &str, state: SessionState) {
    let poll = async {
        loop {
            if registry.get(sender_id).map(|r| r.state) == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(2), poll)
        .await
        .is_err()
    {
        panic!(
            "{sender_id} never reached {state}, now {:?}",
            registry.get(sender_id).map(|r| r.state)
        );
    }
}

/// Poll `check` until it holds. Panics after two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let poll = async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(2), poll)
        .await
        .is_err()
    {
        panic!("condition not met within two seconds");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
