//! Process-wide sender → session map.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    chrono::{DateTime, Utc},
    dashmap::DashMap,
    serde::Serialize,
};

use crate::{
    connection::Connection,
    state::{LifecycleEvent, SessionState},
};

/// One sender's session.
///
/// States after `Starting` hold a connection; `Failed` and `Disconnected`
/// never do. A connection dropped by a terminal transition stays parked in
/// `releasing` until its close has been issued, so a restart can wait for it.
#[derive(Clone)]
pub struct SessionRecord {
    pub sender_id: String,
    pub state: SessionState,
    pub connection: Option<Arc<dyn Connection>>,
    pub(crate) releasing: Option<Arc<dyn Connection>>,
    pub last_qr: Option<String>,
    /// Reason for the last terminal transition.
    pub failure: Option<String>,
    /// Start attempt this record belongs to.
    pub epoch: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("sender_id", &self.sender_id)
            .field("state", &self.state)
            .field("has_connection", &self.connection.is_some())
            .field("releasing", &self.releasing.is_some())
            .field("has_qr", &self.last_qr.is_some())
            .field("failure", &self.failure)
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// Result of feeding a lifecycle event to a record.
pub(crate) enum Applied {
    Ignored(SessionState),
    Moved {
        from: SessionState,
        to: SessionState,
        /// Connection dropped by a terminal transition, to be closed.
        released: Option<Arc<dyn Connection>>,
    },
}

impl SessionRecord {
    fn new(sender_id: &str) -> Self {
        let now = Utc::now();
        Self {
            sender_id: sender_id.to_string(),
            state: SessionState::NotStarted,
            connection: None,
            releasing: None,
            last_qr: None,
            failure: None,
            epoch: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Turn this record into a fresh `Starting` record for `epoch`.
    /// Returns the previous connection, live or still being released.
    pub(crate) fn restart(&mut self, epoch: u64) -> Option<Arc<dyn Connection>> {
        let stale = self.take_handle();
        self.state = SessionState::Starting;
        self.last_qr = None;
        self.failure = None;
        self.epoch = epoch;
        self.created_at = Utc::now();
        stale
    }

    pub(crate) fn apply_event(&mut self, event: &LifecycleEvent) -> Applied {
        let from = self.state;
        let Some(to) = from.apply(event) else {
            return Applied::Ignored(from);
        };

        let mut released = None;
        match event {
            LifecycleEvent::Qr(payload) => self.last_qr = Some(payload.clone()),
            LifecycleEvent::Scanned | LifecycleEvent::Authenticated { .. } => self.last_qr = None,
            LifecycleEvent::Failed(reason) | LifecycleEvent::Disconnected(reason) => {
                self.last_qr = None;
                self.failure = Some(reason.clone());
                self.releasing = self.connection.take();
                released = self.releasing.clone();
            },
        }
        self.state = to;

        Applied::Moved { from, to, released }
    }

    /// Whichever handle the record holds. At most one of `connection` and
    /// `releasing` is set.
    pub(crate) fn take_handle(&mut self) -> Option<Arc<dyn Connection>> {
        let live = self.connection.take();
        let parked = self.releasing.take();
        live.or(parked)
    }

    /// Forget the parked handle once `conn` has been closed.
    pub(crate) fn finish_release(&mut self, conn: &Arc<dyn Connection>) {
        if self
            .releasing
            .as_ref()
            .is_some_and(|parked| Arc::ptr_eq(parked, conn))
        {
            self.releasing = None;
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            sender_id: self.sender_id.clone(),
            state: self.state,
            has_qr: self.last_qr.is_some(),
            failure: self.failure.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Serializable view of a record, without the connection handle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub sender_id: String,
    pub state: SessionState,
    pub has_qr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sender → record map.
///
/// Mutations for one sender serialize on its map entry; different senders
/// never wait on each other beyond a shard lock. Mutator closures run under
/// that lock and must not call back into the registry.
#[derive(Default)]
pub struct SessionRegistry {
    records: DashMap<String, SessionRecord>,
    epochs: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a start-attempt id. Never returns 0.
    pub fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Copy of the current record.
    pub fn get(&self, sender_id: &str) -> Option<SessionRecord> {
        self.records.get(sender_id).map(|r| r.clone())
    }

    /// Create-or-update a record atomically.
    pub fn upsert<R>(&self, sender_id: &str, mutator: impl FnOnce(&mut SessionRecord) -> R) -> R {
        let mut entry = self
            .records
            .entry(sender_id.to_string())
            .or_insert_with(|| SessionRecord::new(sender_id));
        let out = mutator(entry.value_mut());
        entry.updated_at = Utc::now();
        out
    }

    /// Update an existing record; `None` when absent. Never inserts.
    pub fn update<R>(
        &self,
        sender_id: &str,
        mutator: impl FnOnce(&mut SessionRecord) -> R,
    ) -> Option<R> {
        let mut entry = self.records.get_mut(sender_id)?;
        let out = mutator(entry.value_mut());
        entry.updated_at = Utc::now();
        Some(out)
    }

    /// Update a record only while it still belongs to start attempt `epoch`.
    pub fn update_epoch<R>(
        &self,
        sender_id: &str,
        epoch: u64,
        mutator: impl FnOnce(&mut SessionRecord) -> R,
    ) -> Option<R> {
        let mut entry = self.records.get_mut(sender_id)?;
        if entry.epoch != epoch {
            return None;
        }
        let out = mutator(entry.value_mut());
        entry.updated_at = Utc::now();
        Some(out)
    }

    /// Delete a record. Idempotent.
    pub fn remove(&self, sender_id: &str) -> Option<SessionRecord> {
        self.records.remove(sender_id).map(|(_, record)| record)
    }

    /// All records, ordered by sender id.
    pub fn list(&self) -> Vec<SessionRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.sender_id.cmp(&b.sender_id));
        records
    }

    /// Remove and return every record.
    pub fn drain(&self) -> Vec<SessionRecord> {
        let keys: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        keys.iter().filter_map(|k| self.remove(k)).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::testing::FakeConnection};

    #[test]
    fn upsert_creates_then_updates() {
        let registry = SessionRegistry::new();
        assert!(registry.get("alice").is_none());

        registry.upsert("alice", |r| r.state = SessionState::Starting);
        let created_at = registry.get("alice").unwrap().created_at;

        registry.upsert("alice", |r| r.last_qr = Some("qr".into()));
        let record = registry.get("alice").unwrap();
        assert_eq!(record.state, SessionState::Starting);
        assert_eq!(record.last_qr.as_deref(), Some("qr"));
        assert_eq!(record.created_at, created_at);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn update_never_inserts() {
        let registry = SessionRegistry::new();
        assert!(
            registry
                .update("ghost", |r| r.state = SessionState::Connected)
                .is_none()
        );
        assert!(registry.get("ghost").is_none());
    }

    #[test]
    fn update_epoch_rejects_other_attempts() {
        let registry = SessionRegistry::new();
        let epoch = registry.next_epoch();
        registry.upsert("alice", |r| r.restart(epoch));

        assert!(registry.update_epoch("alice", epoch + 1, |_| ()).is_none());
        assert!(registry.update_epoch("alice", epoch, |_| ()).is_some());
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.upsert("alice", |_| ());
        assert!(registry.remove("alice").is_some());
        assert!(registry.remove("alice").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn terminal_event_releases_connection() {
        let registry = SessionRegistry::new();
        let epoch = registry.next_epoch();
        registry.upsert("alice", |r| {
            r.restart(epoch);
            r.connection = Some(FakeConnection::connected() as Arc<dyn Connection>);
        });

        registry.update("alice", |r| r.apply_event(&LifecycleEvent::Qr("qr".into())));
        assert_eq!(
            registry.get("alice").unwrap().last_qr.as_deref(),
            Some("qr")
        );

        let applied = registry
            .update("alice", |r| {
                r.apply_event(&LifecycleEvent::Failed("qr read failed".into()))
            })
            .unwrap();
        let Applied::Moved { from, to, released } = applied else {
            panic!("expected a transition");
        };
        assert_eq!(from, SessionState::QrReady);
        assert_eq!(to, SessionState::Failed);
        assert!(released.is_some());

        let record = registry.get("alice").unwrap();
        assert!(record.connection.is_none());
        assert!(record.releasing.is_some());
        assert!(record.last_qr.is_none());
        assert_eq!(record.failure.as_deref(), Some("qr read failed"));

        let released = released.unwrap();
        registry.update("alice", |r| r.finish_release(&released));
        assert!(registry.get("alice").unwrap().releasing.is_none());
    }

    #[test]
    fn restart_takes_handle_still_being_released() {
        let registry = SessionRegistry::new();
        let epoch = registry.next_epoch();
        let conn = FakeConnection::connected() as Arc<dyn Connection>;
        registry.upsert("alice", |r| {
            r.restart(epoch);
            r.connection = Some(Arc::clone(&conn));
        });
        registry.update("alice", |r| r.apply_event(&LifecycleEvent::Disconnected("phone offline".into())));

        let next = registry.next_epoch();
        let stale = registry.update("alice", |r| r.restart(next)).unwrap();
        assert!(stale.is_some_and(|stale| Arc::ptr_eq(&stale, &conn)));

        let record = registry.get("alice").unwrap();
        assert!(record.connection.is_none());
        assert!(record.releasing.is_none());
    }

    #[test]
    fn list_and_drain() {
        let registry = SessionRegistry::new();
        for id in ["zoe", "bob", "alice"] {
            registry.upsert(id, |_| ());
        }
        let ids: Vec<_> = registry.list().into_iter().map(|r| r.sender_id).collect();
        assert_eq!(ids, ["alice", "bob", "zoe"]);

        assert_eq!(registry.drain().len(), 3);
        assert!(registry.is_empty());
    }

    #[test]
    fn summary_serializes_camel_case() {
        let registry = SessionRegistry::new();
        registry.upsert("alice", |r| r.last_qr = Some("qr".into()));
        let json = serde_json::to_value(registry.get("alice").unwrap().summary()).unwrap();
        assert_eq!(json["senderId"], "alice");
        assert_eq!(json["state"], "not_started");
        assert_eq!(json["hasQr"], true);
        assert!(json.get("failure").is_none());
    }
}
