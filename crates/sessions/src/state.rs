//! Session state machine.

use {
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Lifecycle state of one sender's session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    NotStarted,
    Starting,
    QrReady,
    Scanned,
    Connected,
    Failed,
    Disconnected,
}

/// Event reported by an external connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A (new) pairing QR payload is available.
    Qr(String),
    /// The QR was scanned; login is in progress.
    Scanned,
    /// Logged in. Carries an auth token when the connection exposes one.
    Authenticated { token: Option<String> },
    Failed(String),
    Disconnected(String),
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::QrReady => "qr_ready",
            Self::Scanned => "scanned",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Disconnected => "disconnected",
        }
    }

    /// `Failed` and `Disconnected` absorb every event.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Disconnected)
    }

    /// Between a start request and either login or a terminal state.
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Starting | Self::QrReady | Self::Scanned)
    }

    /// Next state after `event`, or `None` when the event does not apply.
    ///
    /// The only way out of a terminal state is a fresh start, which replaces
    /// the record rather than transitioning it.
    pub fn apply(self, event: &LifecycleEvent) -> Option<Self> {
        use LifecycleEvent as E;

        if self == Self::NotStarted || self.is_terminal() {
            return None;
        }

        match (self, event) {
            (_, E::Failed(_)) => Some(Self::Failed),
            (_, E::Disconnected(_)) => Some(Self::Disconnected),
            (_, E::Authenticated { .. }) => Some(Self::Connected),
            // A logged-in session has no use for pairing events.
            (Self::Connected, E::Qr(_) | E::Scanned) => None,
            (_, E::Qr(_)) => Some(Self::QrReady),
            (_, E::Scanned) => Some(Self::Scanned),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{LifecycleEvent as E, SessionState as S};

    fn qr() -> E {
        E::Qr("data:image/png;base64,AAAA".into())
    }

    #[test]
    fn happy_path() {
        let s = S::Starting;
        let s = s.apply(&qr()).unwrap();
        assert_eq!(s, S::QrReady);
        let s = s.apply(&E::Scanned).unwrap();
        assert_eq!(s, S::Scanned);
        let s = s.apply(&E::Authenticated { token: None }).unwrap();
        assert_eq!(s, S::Connected);
    }

    #[test]
    fn restored_session_skips_qr() {
        assert_eq!(
            S::Starting.apply(&E::Authenticated {
                token: Some("t".into())
            }),
            Some(S::Connected)
        );
    }

    #[test]
    fn qr_refresh_and_rescan() {
        assert_eq!(S::QrReady.apply(&qr()), Some(S::QrReady));
        assert_eq!(S::Scanned.apply(&qr()), Some(S::QrReady));
    }

    #[test]
    fn connected_ignores_pairing_events() {
        assert_eq!(S::Connected.apply(&qr()), None);
        assert_eq!(S::Connected.apply(&E::Scanned), None);
        assert_eq!(
            S::Connected.apply(&E::Disconnected("phone offline".into())),
            Some(S::Disconnected)
        );
    }

    #[test]
    fn failure_from_any_live_state() {
        for s in [S::Starting, S::QrReady, S::Scanned, S::Connected] {
            assert_eq!(s.apply(&E::Failed("boom".into())), Some(S::Failed));
        }
    }

    #[test]
    fn terminal_and_idle_states_absorb_events() {
        for s in [S::NotStarted, S::Failed, S::Disconnected] {
            assert_eq!(s.apply(&qr()), None);
            assert_eq!(s.apply(&E::Authenticated { token: None }), None);
            assert_eq!(s.apply(&E::Failed("x".into())), None);
        }
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&S::QrReady).unwrap(),
            "\"qr_ready\""
        );
        assert_eq!(S::NotStarted.to_string(), "not_started");
    }
}
