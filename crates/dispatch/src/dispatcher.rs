//! Sequential, paced broadcast to named recipients.

use std::{sync::Arc, time::Duration};

use {
    serde::Serialize,
    tracing::{debug, info, warn},
};

use {
    wabcast_contacts::ContactBook,
    wabcast_sessions::{Error, Result, SessionController, error::validate_sender},
};

use crate::address::normalize_number;

/// Default pause after each attempted delivery.
pub const DEFAULT_PACING: Duration = Duration::from_secs(1);

/// Per-recipient outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum Outcome {
    Sent,
    Failed(String),
    NotFound,
}

/// Result for one requested recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub total: usize,
    pub sent: usize,
    /// Every recipient that did not receive the message, `not_found`
    /// included.
    pub failed: usize,
    pub not_found: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub results: Vec<DispatchResult>,
    pub summary: DispatchSummary,
}

impl DispatchReport {
    fn new(results: Vec<DispatchResult>) -> Self {
        let mut summary = DispatchSummary {
            total: results.len(),
            ..Default::default()
        };
        for result in &results {
            match result.outcome {
                Outcome::Sent => summary.sent += 1,
                Outcome::Failed(_) => summary.failed += 1,
                Outcome::NotFound => {
                    summary.failed += 1;
                    summary.not_found += 1;
                },
            }
        }
        Self { results, summary }
    }
}

/// Split a comma-separated recipient list, dropping blanks.
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

/// Sends one message per recipient through the sender's session.
///
/// Recipients are contacted one at a time, in input order. Each attempted
/// delivery is followed by the pacing delay unless it was the last one;
/// unknown names cost no delay.
pub struct Dispatcher {
    sessions: SessionController,
    contacts: Arc<ContactBook>,
    pacing: Duration,
    default_country_code: Option<String>,
}

impl Dispatcher {
    pub fn new(sessions: SessionController, contacts: Arc<ContactBook>) -> Self {
        Self {
            sessions,
            contacts,
            pacing: DEFAULT_PACING,
            default_country_code: None,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_default_country_code(mut self, code: Option<String>) -> Self {
        self.default_country_code = code;
        self
    }

    /// Send `body` to every name in `recipient_names`.
    ///
    /// Request-level checks (sender, recipients, message, session, live
    /// status check) fail the whole call before anything is sent. After that,
    /// failures are recorded per recipient and never abort the batch.
    pub async fn send(
        &self,
        sender_id: &str,
        recipient_names: &[String],
        body: &str,
    ) -> Result<DispatchReport> {
        let sender_id = validate_sender(sender_id)?;
        let names: Vec<&str> = recipient_names
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            return Err(Error::Validation(
                "at least one recipient name is required".into(),
            ));
        }
        if body.trim().is_empty() {
            return Err(Error::Validation("message is required".into()));
        }

        let conn = self.sessions.connected_handle(sender_id).await?;
        let directory = self.contacts.directory();
        let country_code = self.default_country_code.as_deref();

        info!(sender_id, recipients = names.len(), "starting broadcast");
        let mut results = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let Some(contact) = directory.resolve(name) else {
                debug!(sender_id, name, "recipient not in contacts");
                results.push(DispatchResult {
                    name: name.to_string(),
                    number: None,
                    outcome: Outcome::NotFound,
                });
                continue;
            };

            let Some(to) = normalize_number(&contact.number, country_code) else {
                warn!(sender_id, name, "contact has no usable phone number");
                results.push(DispatchResult {
                    name: name.to_string(),
                    number: Some(contact.number.clone()),
                    outcome: Outcome::Failed("contact has no usable phone number".into()),
                });
                continue;
            };

            let outcome = match conn.send_text(&to, body).await {
                Ok(()) => {
                    debug!(sender_id, name, "message sent");
                    Outcome::Sent
                },
                Err(e) => {
                    warn!(sender_id, name, error = %e, "message delivery failed");
                    Outcome::Failed(e.to_string())
                },
            };
            results.push(DispatchResult {
                name: name.to_string(),
                number: Some(contact.number.clone()),
                outcome,
            });

            if i + 1 < names.len() && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }

        let report = DispatchReport::new(results);
        info!(
            sender_id,
            total = report.summary.total,
            sent = report.summary.sent,
            failed = report.summary.failed,
            "broadcast finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        tokio::time::Instant,
        wabcast_contacts::{Contact, ContactDirectory},
        wabcast_sessions::{
            LifecycleEvent,
            testing::{FakeConnection, FakeConnector},
        },
    };

    struct Fixture {
        dispatcher: Dispatcher,
        connection: Arc<FakeConnection>,
    }

    async fn fixture(contacts: &[(&str, &str)]) -> Fixture {
        let connector = Arc::new(FakeConnector::with_script([
            LifecycleEvent::Authenticated { token: None },
        ]));
        let sessions = SessionController::new(connector.clone());
        sessions.start_session("me").await.unwrap();

        let book = ContactBook::from_directory(ContactDirectory::from_contacts(
            contacts.iter().map(|(n, num)| Contact::new(*n, *num)),
        ));
        Fixture {
            dispatcher: Dispatcher::new(sessions, Arc::new(book)),
            connection: connector.connection(0).unwrap(),
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn preserves_input_order_across_outcomes() {
        let f = fixture(&[("Alice", "111"), ("Bob", "222"), ("Zoe", "333")]).await;
        f.connection.fail_sends_to("111");

        let report = f
            .dispatcher
            .send("me", &names(&["Bob", "Alice", "Zoe"]), "hi")
            .await
            .unwrap();

        let got: Vec<_> = report
            .results
            .iter()
            .map(|r| (r.name.as_str(), r.outcome.clone()))
            .collect();
        assert_eq!(got, [
            ("Bob", Outcome::Sent),
            ("Alice", Outcome::Failed("delivery to 111 rejected".into())),
            ("Zoe", Outcome::Sent),
        ]);
        let order: Vec<_> = f.connection.sent().into_iter().map(|(to, _)| to).collect();
        assert_eq!(order, ["222", "111", "333"]);
        assert_eq!(report.summary, DispatchSummary {
            total: 3,
            sent: 2,
            failed: 1,
            not_found: 0,
        });
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_recipient_skips_pacing() {
        let f = fixture(&[("Alice", "111")]).await;

        let started = Instant::now();
        let report = f
            .dispatcher
            .send("me", &names(&["Alice", "Ghost"]), "hi")
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(report.results, [
            DispatchResult {
                name: "Alice".into(),
                number: Some("111".into()),
                outcome: Outcome::Sent,
            },
            DispatchResult {
                name: "Ghost".into(),
                number: None,
                outcome: Outcome::NotFound,
            },
        ]);
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(2));
        assert_eq!(f.connection.send_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_applies_between_attempts_only() {
        let f = fixture(&[("Alice", "111"), ("Bob", "222"), ("Carol", "333")]).await;
        f.connection.fail_sends_to("222");

        let started = Instant::now();
        f.dispatcher
            .send("me", &names(&["Ghost", "Alice", "Bob", "Carol"]), "hi")
            .await
            .unwrap();
        // Alice → Bob → Carol: two gaps, none before the first attempt or
        // after the last.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn single_recipient_has_no_delay() {
        let f = fixture(&[("Alice", "111")]).await;
        let started = Instant::now();
        f.dispatcher
            .send("me", &names(&["Alice"]), "hi")
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn disconnected_session_sends_nothing() {
        let f = fixture(&[("Alice", "111")]).await;
        f.connection.set_connected(false);

        let err = f
            .dispatcher
            .send("me", &names(&["Alice"]), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected(_)));
        assert_eq!(f.connection.send_count(), 0);
    }

    #[tokio::test]
    async fn request_level_validation() {
        let f = fixture(&[("Alice", "111")]).await;
        let d = &f.dispatcher;

        assert!(matches!(
            d.send("", &names(&["Alice"]), "hi").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            d.send("me", &names(&[" ", ""]), "hi").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            d.send("me", &names(&["Alice"]), "  ").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            d.send("stranger", &names(&["Alice"]), "hi").await,
            Err(Error::SessionNotFound(_))
        ));
        assert_eq!(f.connection.send_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicates_are_sent_twice() {
        let f = fixture(&[("Alice", "111")]).await;
        let report = f
            .dispatcher
            .send("me", &names(&["alice", " Alice "]), "hi")
            .await
            .unwrap();
        assert_eq!(report.summary.sent, 2);
        assert_eq!(f.connection.send_count(), 2);
        assert_eq!(report.results[1].name, "Alice");
    }

    #[tokio::test]
    async fn formats_numbers_with_country_code() {
        let f = fixture(&[("Alice", "(555) 123-4567"), ("Nobody", "unlisted")]).await;
        let dispatcher = f
            .dispatcher
            .with_pacing(Duration::ZERO)
            .with_default_country_code(Some("1".into()));

        let report = dispatcher
            .send("me", &names(&["Alice", "Nobody"]), "hi")
            .await
            .unwrap();
        assert_eq!(f.connection.sent(), [("15551234567".to_string(), "hi".to_string())]);
        assert_eq!(report.results[0].number.as_deref(), Some("(555) 123-4567"));
        assert!(matches!(report.results[1].outcome, Outcome::Failed(_)));
    }

    #[test]
    fn parses_comma_separated_names() {
        assert_eq!(parse_recipients(" Bob, Alice ,,Zoe , "), [
            "Bob", "Alice", "Zoe"
        ]);
        assert!(parse_recipients(" , ").is_empty());
    }

    #[test]
    fn result_wire_shape() {
        let report = DispatchReport::new(vec![
            DispatchResult {
                name: "Alice".into(),
                number: Some("111".into()),
                outcome: Outcome::Sent,
            },
            DispatchResult {
                name: "Bob".into(),
                number: Some("222".into()),
                outcome: Outcome::Failed("timeout".into()),
            },
            DispatchResult {
                name: "Ghost".into(),
                number: None,
                outcome: Outcome::NotFound,
            },
        ]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "results": [
                    {"name": "Alice", "number": "111", "status": "sent"},
                    {"name": "Bob", "number": "222", "status": "failed", "error": "timeout"},
                    {"name": "Ghost", "status": "not_found"},
                ],
                "summary": {"total": 3, "sent": 1, "failed": 2, "notFound": 1},
            })
        );
    }
}
