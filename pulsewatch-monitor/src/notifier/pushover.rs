/**
 * PUSHOVER - Notifier HTTP vers l'API Pushover
 *
 * RÔLE : Formate alertes et résolutions puis les poste (formulaire) sur
 * l'API messages de Pushover. Un statut non 2xx est une erreur.
 */

use super::{Event, Notifier, NotifyError};
use crate::snapshot::format_duration;
use async_trait::async_trait;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

pub const DEFAULT_PUSHOVER_ENDPOINT: &str = "https://api.pushover.net/1/messages.json";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends alerts through the Pushover messages API.
#[derive(Debug, Clone)]
pub struct PushoverNotifier {
    token: String,
    user: String,
    endpoint: String,
    client: reqwest::Client,
}

impl PushoverNotifier {
    pub fn new(token: impl Into<String>, user: impl Into<String>) -> Result<Self, NotifyError> {
        let token = token.into();
        let user = user.into();
        if token.is_empty() || user.is_empty() {
            return Err(NotifyError::MissingCredentials);
        }
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            token,
            user,
            endpoint: DEFAULT_PUSHOVER_ENDPOINT.to_string(),
            client,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn alert_message(event: &Event) -> String {
        format!(
            "{}: missed {} beats over {} (interval {})",
            event.description,
            event.miss_count,
            format_duration(event.miss_for),
            format_duration(event.interval),
        )
    }

    pub fn resolved_message(event: &Event) -> String {
        let at = event
            .last_seen
            .format(&Rfc3339)
            .unwrap_or_else(|_| event.last_seen.to_string());
        format!("{}: recovered at {}", event.description, at)
    }

    async fn send(&self, title: &str, message: String) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .form(&[
                ("token", self.token.as_str()),
                ("user", self.user.as_str()),
                ("title", title),
                ("message", message.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status));
        }
        debug!(title, "pushover notification sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for PushoverNotifier {
    async fn alert(&self, event: &Event) -> Result<(), NotifyError> {
        self.send("Heartbeat missed", Self::alert_message(event)).await
    }

    async fn resolved(&self, event: &Event) -> Result<(), NotifyError> {
        self.send("Heartbeat resolved", Self::resolved_message(event)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Form, Router};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use time::macros::datetime;

    type Captured = Arc<Mutex<Vec<HashMap<String, String>>>>;

    fn event() -> Event {
        Event {
            subject: "backup".into(),
            description: "Nightly backup".into(),
            host: "nas".into(),
            last_seen: datetime!(2025-03-01 10:00 UTC),
            interval: Duration::from_secs(60),
            miss_for: Duration::from_millis(185_250),
            miss_count: 3,
        }
    }

    async fn fake_endpoint(status: StatusCode) -> (String, Captured) {
        let captured: Captured = Arc::default();
        let app = Router::new()
            .route(
                "/1/messages.json",
                post(
                    move |State(seen): State<Captured>, Form(form): Form<HashMap<String, String>>| async move {
                        seen.lock().push(form);
                        status
                    },
                ),
            )
            .with_state(captured.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/1/messages.json"), captured)
    }

    #[test]
    fn test_requires_credentials() {
        assert!(matches!(
            PushoverNotifier::new("", "user"),
            Err(NotifyError::MissingCredentials)
        ));
        assert!(matches!(
            PushoverNotifier::new("token", ""),
            Err(NotifyError::MissingCredentials)
        ));
    }

    #[test]
    fn test_message_texts() {
        assert_eq!(
            PushoverNotifier::alert_message(&event()),
            "Nightly backup: missed 3 beats over 3m 5s 250ms (interval 1m)"
        );
        assert_eq!(
            PushoverNotifier::resolved_message(&event()),
            "Nightly backup: recovered at 2025-03-01T10:00:00Z"
        );
    }

    #[tokio::test]
    async fn test_alert_posts_form() {
        let (url, captured) = fake_endpoint(StatusCode::OK).await;
        let notifier = PushoverNotifier::new("tok", "usr").unwrap().with_endpoint(url);

        notifier.alert(&event()).await.unwrap();

        let forms = captured.lock();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0]["token"], "tok");
        assert_eq!(forms[0]["user"], "usr");
        assert_eq!(forms[0]["title"], "Heartbeat missed");
        assert!(forms[0]["message"].starts_with("Nightly backup: missed 3 beats"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let (url, _) = fake_endpoint(StatusCode::INTERNAL_SERVER_ERROR).await;
        let notifier = PushoverNotifier::new("tok", "usr").unwrap().with_endpoint(url);

        let err = notifier.resolved(&event()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Status(s) if s == reqwest::StatusCode::INTERNAL_SERVER_ERROR));
    }
}
