/**
 * NOTIFIER - Canal de sortie des alertes et résolutions
 *
 * RÔLE : Abstraction `Notifier` (alert / resolved) derrière laquelle se branchent
 * les transports réels (Pushover) ou factices (Nop, enregistreur de tests).
 * Le moniteur ne fait aucun retry : une alerte ratée repart au prochain tick
 * éligible, une résolution ratée est perdue.
 */

mod dispatcher;
mod pushover;

pub use dispatcher::{DispatchConfig, Dispatcher, Notification};
pub use pushover::{PushoverNotifier, DEFAULT_PUSHOVER_ENDPOINT};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

/// Détails d'une alerte ou d'une résolution, construits au moment de l'envoi
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub subject: String,
    pub description: String,
    pub host: String,
    pub last_seen: OffsetDateTime,
    pub interval: Duration,
    pub miss_for: Duration,
    pub miss_count: u64,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("pushover token and user are required")]
    MissingCredentials,

    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification endpoint returned status {0}")]
    Status(reqwest::StatusCode),
}

/// Envoie les alertes et résolutions vers un canal externe
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn alert(&self, event: &Event) -> Result<(), NotifyError>;
    async fn resolved(&self, event: &Event) -> Result<(), NotifyError>;
}

/// Notifier qui ne fait rien (pas de credentials, tests)
#[derive(Debug, Clone, Copy, Default)]
pub struct NopNotifier;

#[async_trait]
impl Notifier for NopNotifier {
    async fn alert(&self, _event: &Event) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn resolved(&self, _event: &Event) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Enregistre les événements reçus, avec latence et échec optionnels
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub alerts: Mutex<Vec<Event>>,
        pub resolved: Mutex<Vec<Event>>,
        pub delay: Option<Duration>,
        pub fail: bool,
        in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl RecordingNotifier {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay: Some(delay),
                ..Self::default()
            })
        }

        pub fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                ..Self::default()
            })
        }

        async fn record(&self, into: &Mutex<Vec<Event>>, event: &Event) -> Result<(), NotifyError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            into.lock().push(event.clone());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(NotifyError::MissingCredentials);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn alert(&self, event: &Event) -> Result<(), NotifyError> {
            self.record(&self.alerts, event).await
        }

        async fn resolved(&self, event: &Event) -> Result<(), NotifyError> {
            self.record(&self.resolved, event).await
        }
    }
}
