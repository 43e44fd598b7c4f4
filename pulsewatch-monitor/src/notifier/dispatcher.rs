/**
 * DISPATCHER - Envoi détaché des notifications
 *
 * RÔLE : Ingestion et scan déposent les événements dans une file bornée sans
 * jamais attendre leur livraison. Un worker unique dépile et garde au plus
 * `max_in_flight` appels au `Notifier` en cours.
 */

use super::{Event, Notifier};
use crate::detector::ScanOutcome;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, warn, Instrument};

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Alert(Event),
    Resolved(Event),
}

impl Notification {
    pub fn subject(&self) -> &str {
        match self {
            Notification::Alert(e) | Notification::Resolved(e) => &e.subject,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    /// Capacité de la file d'attente
    pub queue: usize,
    /// Appels simultanés maximum vers le notifier
    pub max_in_flight: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue: 1024,
            max_in_flight: 8,
        }
    }
}

/// Poignée clonable vers la file de notifications
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Notification>,
}

impl Dispatcher {
    /// File seule, sans worker : le receveur est rendu à l'appelant
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Démarre le worker. Il s'arrête quand toutes les poignées sont droppées,
    /// après avoir livré ce qui reste en file et en vol.
    pub fn spawn(notifier: Arc<dyn Notifier>, config: DispatchConfig) -> (Self, JoinHandle<()>) {
        let (dispatcher, rx) = Self::channel(config.queue);
        let worker = tokio::spawn(run_worker(notifier, rx, config.max_in_flight.max(1)).in_current_span());
        (dispatcher, worker)
    }

    pub fn alert(&self, event: Event) {
        self.enqueue(Notification::Alert(event));
    }

    pub fn resolved(&self, event: Event) {
        self.enqueue(Notification::Resolved(event));
    }

    /// Alertes puis résolutions d'un scan
    pub fn dispatch_scan(&self, outcome: ScanOutcome) {
        for event in outcome.alerts {
            self.alert(event);
        }
        for event in outcome.resolved {
            self.resolved(event);
        }
    }

    fn enqueue(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => {
                warn!(subject = n.subject(), "notification queue full, dropping notification");
            }
            Err(TrySendError::Closed(n)) => {
                warn!(subject = n.subject(), "notification dispatcher stopped, dropping notification");
            }
        }
    }
}

async fn run_worker(notifier: Arc<dyn Notifier>, mut rx: mpsc::Receiver<Notification>, max_in_flight: usize) {
    let mut in_flight = JoinSet::new();

    while let Some(notification) = rx.recv().await {
        while in_flight.len() >= max_in_flight {
            in_flight.join_next().await;
        }
        in_flight.spawn(deliver(notifier.clone(), notification).in_current_span());
        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
    debug!("notification dispatcher drained");
}

async fn deliver(notifier: Arc<dyn Notifier>, notification: Notification) {
    match &notification {
        Notification::Alert(event) => {
            if let Err(e) = notifier.alert(event).await {
                error!(subject = %event.subject, error = %e, "alert notify failed");
            }
        }
        Notification::Resolved(event) => {
            if let Err(e) = notifier.resolved(event).await {
                error!(subject = %event.subject, error = %e, "resolved notify failed");
            }
        }
    }
}
