/**
 * MONITOR - Orchestration du moniteur de heartbeats
 *
 * RÔLE : Assemble store, dispatcher, priming, écoute du bus, scan périodique
 * et serveur de status sous une seule durée de vie (CancellationToken).
 *
 * ORDRE D'ARRÊT : bus et scan d'abord, puis fermeture de la file de
 * notifications et attente des envois en cours.
 */

use crate::config::MonitorConfig;
use crate::detector::MissDetector;
use crate::error::MonitorError;
use crate::health::HealthTracker;
use crate::http::{serve_status, AppState};
use crate::ingest::IngestHandler;
use crate::mqtt::BusListener;
use crate::notifier::{DispatchConfig, Dispatcher, Notifier};
use crate::primer::{CachePrimer, PrimeConfig};
use crate::state::StateStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument, Span};

pub struct Monitor {
    cfg: MonitorConfig,
    notifier: Arc<dyn Notifier>,
    store: StateStore,
    health: HealthTracker,
    span: Span,
}

impl Monitor {
    pub fn new(cfg: MonitorConfig, notifier: Arc<dyn Notifier>, span: Span) -> Self {
        Self {
            cfg: cfg.normalize(),
            notifier,
            store: StateStore::new(),
            health: HealthTracker::new(),
            span,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Tourne jusqu'à annulation de `cancel`. Seul le serveur de status peut
    /// faire échouer le moniteur, après arrêt propre des autres tâches.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), MonitorError> {
        let span = self.span.clone();
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(self, cancel: CancellationToken) -> Result<(), MonitorError> {
        let cfg = &self.cfg;
        let (dispatcher, worker) = Dispatcher::spawn(
            self.notifier.clone(),
            DispatchConfig {
                queue: cfg.notify.queue,
                max_in_flight: cfg.notify.concurrency,
            },
        );
        let ingest = IngestHandler::new(self.store.clone(), dispatcher.clone());

        if let Some(topic) = &cfg.prime_topic {
            let primer = CachePrimer::new(
                cfg.mqtt.clone(),
                PrimeConfig {
                    topic: topic.clone(),
                    idle_timeout: cfg.prime_idle_timeout,
                    max_duration: cfg.prime_max_duration,
                },
                ingest.clone(),
            );
            if let Err(e) = primer.prime(&cancel).await {
                warn!(topic = %topic, error = %e, "prime cache failed");
            }
        }

        let tasks = cancel.child_token();

        let listener = BusListener::new(&cfg.mqtt, &cfg.prefix, cfg.reconnect, ingest, self.health.clone());
        info!(filter = listener.filter(), prime_topic = ?cfg.prime_topic, "monitor subscribing");
        let bus = tokio::spawn(listener.run(tasks.clone()).in_current_span());

        let detector = MissDetector::new(self.store.clone(), cfg.repeat_every);
        let scan = tokio::spawn(
            detector
                .run(dispatcher.clone(), cfg.poll_every, tasks.clone())
                .in_current_span(),
        );

        let result = if cfg.status_addr.is_empty() {
            tasks.cancelled().await;
            Ok(())
        } else {
            let app_state = AppState::new(self.store.clone(), self.health.clone());
            let res = serve_status(&cfg.status_addr, app_state, tasks.clone()).await;
            if let Err(e) = &res {
                error!(error = %e, "status server failed, stopping monitor");
            }
            res
        };

        info!("monitor stopping");
        tasks.cancel();
        join("bus listener", bus).await;
        join("miss detector", scan).await;

        drop(dispatcher);
        join("notification dispatcher", worker).await;

        result
    }
}

async fn join(name: &str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        error!(task = name, error = %e, "task ended abnormally");
    }
}
