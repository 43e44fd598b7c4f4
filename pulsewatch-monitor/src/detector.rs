/**
 * MISS DETECTOR - Scan périodique OK / MISSING
 *
 * RÔLE : À chaque tick, compare le silence de chaque sujet à sa fenêtre autorisée
 * et fait avancer la machine d'état :
 *   OK      -> MISSING  : première alerte, last_alert = now
 *   MISSING -> MISSING  : nouvelle alerte si now - last_alert >= repeat_every
 *   MISSING -> OK       : Resolved (le heartbeat est arrivé entre deux ticks)
 *
 * Les événements sont collectés sous le verrou du store et envoyés après.
 */

use crate::notifier::{Dispatcher, Event};
use crate::state::StateStore;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Événements produits par un scan, dans l'ordre de parcours
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScanOutcome {
    pub alerts: Vec<Event>,
    pub resolved: Vec<Event>,
}

impl ScanOutcome {
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty() && self.resolved.is_empty()
    }
}

#[derive(Clone)]
pub struct MissDetector {
    store: StateStore,
    repeat_every: Duration,
}

impl MissDetector {
    pub fn new(store: StateStore, repeat_every: Duration) -> Self {
        Self { store, repeat_every }
    }

    /// Un passage de la machine d'état sur tous les sujets, à l'instant `now`
    pub fn scan(&self, now: OffsetDateTime) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let repeat_every = self.repeat_every;

        self.store.for_each_mut(|st| {
            let elapsed = st.silence(now);

            if elapsed <= st.allowed_window() {
                if st.alert_active {
                    outcome.resolved.push(st.event(elapsed));
                    st.clear_alert();
                }
                return;
            }

            st.miss_count = st.misses_for(elapsed);

            let due = !st.alert_active
                || st.last_alert.map_or(true, |last| {
                    Duration::try_from(now - last).unwrap_or(Duration::ZERO) >= repeat_every
                });
            if due {
                st.alert_active = true;
                st.last_alert = Some(now);
                outcome.alerts.push(st.event(elapsed));
            }
        });

        outcome
    }

    /// Boucle de scan jusqu'à annulation
    pub async fn run(self, dispatcher: Dispatcher, poll_every: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(poll_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(poll_every = ?poll_every, repeat_every = ?self.repeat_every, "miss detector started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let outcome = self.scan(OffsetDateTime::now_utc());
                    if outcome.is_empty() {
                        continue;
                    }
                    for event in &outcome.alerts {
                        warn!(
                            subject = %event.subject,
                            miss_count = event.miss_count,
                            miss_for = ?event.miss_for,
                            "heartbeat missed"
                        );
                    }
                    for event in &outcome.resolved {
                        info!(subject = %event.subject, "heartbeat resolved");
                    }
                    dispatcher.dispatch_scan(outcome);
                }
            }
        }

        debug!("miss detector stopped");
    }
}
