/**
 * INGEST - Réception des heartbeats
 *
 * RÔLE : Décode les payloads reçus du bus (live ou priming), met à jour le
 * StateStore et remet l'éventuel Resolved au dispatcher sans attendre l'envoi.
 */

use crate::notifier::Dispatcher;
use crate::state::{StateStore, Upsert};
use pulsewatch_heartbeat::Heartbeat;
use tracing::{debug, info, warn};

/// Chemin suivi par un message ingéré
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Created,
    Updated,
    Resolved,
    /// Plus ancien que le dernier heartbeat connu, ignoré
    Stale,
    /// Payload illisible ou invalide, ignoré
    Rejected,
}

#[derive(Clone)]
pub struct IngestHandler {
    store: StateStore,
    dispatcher: Dispatcher,
}

impl IngestHandler {
    pub fn new(store: StateStore, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Point d'entrée des messages bruts du bus
    pub fn handle_payload(&self, topic: &str, payload: &[u8]) -> IngestOutcome {
        match Heartbeat::decode(payload) {
            Ok(hb) => self.ingest(&hb),
            Err(e) => {
                warn!(topic, error = %e, "dropping invalid heartbeat");
                IngestOutcome::Rejected
            }
        }
    }

    pub fn ingest(&self, hb: &Heartbeat) -> IngestOutcome {
        if hb.skippable.is_some() {
            debug!(subject = %hb.subject, "ignoring legacy skippable field");
        }

        match self.store.upsert(hb) {
            Upsert::Created => {
                info!(subject = %hb.subject, interval = ?hb.interval, "new subject");
                IngestOutcome::Created
            }
            Upsert::Updated => IngestOutcome::Updated,
            Upsert::Resolved(event) => {
                info!(subject = %hb.subject, "subject recovered");
                self.dispatcher.resolved(event);
                IngestOutcome::Resolved
            }
            Upsert::Stale => {
                debug!(subject = %hb.subject, generated_at = %hb.generated_at, "ignoring out-of-order heartbeat");
                IngestOutcome::Stale
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::MissDetector;
    use crate::notifier::Notification;
    use pulsewatch_devkit::HeartbeatPayloads;
    use serde_json::json;
    use std::time::Duration;
    use time::OffsetDateTime;

    fn handler() -> (IngestHandler, StateStore, tokio::sync::mpsc::Receiver<Notification>) {
        let store = StateStore::new();
        let (dispatcher, rx) = Dispatcher::channel(16);
        (IngestHandler::new(store.clone(), dispatcher), store, rx)
    }

    #[test]
    fn test_first_heartbeat_creates_without_events() {
        let (ingest, store, mut rx) = handler();
        let payload = HeartbeatPayloads::heartbeat("svc", 5, OffsetDateTime::now_utc());

        let outcome = ingest.handle_payload("heartbeat/svc", &HeartbeatPayloads::bytes(&payload));

        assert_eq!(outcome, IngestOutcome::Created);
        let st = store.get("svc").unwrap();
        assert!(!st.alert_active);
        assert_eq!(st.miss_count, 0);
        assert_eq!(st.last_alert, None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_update_overwrites_fields() {
        let (ingest, store, _rx) = handler();
        let now = OffsetDateTime::now_utc();
        ingest.handle_payload(
            "heartbeat/svc",
            &HeartbeatPayloads::bytes(&HeartbeatPayloads::heartbeat("svc", 5, now)),
        );

        let payload = HeartbeatPayloads::heartbeat_full("svc", 10, 30, "Service", "box", now);
        let outcome = ingest.handle_payload("heartbeat/svc", &HeartbeatPayloads::bytes(&payload));

        assert_eq!(outcome, IngestOutcome::Updated);
        let st = store.get("svc").unwrap();
        assert_eq!(st.interval, Duration::from_secs(10));
        assert_eq!(st.grace, Some(Duration::from_secs(30)));
        assert_eq!(st.description, "Service");
        assert_eq!(st.host, "box");
    }

    #[test]
    fn test_heartbeat_for_missing_subject_resolves_once() {
        let (ingest, store, mut rx) = handler();
        ingest.ingest(&Heartbeat::new("svc", Duration::from_secs(1)));
        store.for_each_mut(|st| {
            st.alert_active = true;
            st.miss_count = 7;
            st.last_alert = Some(OffsetDateTime::now_utc());
        });

        let later = store.get("svc").unwrap().last_seen + time::Duration::seconds(1);
        let outcome = ingest.ingest(&Heartbeat::new("svc", Duration::from_secs(1)).generated_at(later));

        assert_eq!(outcome, IngestOutcome::Resolved);
        match rx.try_recv().unwrap() {
            Notification::Resolved(event) => {
                assert_eq!(event.subject, "svc");
                assert_eq!(event.miss_count, 7);
            }
            other => panic!("expected Resolved, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());

        let st = store.get("svc").unwrap();
        assert!(!st.alert_active);
        assert_eq!(st.miss_count, 0);
    }

    #[test]
    fn test_retained_replay_does_not_resolve_or_rearm_alert() {
        let (ingest, store, mut rx) = handler();
        let detector = MissDetector::new(store.clone(), Duration::from_secs(12 * 3600));
        let sent = OffsetDateTime::now_utc() - time::Duration::minutes(10);
        let payload = HeartbeatPayloads::bytes(&HeartbeatPayloads::heartbeat("svc", 60, sent));

        assert_eq!(ingest.handle_payload("heartbeat/svc", &payload), IngestOutcome::Created);
        let now = OffsetDateTime::now_utc();
        assert_eq!(detector.scan(now).alerts.len(), 1);

        // reconnect: the broker hands back the same retained message
        assert_eq!(ingest.handle_payload("heartbeat/svc", &payload), IngestOutcome::Updated);
        assert!(rx.try_recv().is_err());
        assert!(store.get("svc").unwrap().alert_active);
        assert!(detector.scan(now + time::Duration::seconds(1)).is_empty());
    }

    #[test]
    fn test_out_of_order_heartbeat_is_stale() {
        let (ingest, store, _rx) = handler();
        let now = OffsetDateTime::now_utc();
        ingest.ingest(&Heartbeat::new("svc", Duration::from_secs(5)).generated_at(now));

        let older = Heartbeat::new("svc", Duration::from_secs(5)).generated_at(now - time::Duration::seconds(20));
        assert_eq!(ingest.ingest(&older), IngestOutcome::Stale);
        assert_eq!(store.get("svc").unwrap().last_seen, now);
    }

    #[test]
    fn test_invalid_payloads_are_dropped() {
        let (ingest, store, _rx) = handler();

        assert_eq!(ingest.handle_payload("heartbeat/x", b"{not json"), IngestOutcome::Rejected);
        let missing = HeartbeatPayloads::missing_subject(OffsetDateTime::now_utc());
        assert_eq!(
            ingest.handle_payload("heartbeat/x", &HeartbeatPayloads::bytes(&missing)),
            IngestOutcome::Rejected
        );
        let zero_interval = json!({
            "subject": "svc",
            "generated_at": "2025-03-01T10:00:00Z",
            "interval": 0
        });
        assert_eq!(
            ingest.handle_payload("heartbeat/svc", &HeartbeatPayloads::bytes(&zero_interval)),
            IngestOutcome::Rejected
        );

        assert!(store.is_empty());
    }

    #[test]
    fn test_skippable_is_accepted() {
        let (ingest, store, _rx) = handler();
        let payload = json!({
            "subject": "legacy",
            "generated_at": "2025-03-01T10:00:00Z",
            "interval": 1_000_000_000u64,
            "skippable": 3
        });

        assert_eq!(
            ingest.handle_payload("heartbeat/legacy", &HeartbeatPayloads::bytes(&payload)),
            IngestOutcome::Created
        );
        assert_eq!(store.len(), 1);
    }
}
