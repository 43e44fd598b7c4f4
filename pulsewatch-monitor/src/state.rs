/**
 * STATE STORE - État de vivacité par sujet
 *
 * RÔLE : Source de vérité unique du moniteur. Une entrée `SubjectState` par sujet,
 * créée au premier heartbeat, mise à jour en place ensuite, jamais supprimée.
 *
 * CONCURRENCE : Un seul `parking_lot::Mutex` protège toute la map. Les sections
 * critiques ne contiennent que des lectures/écritures mémoire : aucun appel réseau,
 * aucune notification. Les événements sont construits sous le verrou puis envoyés
 * après sa libération.
 */

use crate::notifier::Event;
use parking_lot::Mutex;
use pulsewatch_heartbeat::Heartbeat;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Vivacité d'un sujet observé
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectState {
    pub subject: String,
    pub description: String,
    pub host: String,
    /// Heure de génération déclarée par le dernier heartbeat
    pub last_seen: OffsetDateTime,
    pub interval: Duration,
    pub grace: Option<Duration>,
    /// true tant que le sujet est MISSING
    pub alert_active: bool,
    pub miss_count: u64,
    /// Dernière alerte envoyée pour l'épisode en cours
    pub last_alert: Option<OffsetDateTime>,
}

impl SubjectState {
    pub fn from_heartbeat(hb: &Heartbeat) -> Self {
        Self {
            subject: hb.subject.clone(),
            description: hb.description_or_subject().to_string(),
            host: hb.host.clone(),
            last_seen: hb.generated_at,
            interval: hb.interval,
            grace: hb.grace_period,
            alert_active: false,
            miss_count: 0,
            last_alert: None,
        }
    }

    /// Fenêtre de silence tolérée : grace si > 0, sinon interval
    pub fn allowed_window(&self) -> Duration {
        match self.grace {
            Some(grace) if !grace.is_zero() => grace,
            _ => self.interval,
        }
    }

    /// Silence écoulé depuis le dernier heartbeat, borné à zéro si last_seen est dans le futur
    pub fn silence(&self, now: OffsetDateTime) -> Duration {
        Duration::try_from(now - self.last_seen).unwrap_or(Duration::ZERO)
    }

    /// Nombre d'intervalles entiers contenus dans `silence`
    pub fn misses_for(&self, silence: Duration) -> u64 {
        if self.interval.is_zero() {
            return 0;
        }
        (silence.as_nanos() / self.interval.as_nanos()) as u64
    }

    pub fn event(&self, miss_for: Duration) -> Event {
        Event {
            subject: self.subject.clone(),
            description: self.description.clone(),
            host: self.host.clone(),
            last_seen: self.last_seen,
            interval: self.interval,
            miss_for,
            miss_count: self.miss_count,
        }
    }

    /// Retour à OK : efface l'alerte et les compteurs de l'épisode
    pub fn clear_alert(&mut self) {
        self.alert_active = false;
        self.miss_count = 0;
        self.last_alert = None;
    }

    /// Applique un heartbeat entrant.
    ///
    /// Un heartbeat plus ancien que `last_seen` est ignoré. Un heartbeat de même
    /// `generated_at` (message retenu rejoué par le broker) rafraîchit les champs
    /// sans résoudre l'alerte : seul un heartbeat plus récent ramène le sujet à OK.
    fn apply(&mut self, hb: &Heartbeat) -> Upsert {
        if hb.generated_at < self.last_seen {
            return Upsert::Stale;
        }
        let fresh = hb.generated_at > self.last_seen;

        self.last_seen = hb.generated_at;
        self.interval = hb.interval;
        self.grace = hb.grace_period;
        self.host = hb.host.clone();
        self.description = hb.description_or_subject().to_string();

        if !fresh || !self.alert_active {
            return Upsert::Updated;
        }
        let resolved = self.event(Duration::ZERO);
        self.clear_alert();
        Upsert::Resolved(resolved)
    }
}

/// Résultat d'un `StateStore::upsert`
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    Created,
    Updated,
    /// Le sujet était MISSING, il repasse OK
    Resolved(Event),
    /// Heartbeat antérieur au dernier connu, état inchangé
    Stale,
}

/// Map sujet -> état, partagée entre ingestion, scan et status
#[derive(Clone, Default)]
pub struct StateStore {
    subjects: Shared<HashMap<String, SubjectState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            subjects: new_state(HashMap::new()),
        }
    }

    /// Crée ou met à jour l'état du sujet du heartbeat, transition de résolution comprise
    pub fn upsert(&self, hb: &Heartbeat) -> Upsert {
        let mut subjects = self.subjects.lock();
        match subjects.get_mut(&hb.subject) {
            Some(state) => state.apply(hb),
            None => {
                subjects.insert(hb.subject.clone(), SubjectState::from_heartbeat(hb));
                Upsert::Created
            }
        }
    }

    /// Accès en écriture à chaque entrée, sous une seule prise du verrou
    pub fn for_each_mut<F>(&self, mut f: F)
    where
        F: FnMut(&mut SubjectState),
    {
        let mut subjects = self.subjects.lock();
        for state in subjects.values_mut() {
            f(state);
        }
    }

    /// Copie cohérente de tous les états
    pub fn snapshot(&self) -> Vec<SubjectState> {
        self.subjects.lock().values().cloned().collect()
    }

    pub fn get(&self, subject: &str) -> Option<SubjectState> {
        self.subjects.lock().get(subject).cloned()
    }

    /// Insère ou remplace un état tel quel (outillage et tests)
    pub fn insert(&self, state: SubjectState) {
        self.subjects.lock().insert(state.subject.clone(), state);
    }

    pub fn len(&self) -> usize {
        self.subjects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(subject: &str, interval: Duration) -> Heartbeat {
        Heartbeat::new(subject, interval)
    }

    #[test]
    fn test_allowed_window_prefers_grace() {
        let st = SubjectState::from_heartbeat(
            &heartbeat("svc", Duration::from_secs(3)).with_grace(Duration::from_secs(5)),
        );
        assert_eq!(st.allowed_window(), Duration::from_secs(5));
    }

    #[test]
    fn test_allowed_window_defaults_to_interval() {
        let st = SubjectState::from_heartbeat(&heartbeat("svc", Duration::from_secs(1)));
        assert_eq!(st.allowed_window(), Duration::from_secs(1));

        let zero_grace = SubjectState::from_heartbeat(
            &heartbeat("svc", Duration::from_secs(1)).with_grace(Duration::ZERO),
        );
        assert_eq!(zero_grace.allowed_window(), Duration::from_secs(1));
    }

    #[test]
    fn test_description_falls_back_to_subject() {
        let st = SubjectState::from_heartbeat(&heartbeat("svc", Duration::from_secs(1)));
        assert_eq!(st.description, "svc");

        let st = SubjectState::from_heartbeat(
            &heartbeat("svc", Duration::from_secs(1)).with_description("My service"),
        );
        assert_eq!(st.description, "My service");
    }

    #[test]
    fn test_silence_is_clamped_for_future_timestamps() {
        let now = OffsetDateTime::now_utc();
        let st = SubjectState::from_heartbeat(
            &heartbeat("svc", Duration::from_secs(1)).generated_at(now + time::Duration::seconds(10)),
        );
        assert_eq!(st.silence(now), Duration::ZERO);
        assert_eq!(st.misses_for(Duration::from_millis(3500)), 3);
    }

    #[test]
    fn test_upsert_creates_then_updates_in_place() {
        let store = StateStore::new();
        assert_eq!(store.upsert(&heartbeat("svc", Duration::from_secs(1))), Upsert::Created);
        assert_eq!(
            store.upsert(
                &heartbeat("svc", Duration::from_secs(2))
                    .with_host("host-a")
                    .with_description("Service")
            ),
            Upsert::Updated
        );

        assert_eq!(store.len(), 1);
        let st = store.get("svc").unwrap();
        assert_eq!(st.interval, Duration::from_secs(2));
        assert_eq!(st.host, "host-a");
        assert_eq!(st.description, "Service");
    }

    #[test]
    fn test_upsert_resolves_active_alert() {
        let store = StateStore::new();
        store.upsert(&heartbeat("svc", Duration::from_secs(1)));
        store.for_each_mut(|st| {
            st.alert_active = true;
            st.miss_count = 4;
            st.last_alert = Some(OffsetDateTime::now_utc());
        });

        let later = store.get("svc").unwrap().last_seen + time::Duration::seconds(1);
        let outcome = store.upsert(&heartbeat("svc", Duration::from_secs(1)).generated_at(later));

        match outcome {
            Upsert::Resolved(event) => assert_eq!(event.subject, "svc"),
            other => panic!("expected Resolved, got {other:?}"),
        }
        let st = store.get("svc").unwrap();
        assert!(!st.alert_active);
        assert_eq!(st.miss_count, 0);
        assert_eq!(st.last_alert, None);
    }

    #[test]
    fn test_replayed_heartbeat_keeps_alert() {
        let store = StateStore::new();
        let sent = OffsetDateTime::now_utc() - time::Duration::minutes(10);
        let hb = heartbeat("svc", Duration::from_secs(60)).generated_at(sent);
        store.upsert(&hb);
        store.for_each_mut(|st| {
            st.alert_active = true;
            st.miss_count = 10;
            st.last_alert = Some(OffsetDateTime::now_utc());
        });

        assert_eq!(store.upsert(&hb), Upsert::Updated);

        let st = store.get("svc").unwrap();
        assert!(st.alert_active);
        assert_eq!(st.miss_count, 10);
        assert!(st.last_alert.is_some());
    }

    #[test]
    fn test_older_heartbeat_is_ignored() {
        let store = StateStore::new();
        let now = OffsetDateTime::now_utc();
        store.upsert(&heartbeat("svc", Duration::from_secs(1)).with_host("new").generated_at(now));

        let late = heartbeat("svc", Duration::from_secs(5))
            .with_host("old")
            .generated_at(now - time::Duration::seconds(30));
        assert_eq!(store.upsert(&late), Upsert::Stale);

        let st = store.get("svc").unwrap();
        assert_eq!(st.last_seen, now);
        assert_eq!(st.host, "new");
        assert_eq!(st.interval, Duration::from_secs(1));
    }

    #[test]
    fn test_subjects_are_case_sensitive() {
        let store = StateStore::new();
        store.upsert(&heartbeat("svc", Duration::from_secs(1)));
        store.upsert(&heartbeat("SVC", Duration::from_secs(1)));
        assert_eq!(store.len(), 2);
    }
}
