/**
 * STATUS SNAPSHOT - Vue cohérente de tous les sujets
 *
 * RÔLE : Lecture seule du StateStore à un instant `observed_at` unique.
 * Ne modifie jamais l'état d'alerte et n'envoie rien.
 */

use crate::state::{StateStore, SubjectState};
use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;

/// Corps de `GET /status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
    pub subjects: Vec<SubjectStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectStatus {
    pub subject: String,
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    pub interval: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace: Option<String>,
    pub allowed_window: String,
    pub missing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miss_for: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miss_count: Option<u64>,
    pub alert_active: bool,
}

impl SubjectStatus {
    fn observe(st: &SubjectState, now: OffsetDateTime) -> Self {
        let allowed = st.allowed_window();
        let elapsed = st.silence(now);
        let missing = elapsed > allowed;

        Self {
            subject: st.subject.clone(),
            description: st.description.clone(),
            host: st.host.clone(),
            last_seen: st.last_seen,
            interval: format_duration(st.interval),
            grace: st.grace.filter(|g| !g.is_zero()).map(format_duration),
            allowed_window: format_duration(allowed),
            missing,
            miss_for: missing.then(|| format_duration(elapsed)),
            miss_count: missing.then(|| st.misses_for(elapsed)),
            alert_active: st.alert_active,
        }
    }
}

#[derive(Clone)]
pub struct StatusSnapshotter {
    store: StateStore,
}

impl StatusSnapshotter {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Tous les sujets observés à `now`, triés par nom
    pub fn snapshot(&self, now: OffsetDateTime) -> StatusResponse {
        let mut subjects: Vec<SubjectStatus> = self
            .store
            .snapshot()
            .iter()
            .map(|st| SubjectStatus::observe(st, now))
            .collect();
        subjects.sort_by(|a, b| a.subject.cmp(&b.subject));

        StatusResponse {
            observed_at: now,
            subjects,
        }
    }
}

/// Durée lisible (`3s`, `1m 30s`), tronquée à la milliseconde
pub fn format_duration(d: Duration) -> String {
    let millis = Duration::from_millis(d.as_millis().min(u64::MAX as u128) as u64);
    humantime::format_duration(millis).to_string()
}
