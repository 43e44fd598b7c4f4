/**
 * TOPICS - Helpers de topics MQTT
 *
 * RÔLE : Normalisation du préfixe, filtre d'abonnement, topic d'un sujet.
 */

/// Trims surrounding whitespace and any trailing `/` from a prefix.
pub fn normalize_prefix(prefix: &str) -> &str {
    prefix.trim().trim_end_matches('/')
}

/// Wildcard filter covering every subject under `prefix`.
/// Ex: "heartbeat" -> "heartbeat/#", "" -> "#"
pub fn subscription_filter(prefix: &str) -> String {
    let prefix = normalize_prefix(prefix);
    if prefix.is_empty() {
        "#".to_string()
    } else {
        format!("{prefix}/#")
    }
}

/// Topic a subject publishes on.
/// Ex: ("heartbeat", "backup") -> "heartbeat/backup"
pub fn topic_for(prefix: &str, subject: &str) -> String {
    let prefix = normalize_prefix(prefix);
    if prefix.is_empty() {
        subject.to_string()
    } else {
        format!("{prefix}/{subject}")
    }
}
