/**
 * ERRORS - Erreurs du protocole heartbeat
 *
 * RÔLE : Décodage/validation des messages et publication sur le bus.
 */

use thiserror::Error;

/// Errors raised while decoding or validating a heartbeat.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid heartbeat JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("subject is required")]
    MissingSubject,

    #[error("generated_at is required")]
    MissingGeneratedAt,

    #[error("interval must be >0, got {0:?}")]
    NonPositiveInterval(std::time::Duration),
}

/// Errors raised by `Publisher::publish`.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Invalid(#[from] MessageError),

    #[error("MQTT publish failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("publish failed: {0}")]
    Sink(String),
}
