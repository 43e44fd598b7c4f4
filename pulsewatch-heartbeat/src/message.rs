/**
 * MESSAGE - Heartbeat échangé sur MQTT
 *
 * RÔLE : Format JSON du heartbeat, validation des champs obligatoires.
 */

use crate::error::MessageError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::macros::datetime;
use time::OffsetDateTime;

/// Zero value of timestamps written by Go publishers.
const GO_ZERO_TIME: OffsetDateTime = datetime!(0001-01-01 00:00 UTC);

/// One heartbeat, as published by a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub subject: String,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    /// Expected heartbeat period.
    #[serde(with = "crate::duration")]
    pub interval: Duration,
    /// Legacy miss threshold. Decoded for compatibility, no longer used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skippable: Option<u32>,
    /// Maximum silence tolerated before alerting; overrides `interval` when > 0.
    #[serde(
        default,
        with = "crate::duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub grace_period: Option<Duration>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
}

impl Heartbeat {
    /// Heartbeat for `subject` generated now.
    pub fn new(subject: impl Into<String>, interval: Duration) -> Self {
        Self {
            subject: subject.into(),
            generated_at: OffsetDateTime::now_utc(),
            interval,
            skippable: None,
            grace_period: None,
            description: String::new(),
            host: String::new(),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace_period = Some(grace);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn generated_at(mut self, at: OffsetDateTime) -> Self {
        self.generated_at = at;
        self
    }

    /// Decodes and validates a payload received from the bus.
    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        let msg: Heartbeat = serde_json::from_slice(payload)?;
        msg.validate()?;
        Ok(msg)
    }

    /// Validates then renders the message as JSON.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        self.validate()?;
        Ok(serde_json::to_vec(self)?)
    }

    /// Checks required fields. Negative durations never get this far, the
    /// decoder rejects them.
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.subject.is_empty() {
            return Err(MessageError::MissingSubject);
        }
        if is_zero_time(self.generated_at) {
            return Err(MessageError::MissingGeneratedAt);
        }
        if self.interval.is_zero() {
            return Err(MessageError::NonPositiveInterval(self.interval));
        }
        Ok(())
    }

    /// Label used in alerts: the description, or the subject when empty.
    pub fn description_or_subject(&self) -> &str {
        if self.description.is_empty() {
            &self.subject
        } else {
            &self.description
        }
    }
}

/// Both the Go zero time and the Unix epoch count as "not set".
pub fn is_zero_time(at: OffsetDateTime) -> bool {
    at == GO_ZERO_TIME || at == OffsetDateTime::UNIX_EPOCH
}
