/**
 * PUBLISHER - Publication des heartbeats
 *
 * RÔLE : Complète (horodatage, host), valide puis publie en QoS 1 avec le flag
 * retain. Le broker garde ainsi le dernier heartbeat de chaque sujet, que le
 * moniteur rejoue au démarrage pour amorcer son cache.
 */

use crate::error::PublishError;
use crate::message::{is_zero_time, Heartbeat};
use crate::topic::{normalize_prefix, topic_for};
use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use time::OffsetDateTime;
use tracing::debug;

/// Anything able to publish a retained payload on a topic.
#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    async fn publish_retained(&self, topic: String, payload: Vec<u8>) -> Result<(), PublishError>;
}

#[async_trait]
impl HeartbeatSink for AsyncClient {
    async fn publish_retained(&self, topic: String, payload: Vec<u8>) -> Result<(), PublishError> {
        self.publish(topic, QoS::AtLeastOnce, true, payload).await?;
        Ok(())
    }
}

/// Local machine name, `None` when it cannot be determined.
pub fn local_hostname() -> Option<String> {
    let host = gethostname::gethostname().to_string_lossy().into_owned();
    (!host.is_empty()).then_some(host)
}

/// Sends heartbeats under a topic prefix.
pub struct Publisher<S> {
    sink: S,
    prefix: String,
    hostname: fn() -> Option<String>,
}

impl<S: HeartbeatSink> Publisher<S> {
    pub fn new(sink: S, prefix: &str) -> Self {
        Self {
            sink,
            prefix: normalize_prefix(prefix).to_string(),
            hostname: local_hostname,
        }
    }

    /// Replaces the hostname lookup used to fill in missing hosts.
    pub fn with_hostname_source(mut self, source: fn() -> Option<String>) -> Self {
        self.hostname = source;
        self
    }

    pub fn topic_for(&self, subject: &str) -> String {
        topic_for(&self.prefix, subject)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Stamps, validates and publishes `msg`. Returns the topic used.
    pub async fn publish(&self, msg: Heartbeat) -> Result<String, PublishError> {
        let msg = self.prepare(msg);
        let payload = msg.encode()?;
        let topic = self.topic_for(&msg.subject);
        self.sink.publish_retained(topic.clone(), payload).await?;
        debug!(topic = %topic, interval = ?msg.interval, grace = ?msg.grace_period, "heartbeat published");
        Ok(topic)
    }

    fn prepare(&self, mut msg: Heartbeat) -> Heartbeat {
        if is_zero_time(msg.generated_at) {
            msg.generated_at = OffsetDateTime::now_utc();
        }
        if msg.host.is_empty() {
            if let Some(host) = (self.hostname)() {
                msg.host = host;
            }
        }
        msg
    }
}
