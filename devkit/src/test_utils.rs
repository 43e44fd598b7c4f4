/*!
Test Harness pour composants Pulsewatch

Facilite l'écriture de tests avec:
- Setup automatique du mock MQTT et du logging
- Attentes sur le nombre de heartbeats publiés par topic
- Simulation de heartbeats entrants
*/

use crate::mqtt_stub::{HeartbeatPayloads, MockMqttClient};
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;

/// Harness de test complet pour publishers et consommateurs
pub struct TestHarness {
    pub mqtt_client: MockMqttClient,
    prefix: String,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    topic: String,
    expected_count: usize,
}

/// Initialise le logging des tests (idempotent)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl TestHarness {
    /// Crée un nouveau harness de test pour un préfixe de topics
    pub fn new(prefix: &str) -> Self {
        init_test_tracing();

        Self {
            mqtt_client: MockMqttClient::new(),
            prefix: pulsewatch_heartbeat::normalize_prefix(prefix).to_string(),
            expectations: Vec::new(),
        }
    }

    pub fn topic(&self, subject: &str) -> String {
        pulsewatch_heartbeat::topic_for(&self.prefix, subject)
    }

    /// Ajoute une expectation: on s'attend à N messages sur le topic du sujet
    pub fn expect_heartbeats(&mut self, subject: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            topic: self.topic(subject),
            expected_count: count,
        });
        self
    }

    /// Simule l'arrivée d'un heartbeat valide généré maintenant
    pub async fn send_heartbeat(&self, subject: &str, interval_secs: u64) -> Result<()> {
        let payload = HeartbeatPayloads::heartbeat(subject, interval_secs, OffsetDateTime::now_utc());
        self.mqtt_client
            .simulate_incoming(self.topic(subject), HeartbeatPayloads::bytes(&payload), false)
            .await?;
        tracing::debug!(subject, "sent test heartbeat");
        Ok(())
    }

    /// Attend qu'un message soit publié sur le topic du sujet
    pub async fn wait_for_heartbeat(&self, subject: &str, timeout_ms: u64) -> Result<Option<Value>> {
        let topic = self.topic(subject);
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(&topic)? {
                return Ok(Some(msg));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        tracing::warn!(topic = %topic, "timeout waiting for heartbeat");
        Ok(None)
    }

    /// Vérifie toutes les expectations configurées
    pub fn verify_expectations(&self) -> Result<()> {
        for expectation in &self.expectations {
            let actual_count = self.mqtt_client.find_messages_by_topic(&expectation.topic).len();

            if actual_count != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for topic '{}': expected {} messages, got {}",
                    expectation.topic,
                    expectation.expected_count,
                    actual_count
                );
            }
        }
        Ok(())
    }

    /// Nombre de messages publiés par topic
    pub fn topic_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for msg in self.mqtt_client.get_published_messages() {
            *counts.entry(msg.topic).or_insert(0) += 1;
        }
        counts
    }

    /// Reset le harness pour un nouveau test
    pub fn reset(&mut self) {
        self.mqtt_client.clear();
        self.expectations.clear();
    }
}
