/*!
Mock MQTT Client pour tests sans broker

Permet de tester publishers et consommateurs de heartbeats sans démarrer
un broker MQTT réel. Enregistre tous les messages publiés et permet de
simuler la réception.
*/

use anyhow::Result;
use async_trait::async_trait;
use pulsewatch_heartbeat::{HeartbeatSink, PublishError};
use rumqttc::QoS;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Mock MQTT Client qui simule rumqttc::AsyncClient
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    message_sender: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
    failing: Arc<Mutex<bool>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration d'un channel pour recevoir les messages simulés
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.message_sender.lock().unwrap() = Some(sender);
        receiver
    }

    /// Fait échouer (ou non) les publications suivantes
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// Simule la publication d'un message (compatible avec AsyncClient)
    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        if *self.failing.lock().unwrap() {
            anyhow::bail!("mock broker unavailable");
        }

        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        };

        self.published_messages.lock().unwrap().push(message.clone());
        tracing::debug!(topic = %message.topic, bytes = message.payload.len(), "[mock] published");
        Ok(())
    }

    /// Simule l'abonnement à un topic (compatible avec AsyncClient)
    pub async fn subscribe<S: Into<String>>(&self, topic: S, _qos: QoS) -> Result<()> {
        let topic = topic.into();
        self.subscriptions.lock().unwrap().push(topic.clone());
        tracing::debug!(topic = %topic, "[mock] subscribed");
        Ok(())
    }

    /// Simule la réception d'un message (pour tests)
    pub async fn simulate_incoming<S, V>(&self, topic: S, payload: V, retain: bool) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain,
        };

        if let Some(sender) = self.message_sender.lock().unwrap().as_ref() {
            sender
                .send(message.clone())
                .map_err(|e| anyhow::anyhow!("Send error: {}", e))?;
        }

        tracing::debug!(topic = %message.topic, "[mock] simulated incoming");
        Ok(())
    }

    /// Récupère tous les messages publiés (pour assertions de tests)
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    /// Récupère les abonnements (pour assertions de tests)
    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Trouve les messages publiés sur un topic donné
    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse le dernier message d'un topic en JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        if let Some(last_msg) = messages.last() {
            let parsed: T = serde_json::from_slice(&last_msg.payload)?;
            Ok(Some(parsed))
        } else {
            Ok(None)
        }
    }

    /// Reset tous les messages enregistrés
    pub fn clear(&self) {
        self.published_messages.lock().unwrap().clear();
        self.subscriptions.lock().unwrap().clear();
    }
}

#[async_trait]
impl HeartbeatSink for MockMqttClient {
    async fn publish_retained(&self, topic: String, payload: Vec<u8>) -> Result<(), PublishError> {
        self.publish(topic, QoS::AtLeastOnce, true, payload)
            .await
            .map_err(|e| PublishError::Sink(e.to_string()))
    }
}

/// Helper pour créer des payloads heartbeat au format du fil
pub struct HeartbeatPayloads;

impl HeartbeatPayloads {
    /// Heartbeat valide généré à `generated_at`
    pub fn heartbeat(subject: &str, interval_secs: u64, generated_at: OffsetDateTime) -> Value {
        serde_json::json!({
            "subject": subject,
            "generated_at": generated_at.format(&Rfc3339).unwrap_or_default(),
            "interval": interval_secs * 1_000_000_000,
        })
    }

    /// Heartbeat valide avec grace period, description et host
    pub fn heartbeat_full(
        subject: &str,
        interval_secs: u64,
        grace_secs: u64,
        description: &str,
        host: &str,
        generated_at: OffsetDateTime,
    ) -> Value {
        let mut hb = Self::heartbeat(subject, interval_secs, generated_at);
        hb["grace_period"] = Value::from(grace_secs * 1_000_000_000);
        hb["description"] = Value::from(description);
        hb["host"] = Value::from(host);
        hb
    }

    /// Heartbeat sans sujet (rejeté par la validation)
    pub fn missing_subject(generated_at: OffsetDateTime) -> Value {
        serde_json::json!({
            "generated_at": generated_at.format(&Rfc3339).unwrap_or_default(),
            "interval": 1_000_000_000u64,
        })
    }

    /// Encode un payload en bytes prêts à publier
    pub fn bytes(payload: &Value) -> Vec<u8> {
        serde_json::to_vec(payload).unwrap_or_default()
    }
}
