/**
 * PRIMER - Amorçage du cache depuis les messages retenus
 *
 * RÔLE : Le broker garde le dernier heartbeat retenu de chaque topic. Un abonnement
 * sur une connexion jetable les rejoue tous et remplit le StateStore avant
 * l'abonnement live.
 *
 * FIN : Plus aucune publication pendant `idle_timeout`, plafond `max_duration`
 * atteint, ou token annulé. Chaque message est acquitté (acks manuels).
 */

use crate::config::MqttConf;
use crate::ingest::IngestHandler;
use crate::mqtt::mqtt_options;
use rumqttc::{AsyncClient, ClientError, ConnectionError, Event, EventLoop, Incoming, QoS};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PrimeError {
    #[error("priming subscribe failed: {0}")]
    Subscribe(#[source] ClientError),

    #[error("priming ack failed: {0}")]
    Ack(#[source] ClientError),

    #[error("priming connection failed: {0}")]
    Connection(#[from] ConnectionError),
}

#[derive(Debug, Clone)]
pub struct PrimeConfig {
    pub topic: String,
    /// No publish for this long means the replay is over
    pub idle_timeout: Duration,
    /// Hard ceiling for the whole replay
    pub max_duration: Duration,
}

pub struct CachePrimer {
    mqtt: MqttConf,
    config: PrimeConfig,
    ingest: IngestHandler,
}

impl CachePrimer {
    pub fn new(mqtt: MqttConf, config: PrimeConfig, ingest: IngestHandler) -> Self {
        Self { mqtt, config, ingest }
    }

    /// Replays retained heartbeats into the ingest path. Returns how many were read.
    pub async fn prime(&self, cancel: &CancellationToken) -> Result<usize, PrimeError> {
        let mut opts = mqtt_options(&self.mqtt, &format!("{}-prime", self.mqtt.client_id));
        opts.set_manual_acks(true);
        let (client, mut eventloop) = AsyncClient::new(opts, 16);

        client
            .try_subscribe(self.config.topic.as_str(), QoS::AtLeastOnce)
            .map_err(PrimeError::Subscribe)?;

        let result = self.replay(&client, &mut eventloop, cancel).await;
        disconnect(&client, &mut eventloop).await;

        if let Ok(primed) = result {
            info!(topic = %self.config.topic, primed, "cache primed");
        }
        result
    }

    async fn replay(
        &self,
        client: &AsyncClient,
        eventloop: &mut EventLoop,
        cancel: &CancellationToken,
    ) -> Result<usize, PrimeError> {
        let ceiling = Instant::now() + self.config.max_duration;
        let mut idle_deadline = Instant::now() + self.config.idle_timeout;
        let mut primed = 0usize;

        loop {
            let deadline = idle_deadline.min(ceiling);
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(primed, "priming cancelled");
                    return Ok(primed);
                }
                polled = tokio::time::timeout_at(deadline, eventloop.poll()) => polled,
            };

            let event = match polled {
                Ok(event) => event?,
                Err(_) => {
                    if deadline == ceiling {
                        warn!(primed, max = ?self.config.max_duration, "priming hit its time ceiling");
                    }
                    return Ok(primed);
                }
            };

            if let Event::Incoming(Incoming::Publish(p)) = event {
                self.ingest.handle_payload(&p.topic, &p.payload);
                client.try_ack(&p).map_err(PrimeError::Ack)?;
                primed += 1;
                idle_deadline = Instant::now() + self.config.idle_timeout;
            }
        }
    }
}

async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if client.try_disconnect().is_err() {
        return;
    }
    // let the event loop flush the DISCONNECT packet
    let _ = tokio::time::timeout(Duration::from_millis(500), async {
        while eventloop.poll().await.is_ok() {}
    })
    .await;
}
