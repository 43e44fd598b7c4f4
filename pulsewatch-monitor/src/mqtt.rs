/**
 * MQTT - Abonnement live aux heartbeats
 *
 * RÔLE : Connexion au broker, abonnement `prefix/#` (re-émis à chaque ConnAck),
 * passage des publications à l'IngestHandler.
 *
 * RECONNEXION : Backoff exponentiel min -> max, remis à zéro sur ConnAck.
 * On n'abandonne jamais tant que le token n'est pas annulé.
 */

use crate::config::{MqttConf, ReconnectConf};
use crate::health::HealthTracker;
use crate::ingest::IngestHandler;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub fn mqtt_options(conf: &MqttConf, client_id: &str) -> MqttOptions {
    let mut opts = MqttOptions::new(client_id, &conf.host, conf.port);
    opts.set_keep_alive(conf.keep_alive);
    opts.set_clean_session(true);
    opts
}

/// Délai de reconnexion exponentiel borné
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(conf: ReconnectConf) -> Self {
        Self {
            min: conf.min,
            max: conf.max,
            current: conf.min,
        }
    }

    /// Délai à attendre maintenant, puis double le suivant
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

pub struct BusListener {
    client: AsyncClient,
    eventloop: EventLoop,
    filter: String,
    ingest: IngestHandler,
    health: HealthTracker,
    backoff: Backoff,
}

impl BusListener {
    pub fn new(
        conf: &MqttConf,
        prefix: &str,
        reconnect: ReconnectConf,
        ingest: IngestHandler,
        health: HealthTracker,
    ) -> Self {
        let (client, eventloop) = AsyncClient::new(mqtt_options(conf, &conf.client_id), 64);
        Self {
            client,
            eventloop,
            filter: pulsewatch_heartbeat::subscription_filter(prefix),
            ingest,
            health,
            backoff: Backoff::new(reconnect),
        }
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(filter = %self.filter, "bus listener starting");

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.eventloop.poll() => polled,
            };

            match polled {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    self.health.mark_bus_connected();
                    self.backoff.reset();
                    if let Err(e) = self.client.try_subscribe(self.filter.as_str(), QoS::AtLeastOnce) {
                        warn!(filter = %self.filter, error = %e, "subscribe failed");
                    } else {
                        info!(filter = %self.filter, "bus connected, subscribed");
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    self.ingest.handle_payload(&p.topic, &p.payload);
                }
                Ok(_) => {}
                Err(e) => {
                    self.health.mark_bus_disconnected();
                    let delay = self.backoff.next_delay();
                    warn!(error = %e, retry_in = ?delay, "bus connection lost");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => self.health.increment_reconnects(),
                    }
                }
            }
        }

        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "bus disconnect request failed");
        }
        self.health.mark_bus_disconnected();
        info!("bus listener stopped");
    }
}
