use anyhow::{bail, Context};
use clap::Parser;
use pulsewatch_heartbeat::{Heartbeat, HeartbeatSink, Publisher};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions};
use std::future::Future;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::{sleep, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(60);

/// Publie un heartbeat pour un sujet, à intervalle fixe
#[derive(Parser, Debug, Clone)]
#[command(name = "pulsewatch-agent", version, about)]
struct Args {
    #[arg(long, env = "PULSEWATCH_MQTT_HOST", default_value = "localhost")]
    mqtt_host: String,

    #[arg(long, env = "PULSEWATCH_MQTT_PORT", default_value_t = 1883)]
    mqtt_port: u16,

    /// Préfixe de topic (vide : le sujet est le topic)
    #[arg(long, env = "PULSEWATCH_PREFIX", default_value = "heartbeat")]
    prefix: String,

    #[arg(long, env = "PULSEWATCH_SUBJECT")]
    subject: String,

    #[arg(long, env = "PULSEWATCH_INTERVAL", default_value = "15s", value_parser = humantime::parse_duration)]
    interval: Duration,

    /// Ancien seuil de battements manqués, transmis tel quel
    #[arg(long, env = "PULSEWATCH_SKIPPABLE")]
    skippable: Option<u32>,

    /// Silence maximum toléré avant alerte
    #[arg(long, env = "PULSEWATCH_GRACE", value_parser = humantime::parse_duration)]
    grace: Option<Duration>,

    #[arg(long, env = "PULSEWATCH_DESCRIPTION", default_value = "")]
    description: String,

    /// Défaut : nom de la machine
    #[arg(long, env = "PULSEWATCH_HOST")]
    host: Option<String>,

    #[arg(long, env = "PULSEWATCH_DEBUG")]
    debug: bool,
}

fn build_heartbeat(args: &Args) -> Heartbeat {
    let mut hb = Heartbeat::new(args.subject.clone(), args.interval).with_description(args.description.clone());
    if let Some(skippable) = args.skippable.filter(|s| *s > 0) {
        hb.skippable = Some(skippable);
    }
    if let Some(grace) = args.grace.filter(|g| !g.is_zero()) {
        hb = hb.with_grace(grace);
    }
    if let Some(host) = args.host.as_deref().filter(|h| !h.is_empty()) {
        hb = hb.with_host(host);
    }
    hb
}

/// Publie immédiatement puis à chaque intervalle jusqu'à `shutdown`.
/// Retourne le nombre de heartbeats publiés.
async fn publish_loop<S, F>(publisher: &Publisher<S>, args: &Args, shutdown: F) -> usize
where
    S: HeartbeatSink,
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(args.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);
    let mut published = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                match publisher.publish(build_heartbeat(args)).await {
                    Ok(topic) => {
                        published += 1;
                        debug!(topic = %topic, "heartbeat sent");
                    }
                    Err(e) => error!(subject = %args.subject, error = %e, "publish heartbeat failed"),
                }
            }
        }
    }
    published
}

/// Fait tourner la boucle rumqttc avec backoff exponentiel jusqu'à l'arrêt
async fn drive_eventloop(mut eventloop: EventLoop, mut stop: watch::Receiver<bool>) {
    let mut delay = RECONNECT_MIN;
    loop {
        let polled = tokio::select! {
            _ = stop.changed() => break,
            polled = eventloop.poll() => polled,
        };
        match polled {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                delay = RECONNECT_MIN;
                info!("connected to broker");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, retry_in = ?delay, "MQTT connection error");
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = sleep(delay) => {}
                }
                delay = (delay * 2).min(RECONNECT_MAX);
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    if args.subject.trim().is_empty() {
        bail!("subject is required");
    }
    if args.interval.is_zero() {
        bail!("interval must be > 0");
    }

    let client_id = format!("pulsewatch-agent-{}-{}", args.subject, std::process::id());
    let mut opts = MqttOptions::new(client_id, &args.mqtt_host, args.mqtt_port);
    opts.set_keep_alive(Duration::from_secs(30));
    let (client, eventloop) = AsyncClient::new(opts, 10);

    let (stop_tx, stop_rx) = watch::channel(false);
    let driver = tokio::spawn(drive_eventloop(eventloop, stop_rx));

    let publisher = Publisher::new(client.clone(), &args.prefix);
    info!(
        topic = %publisher.topic_for(&args.subject),
        interval = %humantime::format_duration(args.interval),
        "agent started"
    );

    let published = publish_loop(&publisher, &args, shutdown_signal()).await;
    info!(published, "shutting down");

    if let Err(e) = client.disconnect().await {
        debug!(error = %e, "disconnect request failed");
    }
    // laisse la boucle envoyer le DISCONNECT
    sleep(Duration::from_millis(200)).await;
    let _ = stop_tx.send(true);
    driver.await.context("event loop task failed")?;
    Ok(())
}
