/**
 * PULSEWATCH MONITOR - Point d'entrée du moniteur de heartbeats
 *
 * RÔLE : Charge la config (.env, YAML, environnement), installe le logging,
 * choisit le notifier puis lance le Monitor jusqu'à SIGINT/SIGTERM.
 */

use anyhow::{Context, Result};
use pulsewatch_monitor::config::{is_truthy, PushoverConf};
use pulsewatch_monitor::{load_config, Monitor, NopNotifier, Notifier, PushoverNotifier};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

type LogFilter = reload::Handle<EnvFilter, Registry>;

#[tokio::main]
async fn main() -> Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    // logging avant la config, pour voir ce que fait son chargement
    let env_debug = std::env::var("PULSEWATCH_DEBUG").is_ok_and(|v| is_truthy(&v));
    let log_filter = init_logging(env_debug);

    let cfg = load_config().await.context("failed to load monitor config")?;
    if cfg.debug && !env_debug {
        if let Err(e) = log_filter.reload(env_filter(true)) {
            warn!(error = %e, "could not raise log level to debug");
        }
    }
    info!(
        broker = %format!("{}:{}", cfg.mqtt.host, cfg.mqtt.port),
        prefix = %cfg.prefix,
        status_addr = %cfg.status_addr,
        "pulsewatch monitor starting"
    );

    let notifier = build_notifier(&cfg.pushover);

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested");
        stop.cancel();
    });

    let span = info_span!("monitor", prefix = %cfg.prefix);
    Monitor::new(cfg, notifier, span)
        .run(cancel)
        .await
        .context("monitor failed")?;

    info!("shutdown complete");
    Ok(())
}

/// RUST_LOG prime, sinon debug/info selon le flag
fn env_filter(debug: bool) -> EnvFilter {
    let default = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

fn init_logging(debug: bool) -> LogFilter {
    let (filter, handle) = reload::Layer::new(env_filter(debug));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
    handle
}

fn build_notifier(conf: &PushoverConf) -> Arc<dyn Notifier> {
    if !conf.is_configured() {
        warn!("pushover credentials missing, notifications disabled");
        return Arc::new(NopNotifier);
    }
    match PushoverNotifier::new(conf.token.clone(), conf.user.clone()) {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => {
            warn!(error = %e, "pushover notifier unavailable, notifications disabled");
            Arc::new(NopNotifier)
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
