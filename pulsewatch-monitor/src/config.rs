use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::info;

pub const CONFIG_PATH_ENV: &str = "PULSEWATCH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "monitor.yaml";

const DEFAULT_POLL_EVERY: Duration = Duration::from_secs(1);
const DEFAULT_REPEAT_EVERY: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {key}={value:?}: {reason}")]
    Env {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub mqtt: MqttConf,
    /// Préfixe des topics heartbeat, sans `/` final
    pub prefix: String,
    /// Filtre rejoué au démarrage depuis les messages retenus (désactivé si absent)
    pub prime_topic: Option<String>,
    #[serde(with = "humantime_serde")]
    pub prime_idle_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub prime_max_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_every: Duration,
    #[serde(with = "humantime_serde")]
    pub repeat_every: Duration,
    /// Adresse du serveur de status, vide pour le désactiver
    pub status_addr: String,
    pub notify: NotifyConf,
    pub reconnect: ReconnectConf,
    pub pushover: PushoverConf,
    pub debug: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct NotifyConf {
    pub concurrency: usize,
    pub queue: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ReconnectConf {
    #[serde(with = "humantime_serde")]
    pub min: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PushoverConf {
    pub user: String,
    pub token: String,
}

impl PushoverConf {
    pub fn is_configured(&self) -> bool {
        !self.user.is_empty() && !self.token.is_empty()
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf::default(),
            prefix: "heartbeat".into(),
            prime_topic: None,
            prime_idle_timeout: Duration::from_secs(2),
            prime_max_duration: Duration::from_secs(30),
            poll_every: DEFAULT_POLL_EVERY,
            repeat_every: DEFAULT_REPEAT_EVERY,
            status_addr: "127.0.0.1:8080".into(),
            notify: NotifyConf::default(),
            reconnect: ReconnectConf::default(),
            pushover: PushoverConf::default(),
            debug: false,
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "pulsewatch-monitor".into(),
            keep_alive: Duration::from_secs(15),
        }
    }
}

impl Default for NotifyConf {
    fn default() -> Self {
        Self {
            concurrency: 8,
            queue: 1024,
        }
    }
}

impl Default for ReconnectConf {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

impl MonitorConfig {
    /// Lit le fichier YAML s'il existe. Absent ou vide : valeurs par défaut.
    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&txt).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Surcharges clé par clé depuis l'environnement
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("PULSEWATCH_MQTT_HOST") {
            self.mqtt.host = v;
        }
        if let Some(v) = get("PULSEWATCH_MQTT_PORT") {
            self.mqtt.port = v.parse().map_err(|e: std::num::ParseIntError| ConfigError::Env {
                key: "PULSEWATCH_MQTT_PORT",
                value: v.clone(),
                reason: e.to_string(),
            })?;
        }
        if let Some(v) = get("PULSEWATCH_PREFIX") {
            self.prefix = v;
        }
        if let Some(v) = get("PULSEWATCH_PRIME_TOPIC") {
            self.prime_topic = Some(v);
        }
        if let Some(v) = get("PULSEWATCH_POLL_EVERY") {
            self.poll_every = env_duration("PULSEWATCH_POLL_EVERY", v)?;
        }
        if let Some(v) = get("PULSEWATCH_REPEAT_EVERY") {
            self.repeat_every = env_duration("PULSEWATCH_REPEAT_EVERY", v)?;
        }
        // empty is meaningful here: it disables the status server
        if let Some(v) = lookup("PULSEWATCH_STATUS_ADDR") {
            self.status_addr = v;
        }
        if let Some(v) = get("PUSHOVER_USER") {
            self.pushover.user = v;
        }
        if let Some(v) = get("PUSHOVER_TOKEN") {
            self.pushover.token = v;
        }
        if let Some(v) = get("PULSEWATCH_DEBUG") {
            self.debug = is_truthy(&v);
        }
        Ok(())
    }

    /// Ramène les valeurs hors domaine aux valeurs par défaut
    pub fn normalize(mut self) -> Self {
        self.prefix = pulsewatch_heartbeat::normalize_prefix(&self.prefix).to_string();
        self.prime_topic = self.prime_topic.filter(|t| !t.trim().is_empty());
        if self.poll_every.is_zero() {
            self.poll_every = DEFAULT_POLL_EVERY;
        }
        if self.repeat_every.is_zero() {
            self.repeat_every = DEFAULT_REPEAT_EVERY;
        }
        if self.notify.concurrency == 0 {
            self.notify.concurrency = NotifyConf::default().concurrency;
        }
        if self.notify.queue == 0 {
            self.notify.queue = NotifyConf::default().queue;
        }
        if self.reconnect.min.is_zero() {
            self.reconnect.min = ReconnectConf::default().min;
        }
        if self.reconnect.max < self.reconnect.min {
            self.reconnect.max = self.reconnect.min;
        }
        self
    }
}

fn env_duration(key: &'static str, value: String) -> Result<Duration, ConfigError> {
    humantime::parse_duration(&value).map_err(|e| ConfigError::Env {
        key,
        reason: e.to_string(),
        value,
    })
}

/// Fichier (`PULSEWATCH_CONFIG`, défaut `monitor.yaml`) puis environnement
/// Valeur booléenne d'environnement : 1, true, yes, on (casse ignorée)
pub fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

pub async fn load_config() -> Result<MonitorConfig, ConfigError> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut cfg = MonitorConfig::from_file(Path::new(&path)).await?;
    cfg.apply_env(|key| std::env::var(key).ok())?;
    Ok(cfg.normalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = MonitorConfig::from_file(&dir.path().join("absent.yaml")).await.unwrap();
        assert_eq!(cfg, MonitorConfig::default());
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.repeat_every, Duration::from_secs(43_200));
    }

    #[tokio::test]
    async fn test_yaml_with_humantime_durations() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "mqtt:\n  host: broker.lan\nprefix: beats/\nprime_topic: beats/#\npoll_every: 500ms\nrepeat_every: 1h 30m\nnotify:\n  concurrency: 2\nstatus_addr: \"\""
        )
        .unwrap();

        let cfg = MonitorConfig::from_file(file.path()).await.unwrap().normalize();

        assert_eq!(cfg.mqtt.host, "broker.lan");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.prefix, "beats");
        assert_eq!(cfg.prime_topic.as_deref(), Some("beats/#"));
        assert_eq!(cfg.poll_every, Duration::from_millis(500));
        assert_eq!(cfg.repeat_every, Duration::from_secs(5400));
        assert_eq!(cfg.notify.concurrency, 2);
        assert_eq!(cfg.notify.queue, 1024);
        assert!(cfg.status_addr.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_yaml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_every: [not, a, duration]").unwrap();

        let err = MonitorConfig::from_file(file.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_truthy_debug_values() {
        for v in ["1", "true", "TRUE", " yes ", "On"] {
            assert!(is_truthy(v), "{v}");
        }
        for v in ["", "0", "false", "off", "debug"] {
            assert!(!is_truthy(v), "{v}");
        }
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = MonitorConfig::default();
        cfg.apply_env(env(&[
            ("PULSEWATCH_MQTT_HOST", "mqtt.internal"),
            ("PULSEWATCH_MQTT_PORT", "8883"),
            ("PULSEWATCH_REPEAT_EVERY", "2h"),
            ("PULSEWATCH_STATUS_ADDR", ""),
            ("PUSHOVER_USER", "u"),
            ("PUSHOVER_TOKEN", "t"),
            ("PULSEWATCH_DEBUG", "TRUE"),
        ]))
        .unwrap();

        assert_eq!(cfg.mqtt.host, "mqtt.internal");
        assert_eq!(cfg.mqtt.port, 8883);
        assert_eq!(cfg.repeat_every, Duration::from_secs(7200));
        assert!(cfg.status_addr.is_empty());
        assert!(cfg.pushover.is_configured());
        assert!(cfg.debug);
        assert_eq!(cfg.poll_every, Duration::from_secs(1));
    }

    #[test]
    fn test_bad_env_values_are_rejected() {
        let mut cfg = MonitorConfig::default();
        let err = cfg.apply_env(env(&[("PULSEWATCH_MQTT_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: "PULSEWATCH_MQTT_PORT", .. }));

        let err = cfg.apply_env(env(&[("PULSEWATCH_POLL_EVERY", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: "PULSEWATCH_POLL_EVERY", .. }));
    }

    #[test]
    fn test_normalize_restores_defaults() {
        let mut cfg = MonitorConfig {
            poll_every: Duration::ZERO,
            repeat_every: Duration::ZERO,
            prime_topic: Some("  ".into()),
            ..MonitorConfig::default()
        };
        cfg.reconnect = ReconnectConf {
            min: Duration::from_secs(5),
            max: Duration::from_secs(1),
        };

        let cfg = cfg.normalize();

        assert_eq!(cfg.poll_every, Duration::from_secs(1));
        assert_eq!(cfg.repeat_every, Duration::from_secs(43_200));
        assert_eq!(cfg.prime_topic, None);
        assert_eq!(cfg.reconnect.max, Duration::from_secs(5));
    }
}
