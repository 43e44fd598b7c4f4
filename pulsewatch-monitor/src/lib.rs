//! Pulsewatch monitor
//!
//! Tracks heartbeat subjects seen on the MQTT bus, raises alerts when a subject
//! goes quiet for longer than its allowed window and clears them when it
//! comes back. A status snapshot is served over HTTP.

pub mod config;
pub mod detector;
mod error;
pub mod health;
pub mod http;
pub mod ingest;
pub mod monitor;
pub mod mqtt;
pub mod notifier;
pub mod primer;
pub mod snapshot;
pub mod state;

pub use config::{load_config, ConfigError, MonitorConfig};
pub use detector::{MissDetector, ScanOutcome};
pub use error::MonitorError;
pub use ingest::{IngestHandler, IngestOutcome};
pub use monitor::Monitor;
pub use notifier::{Event, NopNotifier, Notifier, NotifyError, PushoverNotifier};
pub use primer::{CachePrimer, PrimeError};
pub use snapshot::{StatusResponse, StatusSnapshotter, SubjectStatus};
pub use state::{StateStore, SubjectState};
