use crate::config::ConfigError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("status server cannot bind {addr}: {source}")]
    StatusBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("status server failed: {0}")]
    StatusServe(#[source] std::io::Error),

    #[error("status server did not shut down within {0:?}")]
    StatusShutdownTimeout(Duration),
}
