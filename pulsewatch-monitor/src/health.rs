use crate::state::StateStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusStatus {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MonitorHealth {
    pub uptime_seconds: u64,
    pub subjects_tracked: u32,
    pub bus_status: BusStatus,
    pub bus_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    bus_reconnects: Arc<AtomicU32>,
    bus_status: Arc<Mutex<BusStatus>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            bus_reconnects: Arc::new(AtomicU32::new(0)),
            bus_status: Arc::new(Mutex::new(BusStatus::Connecting)),
        }
    }

    pub fn mark_bus_connected(&self) {
        *self.bus_status.lock() = BusStatus::Connected;
    }

    pub fn mark_bus_disconnected(&self) {
        *self.bus_status.lock() = BusStatus::Disconnected;
    }

    pub fn increment_reconnects(&self) {
        self.bus_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.bus_status.lock() = BusStatus::Reconnecting;
    }

    pub fn bus_status(&self) -> BusStatus {
        *self.bus_status.lock()
    }

    pub fn get_health(&self, store: &StateStore) -> MonitorHealth {
        MonitorHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            subjects_tracked: store.len() as u32,
            bus_status: self.bus_status(),
            bus_reconnects: self.bus_reconnects.load(Ordering::Relaxed),
        }
    }
}
