use crate::derived::{DerivedValues, Period};
use crate::error::Result;
use crate::polling::RawSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Coordinator lifecycle as seen by adapters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CoordinatorState {
    Initializing,
    Disconnected,
    Connecting,
    Reading,
    Processing,
    Persisting,
    Sleeping,
    /// Offline window elapsed; the integration is unavailable
    Unavailable,
    ShuttingDown,
}

/// Everything one tick produced
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub site_id: String,
    /// Counts published snapshots
    pub sequence: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub raw: RawSnapshot,
    pub derived: DerivedValues,
    /// Last good data served while the device is unreachable
    pub stale: bool,
    pub available: bool,
}

impl Snapshot {
    /// Display value of a register or derived sensor
    pub fn value(&self, key: &str) -> Option<f64> {
        match self.raw.get(key) {
            Some(v) => Some(v.display()),
            None => self.derived.get(key),
        }
    }

    /// Enum label of a text-mapped register
    pub fn label(&self, key: &str) -> Option<&'static str> {
        self.raw.get(key).and_then(|v| v.label())
    }
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    SnapshotUpdated(Arc<Snapshot>),
    PeriodReset { scope: Period, site_id: String },
}

/// Receives engine events; called from the coordinator task, so
/// implementations must not block
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

/// Requests processed between ticks
#[derive(Debug)]
pub enum CoordinatorCommand {
    ReadRegister {
        address: u16,
        count: u16,
        reply: oneshot::Sender<Result<Vec<u16>>>,
    },
    /// `value` in −32768..=65535; negatives are written as int16
    WriteRegister {
        address: u16,
        value: i32,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    /// Scaled write to a writable template, e.g. `hc1_target_room_temperature`
    WriteSensor {
        sensor_id: String,
        value: f64,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    /// Re-read the overrides document, re-plan, re-check sensor identities
    Reload,
    Reset(Period),
}
