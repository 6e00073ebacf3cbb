//! Module auto-detection
//!
//! Probes one stable register per candidate subunit. A subunit is present
//! when the probe answers with a plausible value; a read error or one of the
//! "not installed" sentinels means absent. Counting stops at the first
//! absent index.

use crate::config::DetectionConfig;
use crate::error::{LambdaError, Result};
use crate::logging::get_logger;
use crate::modbus::ModbusTransport;
use crate::registers::{SubunitKind, SystemShape};
use crate::retry::RobustReader;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Raw values the firmware reports for blocks of uninstalled modules
pub const ABSENT_SENTINELS: [u16; 3] = [0x7FFF, 0xFFFF, 0x8000];

/// Probe register (relative address) for a kind
pub const fn probe_register(kind: SubunitKind) -> u16 {
    match kind {
        // operating_state
        SubunitKind::Hp => 3,
        _ => 1,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedCounts {
    pub counts: BTreeMap<SubunitKind, u8>,
}

impl DetectedCounts {
    pub fn get(&self, kind: SubunitKind) -> u8 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Write the counts into `shape`; returns whether anything changed
    pub fn apply(&self, shape: &mut SystemShape) -> bool {
        let mut changed = false;
        for (kind, count) in &self.counts {
            if shape.count(*kind) != *count {
                shape.set_count(*kind, *count);
                changed = true;
            }
        }
        changed
    }
}

pub struct AutoDetector {
    config: DetectionConfig,
    slave_id: u8,
    logger: crate::logging::StructuredLogger,
}

impl AutoDetector {
    pub fn new(config: &DetectionConfig, slave_id: u8) -> Self {
        Self {
            config: config.clone(),
            slave_id,
            logger: get_logger("detect"),
        }
    }

    /// Run up to `attempts` probes, `retry_delay_secs` apart
    pub async fn detect(
        &self,
        transport: &mut dyn ModbusTransport,
        reader: &mut RobustReader,
    ) -> Result<DetectedCounts> {
        let attempts = self.config.attempts.max(1);
        let mut last_error = LambdaError::generic("Auto-detection did not run");
        for attempt in 1..=attempts {
            if reader.is_stopping() {
                return Err(LambdaError::Shutdown);
            }
            if !transport.is_connected()
                && let Err(e) = transport.connect().await
            {
                last_error = e;
            } else {
                match self.attempt(transport, reader).await {
                    Ok(counts) => {
                        self.logger.info(&format!("Detected modules: {}", describe(&counts)));
                        return Ok(counts);
                    }
                    Err(e) => last_error = e,
                }
            }
            self.logger.warn(&format!(
                "Auto-detection attempt {}/{} failed: {}",
                attempt, attempts, last_error
            ));
            if attempt < attempts {
                tokio::time::sleep(Duration::from_secs(self.config.retry_delay_secs)).await;
            }
        }
        Err(last_error)
    }

    async fn attempt(
        &self,
        transport: &mut dyn ModbusTransport,
        reader: &mut RobustReader,
    ) -> Result<DetectedCounts> {
        let mut counts = BTreeMap::new();
        for kind in SubunitKind::SUBUNITS {
            let mut found = 0u8;
            for index in 1..=kind.max_count() {
                let address = kind.subunit_base(index) + probe_register(kind);
                match reader.read(transport, self.slave_id, address, 1).await {
                    Ok(words) if words.first().is_some_and(|w| !ABSENT_SENTINELS.contains(w)) => {
                        found = index;
                    }
                    Ok(_) => break,
                    Err(e) if e.is_connection() || matches!(e, LambdaError::Shutdown) => {
                        return Err(e);
                    }
                    Err(e) => {
                        self.logger
                            .debug(&format!("{}{} absent: {}", kind.prefix(), index, e));
                        break;
                    }
                }
            }
            counts.insert(kind, found);
        }
        if counts.get(&SubunitKind::Hp).copied().unwrap_or(0) == 0 {
            return Err(LambdaError::generic("No heat pump answered"));
        }
        Ok(DetectedCounts { counts })
    }
}

fn describe(counts: &DetectedCounts) -> String {
    counts
        .counts
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}
