//! Scheduled writes of host values into the heat pump
//!
//! Room temperatures go to the heating circuits, PV surplus power to the
//! e-manager. Values come from the host through [`StateSource`].

use crate::config::{PvSurplusMode, SiteConfig};
use crate::error::Result;
use crate::external::{SensorReading, StateSource};
use crate::logging::{StructuredLogger, get_logger};
use crate::modbus::{ModbusTransport, encode_int16, encode_uint16};
use crate::registers::SubunitKind;
use crate::retry::RobustReader;
use std::collections::HashSet;

/// E-manager actual power register
pub const PV_POWER_REGISTER: u16 = 102;

/// `room_device_temperature` within a heating circuit block
pub const ROOM_TEMPERATURE_OFFSET: u16 = 4;

pub fn room_temperature_register(hc: u8) -> u16 {
    SubunitKind::Hc.subunit_base(hc) + ROOM_TEMPERATURE_OFFSET
}

/// Room temperature in °C as a 0.1 °C int16 word
pub fn encode_room_temperature(celsius: f64) -> (u16, bool) {
    encode_int16((celsius * 10.0).round() as i64)
}

/// PV power in W, converting from kW when the entity reports kW
pub fn pv_watts(reading: &SensorReading) -> f64 {
    match reading.unit.as_deref() {
        Some("kW") => reading.value * 1000.0,
        _ => reading.value,
    }
}

/// PV power as register word for the configured mode
pub fn encode_pv_power(watts: f64, mode: PvSurplusMode) -> (u16, bool) {
    let w = watts.round() as i64;
    match mode {
        PvSurplusMode::Entry | PvSurplusMode::Pos => encode_uint16(w),
        PvSurplusMode::Neg => encode_int16(w),
    }
}

/// One register write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedWrite {
    pub address: u16,
    pub word: u16,
}

pub struct Writer {
    site: SiteConfig,
    num_hc: u8,
    clamp_logged: HashSet<u16>,
    logger: StructuredLogger,
}

impl Writer {
    pub fn new(site: &SiteConfig, num_hc: u8) -> Self {
        Self {
            site: site.clone(),
            num_hc,
            clamp_logged: HashSet::new(),
            logger: get_logger("writer").for_site(&site.id),
        }
    }

    /// Whether the site has anything to write
    pub fn should_start(site: &SiteConfig) -> bool {
        site.room_thermostat_control || site.pv_surplus
    }

    pub fn set_num_hc(&mut self, num_hc: u8) {
        self.num_hc = num_hc;
    }

    fn note_clamp(&mut self, address: u16, value: f64, clamped: bool) {
        if clamped && self.clamp_logged.insert(address) {
            self.logger.warn(&format!(
                "Value {} for register {} is out of range and was clamped",
                value, address
            ));
        }
    }

    /// Collect the writes due now; unavailable entities are skipped
    pub async fn plan(&mut self, states: &dyn StateSource) -> Vec<PlannedWrite> {
        let mut writes = Vec::new();

        if self.site.room_thermostat_control {
            for hc in 1..=self.num_hc {
                let Some(entity) = self.site.room_temperature_entity(hc) else {
                    continue;
                };
                let Some(reading) = states.numeric_state(&entity).await else {
                    self.logger
                        .debug(&format!("Room temperature {} unavailable, hc{} skipped", entity, hc));
                    continue;
                };
                let address = room_temperature_register(hc);
                let (word, clamped) = encode_room_temperature(reading.value);
                self.note_clamp(address, reading.value, clamped);
                writes.push(PlannedWrite { address, word });
            }
        }

        if self.site.pv_surplus
            && let Some(entity) = self.site.pv_power_sensor_entity.clone()
        {
            match states.numeric_state(&entity).await {
                Some(reading) => {
                    let watts = pv_watts(&reading);
                    let (word, clamped) = encode_pv_power(watts, self.site.pv_surplus_mode);
                    self.note_clamp(PV_POWER_REGISTER, watts, clamped);
                    writes.push(PlannedWrite {
                        address: PV_POWER_REGISTER,
                        word,
                    });
                }
                None => self
                    .logger
                    .debug(&format!("PV power {} unavailable, skipped", entity)),
            }
        }

        writes
    }

    /// Perform one write round; returns the number of registers written
    pub async fn run_once(
        &mut self,
        transport: &mut dyn ModbusTransport,
        reader: &mut RobustReader,
        states: &dyn StateSource,
    ) -> Result<usize> {
        let writes = self.plan(states).await;
        let mut written = 0;
        for w in &writes {
            match reader
                .write(transport, self.site.slave_id, w.address, &[w.word])
                .await
            {
                Ok(()) => {
                    written += 1;
                    self.logger.trace(&format!(
                        "Wrote 0x{:04X} to register {}",
                        w.word, w.address
                    ));
                }
                Err(e) if e.is_connection() => return Err(e),
                Err(e) => self
                    .logger
                    .warn(&format!("Write to register {} failed: {}", w.address, e)),
            }
        }
        Ok(written)
    }
}
