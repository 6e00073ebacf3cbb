//! Cumulative energy sources and delta integration

use crate::external::{SensorReading, StateSource};
use crate::polling::RawSnapshot;

/// Upper bound for a single tick's delta
pub const MAX_DELTA_KWH: f64 = 100.0;

/// Convert a cumulative reading to kWh
pub fn to_kwh(value: f64, unit: Option<&str>) -> f64 {
    let unit = unit.map(|u| u.trim().to_ascii_lowercase());
    match unit.as_deref() {
        Some("wh") => value / 1000.0,
        Some("kwh") => value,
        Some("mwh") => value * 1000.0,
        _ if value >= 100.0 => value / 1000.0,
        _ => value,
    }
}

/// Result of comparing a reading against the stored reference
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeltaStep {
    /// No reference yet; the reading becomes the reference
    Seeded,
    /// Zero reading while the sensor restarts; reference untouched
    SkippedZero,
    /// Reading went backwards; the reading becomes the reference
    Reseeded { previous: f64 },
    Delta(f64),
}

impl DeltaStep {
    pub fn delta(&self) -> f64 {
        match self {
            DeltaStep::Delta(d) => *d,
            _ => 0.0,
        }
    }
}

/// Advance `last` with `current_kwh`
pub fn step(last: &mut Option<f64>, current_kwh: f64) -> DeltaStep {
    if current_kwh == 0.0 {
        return DeltaStep::SkippedZero;
    }
    let result = match *last {
        None => DeltaStep::Seeded,
        Some(previous) if current_kwh < previous => DeltaStep::Reseeded { previous },
        Some(previous) => DeltaStep::Delta((current_kwh - previous).min(MAX_DELTA_KWH)),
    };
    *last = Some(current_kwh);
    result
}

/// Where a cumulative energy reading comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnergySource {
    /// A register of the current snapshot
    Register(String),
    /// A host entity
    Entity(String),
}

impl EnergySource {
    pub fn default_electrical(hp: u8) -> Self {
        EnergySource::Register(format!("hp{}_compressor_power_consumption_accumulated", hp))
    }

    pub fn default_thermal(hp: u8) -> Self {
        EnergySource::Register(format!("hp{}_compressor_thermal_energy_output_accumulated", hp))
    }

    /// Configured source, or the built-in register
    pub fn resolve(configured: Option<&str>, fallback: EnergySource) -> Self {
        match configured.map(str::trim).filter(|s| !s.is_empty()) {
            Some(entity) => EnergySource::Entity(entity.to_string()),
            None => fallback,
        }
    }

    /// Identity string stored in the persist document
    pub fn identity(&self, naming: &crate::naming::Naming) -> String {
        match self {
            EnergySource::Entity(entity) => entity.clone(),
            EnergySource::Register(sensor_id) => {
                let (device, sensor) = crate::naming::split_key(sensor_id);
                naming.names(device, sensor, "").entity_id
            }
        }
    }

    pub async fn read(&self, raw: Option<&RawSnapshot>, states: &dyn StateSource) -> Option<SensorReading> {
        match self {
            EnergySource::Register(sensor_id) => {
                let value = raw?.get(sensor_id)?;
                Some(SensorReading::new(value.value, Some(value.template.unit)))
            }
            EnergySource::Entity(entity) => states.numeric_state(entity).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversion() {
        assert_eq!(to_kwh(4_250_000.0, Some("Wh")), 4250.0);
        assert_eq!(to_kwh(12.4, Some("kWh")), 12.4);
        assert_eq!(to_kwh(1.5, Some("MWh")), 1500.0);
        assert_eq!(to_kwh(1.5, Some("MWH")), 1500.0);
        assert_eq!(to_kwh(2.0, Some(" Mwh ")), 2000.0);
        assert_eq!(to_kwh(800.0, Some("WH")), 0.8);
        assert_eq!(to_kwh(250.0, None), 0.25);
        assert_eq!(to_kwh(99.0, None), 99.0);
        assert_eq!(to_kwh(99.0, Some("W")), 99.0);
    }

    #[test]
    fn test_delta_rules() {
        let mut last = None;
        assert_eq!(step(&mut last, 100.0), DeltaStep::Seeded);
        assert_eq!(step(&mut last, 100.5), DeltaStep::Delta(0.5));
        assert_eq!(step(&mut last, 0.0), DeltaStep::SkippedZero);
        assert_eq!(last, Some(100.5));
        assert_eq!(step(&mut last, 400.0), DeltaStep::Delta(MAX_DELTA_KWH));
        assert_eq!(step(&mut last, 50.0), DeltaStep::Reseeded { previous: 400.0 });
        assert_eq!(last, Some(50.0));
        assert_eq!(step(&mut last, 50.0).delta(), 0.0);
    }

    #[test]
    fn test_source_resolution() {
        assert_eq!(
            EnergySource::resolve(Some(" sensor.meter "), EnergySource::default_electrical(1)),
            EnergySource::Entity("sensor.meter".to_string())
        );
        assert_eq!(
            EnergySource::resolve(Some(""), EnergySource::default_electrical(2)),
            EnergySource::Register("hp2_compressor_power_consumption_accumulated".to_string())
        );
        let naming = crate::naming::Naming::new("EU08L", true);
        assert_eq!(
            EnergySource::default_electrical(1).identity(&naming),
            "sensor.eu08l_hp1_compressor_power_consumption_accumulated"
        );
    }
}
