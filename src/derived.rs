//! Derived-sensor engine
//!
//! Runs after every successful poll: counts operating-state edges,
//! integrates cumulative energy readings into per-mode totals and exposes
//! every period counter as `total − baseline`. Period resets only move the
//! baseline, so totals stay continuous across resets and restarts.

use crate::config::{HeatingCurveConfig, Overrides, SiteConfig};
use crate::external::{SensorReading, StateSource};
use crate::logging::{StructuredLogger, get_logger};
use crate::naming::{self, Naming};
use crate::persistence::{CycleEnergyPersist, hp_key};
use crate::polling::{RawSnapshot, round_to};
use crate::registers::SystemShape;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

mod cop;
mod cycles;
mod energy;
mod heating_curve;
mod mode;
mod periods;

pub use cop::{COP_PRECISION, cop};
pub use cycles::{edges, entered};
pub use energy::{DeltaStep, EnergySource, MAX_DELTA_KWH, step, to_kwh};
pub use heating_curve::{AMBIENT_SENSOR, HeatingCurve, base_flow, implausibility};
pub use mode::{CycleMode, EdgeSource, EnergyMode, STATE_START_COMPRESSOR, operating_state};
pub use periods::{Period, period_value};

/// One derived counter family of an HP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Counter {
    Cycles(CycleMode),
    Energy(EnergyMode),
    Thermal(EnergyMode),
}

impl Counter {
    pub fn key(self, hp: u8, period: Period) -> String {
        match self {
            Counter::Cycles(m) => naming::cycling_key(hp, m.as_str(), period.as_str()),
            Counter::Energy(m) => naming::energy_key(hp, m.as_str(), period.as_str()),
            Counter::Thermal(m) => naming::thermal_key(hp, m.as_str(), period.as_str()),
        }
    }

    pub fn periods(self) -> &'static [Period] {
        match self {
            Counter::Cycles(_) => &Period::CYCLE_PERIODS,
            Counter::Energy(_) | Counter::Thermal(_) => &Period::ENERGY_PERIODS,
        }
    }

    /// Entry name in `cycling_offsets` / `energy_consumption_offsets`
    fn offset_name(self) -> Option<String> {
        match self {
            Counter::Cycles(m) => Some(format!("{}_cycling_total", m.as_str())),
            Counter::Energy(m) => Some(format!("{}_energy_total", m.as_str())),
            Counter::Thermal(_) => None,
        }
    }

    fn cycles_and_energy() -> impl Iterator<Item = Counter> {
        CycleMode::ALL
            .into_iter()
            .map(Counter::Cycles)
            .chain(EnergyMode::ALL.into_iter().map(Counter::Energy))
    }
}

/// Cumulative readings of one HP for one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HpReadings {
    pub electrical: Option<SensorReading>,
    pub thermal: Option<SensorReading>,
}

/// Derived sensor values keyed by sensor id; `None` means unavailable
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedValues {
    pub values: BTreeMap<String, Option<f64>>,
}

impl DerivedValues {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied().flatten()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub struct DerivedEngine {
    num_hp: u8,
    num_hc: u8,
    naming: Naming,
    overrides: Overrides,
    persist: CycleEnergyPersist,
    curve: HeatingCurve,
    curve_values: BTreeMap<u8, Option<f64>>,
    initialized: bool,
    logger: StructuredLogger,
}

impl DerivedEngine {
    /// Build the engine from a loaded persist document and fold configured
    /// offsets into the totals
    pub fn new(
        site: &SiteConfig,
        shape: &SystemShape,
        curve: &HeatingCurveConfig,
        overrides: Overrides,
        persist: CycleEnergyPersist,
    ) -> Self {
        let mut engine = Self {
            num_hp: shape.num_hp,
            num_hc: shape.num_hc,
            naming: Naming::from_site(site),
            overrides,
            persist,
            curve: HeatingCurve::new(curve, site.room_thermostat_control),
            curve_values: BTreeMap::new(),
            initialized: false,
            logger: get_logger("derived").for_site(&site.id),
        };
        engine.ensure_counters();
        engine.apply_offsets();
        engine
    }

    pub fn persist(&self) -> &CycleEnergyPersist {
        &self.persist
    }

    /// Whether the initialization tick has passed
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_shape(&mut self, shape: &SystemShape) {
        self.num_hp = shape.num_hp;
        self.num_hc = shape.num_hc;
        self.curve_values.retain(|hc, _| *hc <= shape.num_hc);
        self.ensure_counters();
        self.apply_offsets();
    }

    /// Take a re-read overrides document
    pub fn reload(&mut self, overrides: Overrides) {
        self.overrides = overrides;
        self.apply_offsets();
    }

    pub fn source(&self, hp: u8, thermal: bool) -> EnergySource {
        if thermal {
            EnergySource::resolve(
                self.overrides.thermal_sensor_for(hp),
                EnergySource::default_thermal(hp),
            )
        } else {
            EnergySource::resolve(
                self.overrides.energy_sensor_for(hp),
                EnergySource::default_electrical(hp),
            )
        }
    }

    /// Read every HP's energy sources for one tick
    pub async fn gather_readings(
        &self,
        raw: &RawSnapshot,
        states: &dyn StateSource,
    ) -> BTreeMap<u8, HpReadings> {
        let mut readings = BTreeMap::new();
        for hp in 1..=self.num_hp {
            let electrical = self.source(hp, false).read(Some(raw), states).await;
            let thermal = self.source(hp, true).read(Some(raw), states).await;
            readings.insert(hp, HpReadings { electrical, thermal });
        }
        readings
    }

    /// Compare configured source identities with the stored ones. On a
    /// change the stored reference is dropped and re-seeded from the new
    /// source, retrying up to `attempts` times `delay` apart.
    pub async fn check_identities(
        &mut self,
        raw: Option<&RawSnapshot>,
        states: &dyn StateSource,
        attempts: u32,
        delay: Duration,
    ) -> bool {
        let mut changed = false;
        for hp in 1..=self.num_hp {
            for thermal in [false, true] {
                let source = self.source(hp, thermal);
                let identity = source.identity(&self.naming);
                let key = hp_key(hp);
                let stored = self.persist.sensor_ids_mut(thermal).get(&key).cloned();
                match stored {
                    Some(old) if old == identity => continue,
                    None => {
                        self.persist.sensor_ids_mut(thermal).insert(key, identity);
                        changed = true;
                        continue;
                    }
                    Some(old) => {
                        self.logger.info(&format!(
                            "{} {} sensor changed from {} to {}, re-seeding reference",
                            key,
                            if thermal { "thermal" } else { "energy" },
                            old,
                            identity
                        ));
                    }
                }

                self.persist.set_last_reading(hp, thermal, None);
                let can_wait = raw.is_some() || matches!(source, EnergySource::Entity(_));
                if can_wait {
                    for attempt in 1..=attempts.max(1) {
                        if let Some(reading) = source.read(raw, states).await
                            && reading.value != 0.0
                        {
                            let kwh = to_kwh(reading.value, reading.unit.as_deref());
                            self.persist.set_last_reading(hp, thermal, Some(kwh));
                            self.logger
                                .info(&format!("{} reference seeded at {:.3} kWh", key, kwh));
                            break;
                        }
                        if attempt < attempts {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
                if self.persist.last_reading(hp, thermal).is_none() {
                    self.logger.warn(&format!(
                        "{} new sensor {} has no value yet, the first reading will seed it",
                        key, identity
                    ));
                }
                self.persist.sensor_ids_mut(thermal).insert(key, identity);
                changed = true;
            }
        }
        changed
    }

    /// Process one successful poll
    pub fn process(&mut self, raw: &RawSnapshot, readings: &BTreeMap<u8, HpReadings>) -> DerivedValues {
        for hp in 1..=self.num_hp {
            self.count_edges(hp, raw);
            if let Some(r) = readings.get(&hp) {
                self.integrate(hp, raw, r);
            }
        }
        if !self.initialized {
            self.logger
                .info("Initialization tick complete, edge detection enabled");
            self.initialized = true;
        }
        for hc in 1..=self.num_hc {
            let value = self.curve.evaluate(hc, raw);
            self.curve_values.insert(hc, value);
        }
        self.values()
    }

    fn count_edges(&mut self, hp: u8, raw: &RawSnapshot) {
        let key = hp_key(hp);
        for source in [EdgeSource::OperatingState, EdgeSource::State] {
            let Some(current) = raw.value(&format!("hp{}_{}", hp, source.register_name())) else {
                continue;
            };
            let current = current as i64;
            let states = match source {
                EdgeSource::OperatingState => &mut self.persist.last_operating_states,
                EdgeSource::State => &mut self.persist.last_states,
            };
            let last = states.insert(key.clone(), current);
            if !self.initialized {
                continue;
            }
            for mode in edges(source, last, current) {
                self.persist.add(hp, Counter::Cycles(mode), 1.0);
                self.logger.info(&format!(
                    "{} entered {} ({:?} -> {}), {} cycles now {}",
                    key,
                    mode,
                    last,
                    current,
                    mode,
                    self.persist.total(hp, Counter::Cycles(mode)).unwrap_or(0.0)
                ));
            }
        }
    }

    fn integrate(&mut self, hp: u8, raw: &RawSnapshot, readings: &HpReadings) {
        let Some(op) = raw.value(&format!("hp{}_operating_state", hp)) else {
            self.logger
                .debug(&format!("hp{} operating state missing, energy skipped", hp));
            return;
        };
        let mode = EnergyMode::from_operating_state(op as i64);
        for (thermal, reading) in [(false, &readings.electrical), (true, &readings.thermal)] {
            let Some(reading) = reading else { continue };
            let kwh = to_kwh(reading.value, reading.unit.as_deref());
            let mut last = self.persist.last_reading(hp, thermal);
            let result = step(&mut last, kwh);
            self.persist.set_last_reading(hp, thermal, last);
            match result {
                DeltaStep::Seeded => self
                    .logger
                    .info(&format!("hp{} reference seeded at {:.3} kWh", hp, kwh)),
                DeltaStep::SkippedZero => self
                    .logger
                    .debug(&format!("hp{} source reads 0, skipped", hp)),
                DeltaStep::Reseeded { previous } => self.logger.warn(&format!(
                    "hp{} source went backwards ({:.3} -> {:.3} kWh), reference re-seeded",
                    hp, previous, kwh
                )),
                DeltaStep::Delta(d) if d >= MAX_DELTA_KWH => self.logger.warn(&format!(
                    "hp{} delta clamped to {} kWh",
                    hp, MAX_DELTA_KWH
                )),
                DeltaStep::Delta(_) => {}
            }
            let delta = result.delta();
            if delta > 0.0 || mode == EnergyMode::Stby {
                let counter = if thermal {
                    Counter::Thermal(mode)
                } else {
                    Counter::Energy(mode)
                };
                self.ensure(hp, counter);
                self.persist.add(hp, counter, delta);
            }
        }
    }

    /// Apply a period reset. `Yesterday` copies the displayed daily values;
    /// other scopes move the baseline to the current total.
    pub fn reset(&mut self, scope: Period) {
        if scope == Period::Total {
            return;
        }
        let mut touched = 0usize;
        for hp in 1..=self.num_hp {
            for counter in self.counters(hp) {
                if !counter.periods().contains(&scope) {
                    continue;
                }
                let Some(total) = self.persist.total(hp, counter) else {
                    continue;
                };
                if scope == Period::Yesterday {
                    let daily = self.display(hp, counter, Period::Daily).unwrap_or(0.0);
                    self.persist
                        .yesterday_values
                        .insert(counter.key(hp, Period::Yesterday), daily);
                } else {
                    self.persist
                        .period_baselines
                        .insert(counter.key(hp, scope), total);
                }
                touched += 1;
            }
        }
        self.logger
            .info(&format!("Period reset '{}' applied to {} counters", scope, touched));
    }

    /// Displayed value of one counter period
    pub fn display(&self, hp: u8, counter: Counter, period: Period) -> Option<f64> {
        let total = self.persist.total(hp, counter)?;
        let key = counter.key(hp, period);
        Some(match period {
            Period::Total => total,
            Period::Yesterday => self.persist.yesterday_values.get(&key).copied().unwrap_or(0.0),
            _ => period_value(total, self.persist.period_baselines.get(&key).copied().unwrap_or(0.0)),
        })
    }

    /// Every derived value in its current state
    pub fn values(&self) -> DerivedValues {
        let mut values = BTreeMap::new();
        for hp in 1..=self.num_hp {
            for counter in self.counters(hp) {
                for period in counter.periods() {
                    if let Some(v) = self.display(hp, counter, *period) {
                        values.insert(counter.key(hp, *period), Some(v));
                    }
                }
            }
            let has_thermal = self.persist.thermal_energy.contains_key(&hp_key(hp));
            if !has_thermal {
                continue;
            }
            for mode in EnergyMode::ALL.into_iter().filter(|m| m.has_cop()) {
                for period in Period::ENERGY_PERIODS {
                    let thermal = self.display(hp, Counter::Thermal(mode), period);
                    let electrical = self.display(hp, Counter::Energy(mode), period);
                    values.insert(
                        naming::cop_key(hp, mode.as_str(), period.as_str()),
                        cop(thermal, electrical).map(|c| round_to(c, COP_PRECISION)),
                    );
                }
            }
        }
        for (hc, value) in &self.curve_values {
            values.insert(naming::heating_curve_key(*hc), *value);
        }
        DerivedValues { values }
    }

    fn counters(&self, hp: u8) -> Vec<Counter> {
        let mut counters: Vec<Counter> = Counter::cycles_and_energy().collect();
        if self.persist.thermal_energy.contains_key(&hp_key(hp)) {
            counters.extend(EnergyMode::ALL.into_iter().map(Counter::Thermal));
        }
        counters
    }

    /// Create a counter at zero with baselines matching its total
    fn ensure(&mut self, hp: u8, counter: Counter) {
        if self.persist.total(hp, counter).is_none() {
            self.persist.add(hp, counter, 0.0);
        }
        let total = self.persist.total(hp, counter).unwrap_or(0.0);
        for period in counter.periods().iter().filter(|p| p.has_baseline()) {
            self.persist
                .period_baselines
                .entry(counter.key(hp, *period))
                .or_insert(total);
        }
    }

    fn ensure_counters(&mut self) {
        for hp in 1..=self.num_hp {
            for counter in Counter::cycles_and_energy() {
                self.ensure(hp, counter);
            }
            if self.persist.thermal_energy.contains_key(&hp_key(hp)) {
                for mode in EnergyMode::ALL {
                    self.ensure(hp, Counter::Thermal(mode));
                }
            }
        }
    }

    /// Fold the difference between configured and applied offsets into
    /// totals and baselines alike, so period values do not jump
    fn apply_offsets(&mut self) {
        for hp in 1..=self.num_hp {
            for counter in Counter::cycles_and_energy() {
                let Some(name) = counter.offset_name() else { continue };
                let configured = match counter {
                    Counter::Cycles(_) => self.overrides.cycling_offset(hp, &name) as f64,
                    _ => self.overrides.energy_offset(hp, &name),
                };
                let total_key = counter.key(hp, Period::Total);
                let applied = self.persist.applied_offsets.get(&total_key).copied().unwrap_or(0.0);
                let diff = configured - applied;
                if diff == 0.0 {
                    continue;
                }
                self.ensure(hp, counter);
                self.persist.add(hp, counter, diff);
                for period in counter.periods().iter().filter(|p| p.has_baseline()) {
                    if let Some(b) = self.persist.period_baselines.get_mut(&counter.key(hp, *period)) {
                        *b += diff;
                    }
                }
                if configured == 0.0 {
                    self.persist.applied_offsets.remove(&total_key);
                } else {
                    self.persist.applied_offsets.insert(total_key.clone(), configured);
                }
                self.logger.info(&format!(
                    "Offset of {} changed from {} to {}, total adjusted by {}",
                    total_key, applied, configured, diff
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polling::{PlannedRegister, decode_register};
    use crate::registers::{SubunitKind, find_template};
    use chrono::Utc;

    fn snapshot(values: &[(&str, f64)]) -> RawSnapshot {
        let mut raw = RawSnapshot::default();
        for (id, value) in values {
            let (kind, index, name) = match naming::split_key(id) {
                (Some(device), name) => {
                    let kind = SubunitKind::SUBUNITS
                        .into_iter()
                        .find(|k| device.starts_with(k.prefix()))
                        .unwrap();
                    (kind, device[kind.prefix().len()..].parse().unwrap(), name)
                }
                (None, name) => (SubunitKind::Main, 1, name),
            };
            let template = find_template(kind, name).unwrap();
            let reg = PlannedRegister {
                template,
                index,
                address: template.absolute_address(index),
                sensor_id: id.to_string(),
            };
            let words = vec![0; template.data_type.word_count() as usize];
            let mut v = decode_register(&reg, &words, crate::modbus::WordOrder::HighFirst, Utc::now())
                .unwrap();
            v.value = *value;
            raw.values.insert(id.to_string(), v);
        }
        raw
    }

    fn engine(overrides: Overrides, persist: CycleEnergyPersist) -> DerivedEngine {
        let site = SiteConfig::default();
        let shape = SystemShape::default();
        DerivedEngine::new(&site, &shape, &HeatingCurveConfig::default(), overrides, persist)
    }

    fn readings(kwh: f64) -> BTreeMap<u8, HpReadings> {
        BTreeMap::from([(
            1,
            HpReadings {
                electrical: Some(SensorReading::new(kwh, Some("kWh"))),
                thermal: None,
            },
        )])
    }

    #[test]
    fn test_init_tick_does_not_count_edges() {
        let mut e = engine(Overrides::default(), CycleEnergyPersist::default());
        let mut persist = CycleEnergyPersist::default();
        persist.last_operating_states.insert("hp1".into(), 0);
        let mut restored = engine(Overrides::default(), persist);

        let raw = snapshot(&[("hp1_operating_state", 1.0)]);
        e.process(&raw, &BTreeMap::new());
        restored.process(&raw, &BTreeMap::new());
        let key = "hp1_heating_cycling_total";
        assert_eq!(e.values().get(key), Some(0.0));
        assert_eq!(restored.values().get(key), Some(0.0));
        assert_eq!(restored.persist().last_operating_states.get("hp1"), Some(&1));
    }

    #[test]
    fn test_compressor_start_counted_from_state() {
        let mut e = engine(Overrides::default(), CycleEnergyPersist::default());
        e.process(&snapshot(&[("hp1_state", 3.0), ("hp1_operating_state", 0.0)]), &BTreeMap::new());
        e.process(&snapshot(&[("hp1_state", 5.0), ("hp1_operating_state", 0.0)]), &BTreeMap::new());
        e.process(&snapshot(&[("hp1_state", 7.0), ("hp1_operating_state", 0.0)]), &BTreeMap::new());
        let v = e.values();
        assert_eq!(v.get("hp1_compressor_start_cycling_total"), Some(1.0));
        assert_eq!(v.get("hp1_defrost_cycling_total"), Some(0.0));
    }

    #[test]
    fn test_stby_write_through_and_mode_attribution() {
        let mut e = engine(Overrides::default(), CycleEnergyPersist::default());
        e.process(&snapshot(&[("hp1_operating_state", 4.0)]), &readings(10.0));
        e.process(&snapshot(&[("hp1_operating_state", 4.0)]), &readings(10.2));
        e.process(&snapshot(&[("hp1_operating_state", 2.0)]), &readings(10.7));
        let v = e.values();
        assert!((v.get("hp1_stby_energy_total").unwrap() - 0.2).abs() < 1e-9);
        assert!((v.get("hp1_hot_water_energy_total").unwrap() - 0.5).abs() < 1e-9);
        assert!((v.get("hp1_hot_water_energy_hourly").unwrap() - 0.5).abs() < 1e-9);
        assert!(!v.contains("hp1_heating_thermal_energy_total"));
    }

    #[test]
    fn test_offsets_apply_once_and_follow_changes() {
        let yaml = "cycling_offsets:\n  hp1:\n    heating_cycling_total: 1500\n";
        let e = engine(Overrides::from_yaml_str(yaml), CycleEnergyPersist::default());
        assert_eq!(e.values().get("hp1_heating_cycling_total"), Some(1500.0));
        assert_eq!(e.values().get("hp1_heating_cycling_daily"), Some(0.0));

        // Reload with the same document: nothing more is added
        let e = engine(Overrides::from_yaml_str(yaml), e.persist().clone());
        assert_eq!(e.values().get("hp1_heating_cycling_total"), Some(1500.0));

        let lower = "cycling_offsets:\n  hp1:\n    heating_cycling_total: 1400\n";
        let mut e = engine(Overrides::from_yaml_str(lower), e.persist().clone());
        assert_eq!(e.values().get("hp1_heating_cycling_total"), Some(1400.0));

        e.reload(Overrides::default());
        assert_eq!(e.values().get("hp1_heating_cycling_total"), Some(0.0));
        assert!(e.persist().applied_offsets.is_empty());
    }

    #[test]
    fn test_cop_needs_thermal_and_positive_electrical() {
        let mut e = engine(Overrides::default(), CycleEnergyPersist::default());
        let tick = |kwh: f64, th: f64| {
            BTreeMap::from([(
                1,
                HpReadings {
                    electrical: Some(SensorReading::new(kwh, Some("kWh"))),
                    thermal: Some(SensorReading::new(th, Some("kWh"))),
                },
            )])
        };
        e.process(&snapshot(&[("hp1_operating_state", 1.0)]), &tick(10.0, 40.0));
        e.process(&snapshot(&[("hp1_operating_state", 1.0)]), &tick(11.0, 44.0));
        let v = e.values();
        assert_eq!(v.get("hp1_heating_cop_total"), Some(4.0));
        assert!(v.contains("hp1_cooling_cop_total"));
        assert_eq!(v.get("hp1_cooling_cop_total"), None);

        // 10 kWh thermal over 3 kWh electrical
        e.process(&snapshot(&[("hp1_operating_state", 1.0)]), &tick(13.0, 50.0));
        assert_eq!(e.values().get("hp1_heating_cop_total"), Some(3.33));
    }

    #[test]
    fn test_heating_curve_value() {
        let mut site = SiteConfig::default();
        site.room_thermostat_control = true;
        let mut e = DerivedEngine::new(
            &site,
            &SystemShape::default(),
            &HeatingCurveConfig::default(),
            Overrides::default(),
            CycleEnergyPersist::default(),
        );
        let raw = snapshot(&[
            ("ambient_temperature_calculated", 0.0),
            ("hc1_room_device_temperature", 20.0),
            ("hc1_target_room_temperature", 21.0),
            ("hc1_set_flow_line_offset_temperature", 0.5),
        ]);
        let v = e.process(&raw, &BTreeMap::new());
        assert_eq!(v.get("hc1_heating_curve_flow_line_temperature_calc"), Some(29.5));

        let v = e.process(&snapshot(&[]), &BTreeMap::new());
        assert!(v.contains("hc1_heating_curve_flow_line_temperature_calc"));
        assert_eq!(v.get("hc1_heating_curve_flow_line_temperature_calc"), None);
    }
}
