//! Durable cycle and energy counters
//!
//! One JSON document per site. Writes run on the blocking pool and go
//! through a temp file plus rename, so a crash never leaves a truncated
//! document behind. A malformed document is kept as `<file>.backup` and
//! the engine starts from zero.

use crate::derived::{Counter, CycleMode, EnergyMode};
use crate::error::{LambdaError, Result};
use crate::logging::{StructuredLogger, get_logger};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const PERSIST_VERSION: &str = "1.0.0";

/// `hp1`-style key used throughout the document
pub fn hp_key(hp: u8) -> String {
    format!("hp{}", hp)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleEnergyPersist {
    pub version: String,
    pub heating_cycles: BTreeMap<String, i64>,
    pub hot_water_cycles: BTreeMap<String, i64>,
    pub cooling_cycles: BTreeMap<String, i64>,
    pub defrost_cycles: BTreeMap<String, i64>,
    pub compressor_start_cycles: BTreeMap<String, i64>,
    /// Last `operating_state` per HP, drives the cycle edges
    pub last_operating_states: BTreeMap<String, i64>,
    /// Last `state` per HP, drives compressor starts
    pub last_states: BTreeMap<String, i64>,
    /// Electrical totals in kWh, HP then mode
    pub energy_consumption: BTreeMap<String, BTreeMap<EnergyMode, f64>>,
    /// Thermal totals in kWh, HP then mode
    pub thermal_energy: BTreeMap<String, BTreeMap<EnergyMode, f64>>,
    pub last_energy_reading: BTreeMap<String, f64>,
    pub last_thermal_reading: BTreeMap<String, f64>,
    pub sensor_ids: BTreeMap<String, String>,
    pub thermal_sensor_ids: BTreeMap<String, String>,
    /// Total at the last reset, keyed by period sensor key
    pub period_baselines: BTreeMap<String, f64>,
    /// Daily value captured at midnight, keyed by `_yesterday` sensor key
    pub yesterday_values: BTreeMap<String, f64>,
    /// Offset already folded into a total, keyed by total sensor key
    pub applied_offsets: BTreeMap<String, f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for CycleEnergyPersist {
    fn default() -> Self {
        Self {
            version: PERSIST_VERSION.to_string(),
            heating_cycles: BTreeMap::new(),
            hot_water_cycles: BTreeMap::new(),
            cooling_cycles: BTreeMap::new(),
            defrost_cycles: BTreeMap::new(),
            compressor_start_cycles: BTreeMap::new(),
            last_operating_states: BTreeMap::new(),
            last_states: BTreeMap::new(),
            energy_consumption: BTreeMap::new(),
            thermal_energy: BTreeMap::new(),
            last_energy_reading: BTreeMap::new(),
            last_thermal_reading: BTreeMap::new(),
            sensor_ids: BTreeMap::new(),
            thermal_sensor_ids: BTreeMap::new(),
            period_baselines: BTreeMap::new(),
            yesterday_values: BTreeMap::new(),
            applied_offsets: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl CycleEnergyPersist {
    pub fn cycles(&self, mode: CycleMode) -> &BTreeMap<String, i64> {
        match mode {
            CycleMode::Heating => &self.heating_cycles,
            CycleMode::HotWater => &self.hot_water_cycles,
            CycleMode::Cooling => &self.cooling_cycles,
            CycleMode::Defrost => &self.defrost_cycles,
            CycleMode::CompressorStart => &self.compressor_start_cycles,
        }
    }

    fn cycles_mut(&mut self, mode: CycleMode) -> &mut BTreeMap<String, i64> {
        match mode {
            CycleMode::Heating => &mut self.heating_cycles,
            CycleMode::HotWater => &mut self.hot_water_cycles,
            CycleMode::Cooling => &mut self.cooling_cycles,
            CycleMode::Defrost => &mut self.defrost_cycles,
            CycleMode::CompressorStart => &mut self.compressor_start_cycles,
        }
    }

    /// Current total of a counter, `None` if it was never created
    pub fn total(&self, hp: u8, counter: Counter) -> Option<f64> {
        let key = hp_key(hp);
        match counter {
            Counter::Cycles(mode) => self.cycles(mode).get(&key).map(|v| *v as f64),
            Counter::Energy(mode) => self.energy_consumption.get(&key)?.get(&mode).copied(),
            Counter::Thermal(mode) => self.thermal_energy.get(&key)?.get(&mode).copied(),
        }
    }

    /// Add to a counter's total, creating it at zero first
    pub fn add(&mut self, hp: u8, counter: Counter, delta: f64) {
        let key = hp_key(hp);
        match counter {
            Counter::Cycles(mode) => {
                *self.cycles_mut(mode).entry(key).or_insert(0) += delta.round() as i64;
            }
            Counter::Energy(mode) => {
                *self
                    .energy_consumption
                    .entry(key)
                    .or_default()
                    .entry(mode)
                    .or_insert(0.0) += delta;
            }
            Counter::Thermal(mode) => {
                *self
                    .thermal_energy
                    .entry(key)
                    .or_default()
                    .entry(mode)
                    .or_insert(0.0) += delta;
            }
        }
    }

    /// Last cumulative reading of the electrical or thermal source
    pub fn last_reading(&self, hp: u8, thermal: bool) -> Option<f64> {
        let map = if thermal {
            &self.last_thermal_reading
        } else {
            &self.last_energy_reading
        };
        map.get(&hp_key(hp)).copied()
    }

    pub fn set_last_reading(&mut self, hp: u8, thermal: bool, value: Option<f64>) {
        let map = if thermal {
            &mut self.last_thermal_reading
        } else {
            &mut self.last_energy_reading
        };
        match value {
            Some(v) => map.insert(hp_key(hp), v),
            None => map.remove(&hp_key(hp)),
        };
    }

    pub fn sensor_ids_mut(&mut self, thermal: bool) -> &mut BTreeMap<String, String> {
        if thermal {
            &mut self.thermal_sensor_ids
        } else {
            &mut self.sensor_ids
        }
    }
}

/// Loads and saves the persist document of one site
#[derive(Clone)]
pub struct PersistStore {
    path: PathBuf,
    logger: StructuredLogger,
}

impl PersistStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            logger: get_logger("persistence"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document; never fails, starts from zero instead
    pub async fn load(&self) -> CycleEnergyPersist {
        let store = self.clone();
        match tokio::task::spawn_blocking(move || store.load_blocking()).await {
            Ok(doc) => doc,
            Err(e) => {
                self.logger
                    .error(&format!("Persist load task failed: {}", e));
                CycleEnergyPersist::default()
            }
        }
    }

    pub fn load_blocking(&self) -> CycleEnergyPersist {
        if !self.path.exists() {
            self.logger.warn(&format!(
                "No persist document at {}, starting from zero",
                self.path.display()
            ));
            return CycleEnergyPersist::default();
        }
        let parsed = std::fs::read_to_string(&self.path)
            .map_err(LambdaError::from)
            .and_then(|contents| {
                serde_json::from_str::<CycleEnergyPersist>(&contents).map_err(LambdaError::from)
            });
        match parsed {
            Ok(mut doc) => {
                if doc.version != PERSIST_VERSION {
                    self.logger.info(&format!(
                        "Upgrading persist document from version '{}' to {}",
                        doc.version, PERSIST_VERSION
                    ));
                    doc.version = PERSIST_VERSION.to_string();
                }
                self.logger
                    .info(&format!("Loaded persist document from {}", self.path.display()));
                doc
            }
            Err(e) => {
                let backup = self.backup_path();
                match std::fs::copy(&self.path, &backup) {
                    Ok(_) => self.logger.warn(&format!(
                        "Persist document {} is malformed ({}), kept as {} and starting from zero",
                        self.path.display(),
                        e,
                        backup.display()
                    )),
                    Err(copy_err) => self.logger.warn(&format!(
                        "Persist document {} is malformed ({}) and could not be backed up: {}",
                        self.path.display(),
                        e,
                        copy_err
                    )),
                }
                CycleEnergyPersist::default()
            }
        }
    }

    /// Write the document off the event loop
    pub async fn save(&self, doc: &CycleEnergyPersist) -> Result<()> {
        let store = self.clone();
        let doc = doc.clone();
        tokio::task::spawn_blocking(move || store.save_blocking(&doc)).await?
    }

    pub fn save_blocking(&self, doc: &CycleEnergyPersist) -> Result<()> {
        let contents = serde_json::to_string_pretty(doc)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                LambdaError::persist(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .map_err(|e| LambdaError::persist(format!("cannot write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            LambdaError::persist(format!("cannot replace {}: {}", self.path.display(), e))
        })?;
        self.logger.trace("Persist document written");
        Ok(())
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".backup");
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_creates_and_accumulates() {
        let mut doc = CycleEnergyPersist::default();
        assert_eq!(doc.total(1, Counter::Cycles(CycleMode::Heating)), None);
        doc.add(1, Counter::Cycles(CycleMode::Heating), 1.0);
        doc.add(1, Counter::Cycles(CycleMode::Heating), 1.0);
        doc.add(1, Counter::Energy(EnergyMode::Stby), 0.0);
        doc.add(2, Counter::Thermal(EnergyMode::Heating), 2.5);
        assert_eq!(doc.total(1, Counter::Cycles(CycleMode::Heating)), Some(2.0));
        assert_eq!(doc.total(1, Counter::Energy(EnergyMode::Stby)), Some(0.0));
        assert_eq!(doc.total(2, Counter::Thermal(EnergyMode::Heating)), Some(2.5));
        assert_eq!(doc.heating_cycles.get("hp1"), Some(&2));
    }

    #[test]
    fn test_document_layout_uses_mode_names() {
        let mut doc = CycleEnergyPersist::default();
        doc.add(1, Counter::Energy(EnergyMode::HotWater), 1.5);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["version"], "1.0.0");
        assert_eq!(json["energy_consumption"]["hp1"]["hot_water"], 1.5);
    }
}
