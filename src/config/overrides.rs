//! Per-site overrides document (`lambda_wp_config.yaml`)
//!
//! The document is user-edited and frequently hand-broken, so every section
//! is parsed on its own: a malformed section is logged and replaced by its
//! default, and the remaining sections still apply.

use crate::logging::get_logger;
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Parsed overrides document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    /// Absolute register addresses that are never polled
    pub disabled_registers: BTreeSet<u16>,

    /// Sensor id to display name
    pub sensors_names_override: BTreeMap<String, String>,

    /// `hp1 -> heating_cycling_total -> offset`
    pub cycling_offsets: BTreeMap<String, BTreeMap<String, i64>>,

    /// `hp1 -> heating_energy_total -> kWh`
    pub energy_consumption_offsets: BTreeMap<String, BTreeMap<String, f64>>,

    /// `hp1 -> external electrical energy entity`
    pub energy_consumption_sensors: BTreeMap<String, String>,

    /// `hp1 -> external thermal energy entity`
    pub thermal_consumption_sensors: BTreeMap<String, String>,
}

impl Overrides {
    /// Load the document; a missing or unreadable file yields defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Self {
        let logger = get_logger("config");
        let path = path.as_ref();
        if !path.exists() {
            logger.warn(&format!(
                "{} not found, using default overrides",
                path.display()
            ));
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_yaml_str(&contents),
            Err(e) => {
                logger.error(&format!("Failed to read {}: {}", path.display(), e));
                Self::default()
            }
        }
    }

    /// Parse the document from YAML text
    pub fn from_yaml_str(contents: &str) -> Self {
        let logger = get_logger("config");
        let root: Value = match serde_yaml::from_str(contents) {
            Ok(v) => v,
            Err(e) => {
                logger.error(&format!("Invalid overrides document, using defaults: {}", e));
                return Self::default();
            }
        };
        let Value::Mapping(_) = root else {
            if !root.is_null() {
                logger.warn("Overrides document is not a mapping, using defaults");
            }
            return Self::default();
        };

        Self {
            disabled_registers: parse_disabled_registers(root.get("disabled_registers")),
            sensors_names_override: parse_name_overrides(root.get("sensors_names_override")),
            cycling_offsets: parse_offsets(root.get("cycling_offsets"), "cycling_offsets", |v| {
                v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64))
            }),
            energy_consumption_offsets: parse_offsets(
                root.get("energy_consumption_offsets"),
                "energy_consumption_offsets",
                |v| v.as_f64(),
            ),
            energy_consumption_sensors: parse_sensor_sources(
                root.get("energy_consumption_sensors"),
                "energy_consumption_sensors",
            ),
            thermal_consumption_sensors: parse_sensor_sources(
                root.get("thermal_consumption_sensors"),
                "thermal_consumption_sensors",
            ),
        }
    }

    /// Configured electrical energy entity for heat pump `hp`
    pub fn energy_sensor_for(&self, hp: u8) -> Option<&str> {
        self.energy_consumption_sensors
            .get(&format!("hp{}", hp))
            .map(String::as_str)
    }

    /// Configured thermal energy entity for heat pump `hp`
    pub fn thermal_sensor_for(&self, hp: u8) -> Option<&str> {
        self.thermal_consumption_sensors
            .get(&format!("hp{}", hp))
            .map(String::as_str)
    }

    pub fn cycling_offset(&self, hp: u8, sensor: &str) -> i64 {
        self.cycling_offsets
            .get(&format!("hp{}", hp))
            .and_then(|m| m.get(sensor))
            .copied()
            .unwrap_or(0)
    }

    pub fn energy_offset(&self, hp: u8, sensor: &str) -> f64 {
        self.energy_consumption_offsets
            .get(&format!("hp{}", hp))
            .and_then(|m| m.get(sensor))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn display_name(&self, sensor_id: &str) -> Option<&str> {
        self.sensors_names_override
            .get(sensor_id)
            .map(String::as_str)
    }
}

fn parse_disabled_registers(section: Option<&Value>) -> BTreeSet<u16> {
    let Some(section) = section else {
        return BTreeSet::new();
    };
    let Some(items) = section.as_sequence() else {
        if !section.is_null() {
            get_logger("config").error("Invalid disabled_registers format: expected a list");
        }
        return BTreeSet::new();
    };
    let mut out = BTreeSet::new();
    for item in items {
        let parsed = match item {
            Value::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
            Value::String(s) => s.trim().parse::<u16>().ok(),
            _ => None,
        };
        match parsed {
            Some(addr) => {
                out.insert(addr);
            }
            None => {
                // One bad entry invalidates the section
                get_logger("config").error(&format!(
                    "Invalid disabled_registers entry {:?}, ignoring section",
                    item
                ));
                return BTreeSet::new();
            }
        }
    }
    out
}

fn parse_name_overrides(section: Option<&Value>) -> BTreeMap<String, String> {
    let Some(section) = section else {
        return BTreeMap::new();
    };
    let Some(items) = section.as_sequence() else {
        if !section.is_null() {
            get_logger("config").error("Invalid sensors_names_override format: expected a list");
        }
        return BTreeMap::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let id = item.get("id")?.as_str()?;
            let name = item.get("override_name")?.as_str()?;
            Some((id.to_string(), name.to_string()))
        })
        .collect()
}

fn parse_offsets<T, F>(
    section: Option<&Value>,
    section_name: &str,
    convert: F,
) -> BTreeMap<String, BTreeMap<String, T>>
where
    T: Default,
    F: Fn(&Value) -> Option<T>,
{
    let logger = get_logger("config");
    let mut out = BTreeMap::new();
    let Some(section) = section else {
        return out;
    };
    let Some(devices) = section.as_mapping() else {
        if !section.is_null() {
            logger.error(&format!("Invalid {} format: expected a mapping", section_name));
        }
        return out;
    };
    for (device, offsets) in devices {
        let Some(device) = device.as_str() else {
            continue;
        };
        let Some(offsets) = offsets.as_mapping() else {
            logger.warn(&format!(
                "Invalid {} format for device {}",
                section_name, device
            ));
            continue;
        };
        let entry: &mut BTreeMap<String, T> = out.entry(device.to_string()).or_default();
        for (name, value) in offsets {
            let Some(name) = name.as_str() else {
                continue;
            };
            let value = convert(value).unwrap_or_else(|| {
                logger.warn(&format!(
                    "Invalid {} value for {}.{}: {:?}",
                    section_name, device, name, value
                ));
                T::default()
            });
            entry.insert(name.to_string(), value);
        }
    }
    out
}

fn parse_sensor_sources(section: Option<&Value>, section_name: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Some(devices) = section.and_then(Value::as_mapping) else {
        if section.is_some_and(|s| !s.is_null()) {
            get_logger("config").error(&format!("Invalid {} format: expected a mapping", section_name));
        }
        return out;
    };
    for (device, cfg) in devices {
        let Some(device) = device.as_str() else {
            continue;
        };
        // Both `hp1: {sensor_entity_id: ...}` and the short `hp1: sensor.x` form
        let entity = cfg
            .get("sensor_entity_id")
            .and_then(Value::as_str)
            .or_else(|| cfg.as_str());
        match entity {
            Some(e) if !e.trim().is_empty() => {
                out.insert(device.to_string(), e.trim().to_string());
            }
            _ => get_logger("config").warn(&format!(
                "{}.{} has no sensor_entity_id",
                section_name, device
            )),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
disabled_registers:
  - 1004
  - "2050"
sensors_names_override:
  - id: hp1_flow_line_temperature
    override_name: Vorlauf
  - id: broken
cycling_offsets:
  hp1:
    heating_cycling_total: 1500
    hot_water_cycling_total: "many"
energy_consumption_offsets:
  hp1:
    heating_energy_total: 150.5
energy_consumption_sensors:
  hp1:
    sensor_entity_id: sensor.lambda_wp_verbrauch
thermal_consumption_sensors:
  hp2: sensor.heat_meter
"#;

    #[test]
    fn parses_all_sections() {
        let o = Overrides::from_yaml_str(DOC);
        assert_eq!(o.disabled_registers, [1004, 2050].into_iter().collect());
        assert_eq!(o.display_name("hp1_flow_line_temperature"), Some("Vorlauf"));
        assert_eq!(o.sensors_names_override.len(), 1);
        assert_eq!(o.cycling_offset(1, "heating_cycling_total"), 1500);
        assert_eq!(o.cycling_offset(1, "hot_water_cycling_total"), 0);
        assert_eq!(o.cycling_offset(2, "heating_cycling_total"), 0);
        assert!((o.energy_offset(1, "heating_energy_total") - 150.5).abs() < 1e-9);
        assert_eq!(o.energy_sensor_for(1), Some("sensor.lambda_wp_verbrauch"));
        assert_eq!(o.thermal_sensor_for(2), Some("sensor.heat_meter"));
        assert_eq!(o.energy_sensor_for(2), None);
    }

    #[test]
    fn malformed_section_falls_back_alone() {
        let doc = r#"
disabled_registers: "not a list"
cycling_offsets:
  hp1:
    defrost_cycling_total: 7
"#;
        let o = Overrides::from_yaml_str(doc);
        assert!(o.disabled_registers.is_empty());
        assert_eq!(o.cycling_offset(1, "defrost_cycling_total"), 7);
    }

    #[test]
    fn broken_yaml_and_missing_file_yield_defaults() {
        assert_eq!(Overrides::from_yaml_str("key: [unclosed"), Overrides::default());
        assert_eq!(Overrides::from_yaml_str(""), Overrides::default());
        assert_eq!(
            Overrides::from_file("/nonexistent/lambda_wp_config.yaml"),
            Overrides::default()
        );
    }
}
