//! Sensor keys, entity ids and display names

use crate::config::{Overrides, SiteConfig};
use crate::registers::SubunitKind;
use serde::Serialize;

/// Names for one sensor as a host adapter registers it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorNames {
    pub name: String,
    pub entity_id: String,
    pub unique_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    name_prefix: String,
    use_legacy_modbus_names: bool,
}

impl Naming {
    pub fn new(name_prefix: &str, use_legacy_modbus_names: bool) -> Self {
        Self {
            name_prefix: name_prefix.to_lowercase(),
            use_legacy_modbus_names,
        }
    }

    pub fn from_site(site: &SiteConfig) -> Self {
        Self::new(&site.name_prefix, site.use_legacy_modbus_names)
    }

    /// Names for `sensor` on `device` (e.g. "hp1"); `None` for site-wide sensors
    pub fn names(&self, device: Option<&str>, sensor: &str, display: &str) -> SensorNames {
        let unique_id = match (self.use_legacy_modbus_names, device) {
            (true, Some(d)) => format!("{}_{}_{}", self.name_prefix, d, sensor),
            (true, None) => format!("{}_{}", self.name_prefix, sensor),
            (false, Some(d)) => format!("{}_{}", d, sensor),
            (false, None) => sensor.to_string(),
        };
        SensorNames {
            name: display.to_string(),
            entity_id: format!("sensor.{}", unique_id),
            unique_id,
        }
    }

    /// Names for a snapshot key, honouring `sensors_names_override`
    pub fn for_key(&self, key: &str, overrides: &Overrides) -> SensorNames {
        let (device, sensor) = split_key(key);
        let display = overrides
            .display_name(key)
            .map(str::to_string)
            .unwrap_or_else(|| humanize(sensor));
        self.names(device, sensor, &display)
    }
}

/// Split `hp1_flow_line_temperature` into `(Some("hp1"), "flow_line_temperature")`
pub fn split_key(key: &str) -> (Option<&str>, &str) {
    for kind in SubunitKind::SUBUNITS {
        let Some(rest) = key.strip_prefix(kind.prefix()) else {
            continue;
        };
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            continue;
        }
        let split = kind.prefix().len() + digits;
        if let Some(sensor) = key[split..].strip_prefix('_') {
            return (Some(&key[..split]), sensor);
        }
    }
    (None, key)
}

/// `flow_line_temperature` -> `Flow Line Temperature`
pub fn humanize(sensor: &str) -> String {
    sensor
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn cycling_key(hp: u8, mode: &str, period: &str) -> String {
    format!("hp{}_{}_cycling_{}", hp, mode, period)
}

pub fn energy_key(hp: u8, mode: &str, period: &str) -> String {
    format!("hp{}_{}_energy_{}", hp, mode, period)
}

pub fn thermal_key(hp: u8, mode: &str, period: &str) -> String {
    format!("hp{}_{}_thermal_energy_{}", hp, mode, period)
}

pub fn cop_key(hp: u8, mode: &str, period: &str) -> String {
    format!("hp{}_{}_cop_{}", hp, mode, period)
}

pub fn heating_curve_key(hc: u8) -> String {
    format!("hc{}_heating_curve_flow_line_temperature_calc", hc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_and_plain_entity_ids() {
        let legacy = Naming::new("EU08L", true);
        let n = legacy.names(Some("hp1"), "flow_line_temperature", "Flow");
        assert_eq!(n.entity_id, "sensor.eu08l_hp1_flow_line_temperature");
        assert_eq!(n.unique_id, "eu08l_hp1_flow_line_temperature");
        assert_eq!(
            legacy.names(None, "ambient_temperature", "x").entity_id,
            "sensor.eu08l_ambient_temperature"
        );

        let plain = Naming::new("eu08l", false);
        assert_eq!(
            plain.names(Some("hc2"), "room_device_temperature", "x").entity_id,
            "sensor.hc2_room_device_temperature"
        );
        assert_eq!(
            plain.names(None, "ambient_temperature", "x").entity_id,
            "sensor.ambient_temperature"
        );
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("hp1_flow_line_temperature"), (Some("hp1"), "flow_line_temperature"));
        assert_eq!(split_key("hc12_operating_mode"), (Some("hc12"), "operating_mode"));
        assert_eq!(split_key("ambient_temperature"), (None, "ambient_temperature"));
        assert_eq!(split_key("hpx_foo"), (None, "hpx_foo"));
    }

    #[test]
    fn test_display_override() {
        let overrides = Overrides::from_yaml_str(
            "sensors_names_override:\n  - id: hp1_flow_line_temperature\n    override_name: Vorlauf\n",
        );
        let naming = Naming::new("eu08l", false);
        assert_eq!(naming.for_key("hp1_flow_line_temperature", &overrides).name, "Vorlauf");
        assert_eq!(
            naming.for_key("hp1_return_line_temperature", &overrides).name,
            "Return Line Temperature"
        );
    }

    #[test]
    fn test_derived_keys() {
        assert_eq!(cycling_key(1, "heating", "total"), "hp1_heating_cycling_total");
        assert_eq!(energy_key(2, "hot_water", "daily"), "hp2_hot_water_energy_daily");
        assert_eq!(thermal_key(1, "cooling", "2h"), "hp1_cooling_thermal_energy_2h");
        assert_eq!(cop_key(1, "heating", "monthly"), "hp1_heating_cop_monthly");
        assert_eq!(
            heating_curve_key(3),
            "hc3_heating_curve_flow_line_temperature_calc"
        );
    }
}
