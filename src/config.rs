//! Configuration management
//!
//! This module handles loading, validation, and management of the site
//! configuration from YAML files. The per-site overrides document
//! (`lambda_wp_config.yaml`) lives in [`overrides`].

use crate::error::{LambdaError, Result};
use crate::modbus::WordOrder;
use crate::registers::{DataType, SubunitKind, SystemShape, firmware_from_name};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

mod defaults;
pub mod overrides;

pub use overrides::Overrides;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Site options (connection, subunit counts, writer options)
    pub site: SiteConfig,

    /// Modbus transport tuning
    pub modbus: ModbusConfig,

    /// Polling engine thresholds
    pub polling: PollingConfig,

    /// Module auto-detection
    pub detection: DetectionConfig,

    /// Heating curve support points
    pub heating_curve: HeatingCurveConfig,

    /// Persist document location
    pub persistence: PersistenceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Timezone for period resets: "local" or an IANA name
    pub timezone: String,
}

/// How the PV surplus value is encoded on register 102
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PvSurplusMode {
    /// Unsigned, negative values clamp to 0
    Entry,
    /// Unsigned, negative values clamp to 0
    #[default]
    Pos,
    /// Signed int16 in two's complement
    Neg,
}

impl PvSurplusMode {
    /// Register type of the PV power register in this mode
    pub fn data_type(self) -> DataType {
        match self {
            PvSurplusMode::Entry | PvSurplusMode::Pos => DataType::Uint16,
            PvSurplusMode::Neg => DataType::Int16,
        }
    }
}

/// Site options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Site identifier used in events and logs
    pub id: String,

    /// Entity name prefix, e.g. "eu08l"
    pub name_prefix: String,

    /// Heat pump IP address or host name
    pub host: String,

    /// TCP port (typically 502)
    pub port: u16,

    /// Modbus unit id
    pub slave_id: u8,

    /// Poll interval in seconds
    pub update_interval: u64,

    /// Writer interval in seconds
    pub write_interval: u64,

    /// Firmware name such as "V0.0.8-3K"
    pub firmware_version: String,

    // Subunit counts; absent means fresh setup (detect before first poll)
    pub num_hps: Option<u8>,
    pub num_boil: Option<u8>,
    pub num_buff: Option<u8>,
    pub num_sol: Option<u8>,
    pub num_hc: Option<u8>,

    /// Push room temperatures to the heating circuits
    pub room_thermostat_control: bool,

    /// Push PV surplus power to the e-manager
    pub pv_surplus: bool,

    pub pv_surplus_mode: PvSurplusMode,

    /// Entity providing PV surplus power (W or kW)
    pub pv_power_sensor_entity: Option<String>,

    /// Prefix entity ids with `name_prefix`
    pub use_legacy_modbus_names: bool,

    /// Word order of int32 registers
    pub int32_word_order: WordOrder,

    /// Path of the overrides document
    pub overrides_file: Option<String>,

    /// Remaining keys, e.g. `room_temperature_entity_1`
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Modbus transport tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    /// Default per-call timeout in milliseconds
    pub timeout_ms: u64,

    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Per-address timeout overrides in milliseconds
    pub register_timeouts_ms: BTreeMap<u16, u64>,

    /// Ticks between connection health probes (0 disables)
    pub health_check_every: u32,

    pub retry: RetryConfig,

    pub circuit_breaker: CircuitBreakerConfig,
}

/// Retry policy of the robust read helper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    /// Relative jitter, 0.2 means ±20 %
    pub jitter: f64,
    pub min_delay_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

/// Polling engine thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Largest multi-register read
    pub max_batch_size: u16,

    /// Addresses always read one at a time
    pub individual_read_registers: Vec<u16>,

    /// Consecutive batch failures before a batch is read individually for good
    pub batch_failure_threshold: u32,

    /// Register timeouts before the register is read individually
    pub register_timeout_threshold: u32,

    /// Register failures before the register is read individually
    pub register_failure_threshold: u32,

    /// How long the last snapshot is served while the device is unreachable
    pub offline_max_secs: u64,

    /// Anti-sync jitter for multi-site installations, in seconds
    pub jitter_secs: u64,
}

/// Module auto-detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub enabled: bool,
    pub attempts: u32,
    pub retry_delay_secs: u64,
    /// Delay of the background run on an existing setup
    pub background_delay_secs: u64,
    /// Time granted to a background run before the writer may start
    pub writer_grace_secs: u64,
}

/// Support points of a heating curve (outside temperature to flow temperature)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurvePoints {
    pub cold_outside: f64,
    pub mid_outside: f64,
    pub warm_outside: f64,
    pub cold_flow: f64,
    pub mid_flow: f64,
    pub warm_flow: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatingCurveConfig {
    /// Points used by every circuit without its own entry
    pub points: CurvePoints,

    /// Room feedback offset in K
    pub room_thermostat_offset: f64,

    /// Room feedback gain
    pub room_thermostat_factor: f64,

    /// Display precision of the computed flow temperature
    pub precision: u8,

    /// Per heating circuit overrides keyed by circuit index
    pub circuits: BTreeMap<u8, CurvePoints>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Persist document path
    pub file: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level
    pub console_level: Option<String>,

    /// Optional file-specific level
    pub file_level: Option<String>,

    /// Path to log file or directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl SiteConfig {
    /// External room temperature entity for heating circuit `hc`
    pub fn room_temperature_entity(&self, hc: u8) -> Option<String> {
        self.extra
            .get(&format!("room_temperature_entity_{}", hc))
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string())
    }

    pub fn firmware(&self) -> Result<u8> {
        firmware_from_name(&self.firmware_version).ok_or_else(|| {
            LambdaError::validation(
                "site.firmware_version".to_string(),
                format!("Unknown firmware version: {}", self.firmware_version),
            )
        })
    }

    /// True when every subunit count is known (an existing setup)
    pub fn counts_configured(&self) -> bool {
        self.num_hps.is_some()
            && self.num_boil.is_some()
            && self.num_buff.is_some()
            && self.num_sol.is_some()
            && self.num_hc.is_some()
    }

    /// Build the system shape from the configured counts
    pub fn shape(&self, disabled_registers: &BTreeSet<u16>) -> Result<SystemShape> {
        let defaults = SystemShape::default();
        let mut shape = SystemShape {
            firmware: self.firmware()?,
            disabled_registers: disabled_registers.clone(),
            ..defaults.clone()
        };
        shape.set_count(SubunitKind::Hp, self.num_hps.unwrap_or(defaults.num_hp));
        shape.set_count(SubunitKind::Boil, self.num_boil.unwrap_or(defaults.num_boil));
        shape.set_count(SubunitKind::Buff, self.num_buff.unwrap_or(defaults.num_buff));
        shape.set_count(SubunitKind::Sol, self.num_sol.unwrap_or(defaults.num_sol));
        shape.set_count(SubunitKind::Hc, self.num_hc.unwrap_or(defaults.num_hc));
        Ok(shape)
    }
}

impl ModbusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl HeatingCurveConfig {
    pub fn points_for(&self, hc: u8) -> CurvePoints {
        self.circuits.get(&hc).copied().unwrap_or(self.points)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first default location that exists
    pub fn load() -> Result<Self> {
        let default_paths = [
            "lambda_heatpump.yaml",
            "/data/lambda_heatpump.yaml",
            "/etc/lambda-heatpump/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        fn invalid(field: &str, message: &str) -> LambdaError {
            LambdaError::validation(field, message)
        }

        if self.site.host.trim().is_empty() {
            return Err(invalid("site.host", "Host cannot be empty"));
        }
        if self.site.port == 0 {
            return Err(invalid("site.port", "Port must be greater than 0"));
        }
        if self.site.slave_id == 0 || self.site.slave_id > 247 {
            return Err(invalid("site.slave_id", "Must be within 1..=247"));
        }
        if self.site.update_interval == 0 {
            return Err(invalid("site.update_interval", "Must be greater than 0"));
        }
        if self.site.write_interval == 0 {
            return Err(invalid("site.write_interval", "Must be greater than 0"));
        }
        self.site.firmware()?;

        let counts = [
            ("site.num_hps", self.site.num_hps, SubunitKind::Hp),
            ("site.num_boil", self.site.num_boil, SubunitKind::Boil),
            ("site.num_buff", self.site.num_buff, SubunitKind::Buff),
            ("site.num_sol", self.site.num_sol, SubunitKind::Sol),
            ("site.num_hc", self.site.num_hc, SubunitKind::Hc),
        ];
        for (field, count, kind) in counts {
            if let Some(n) = count
                && n > kind.max_count()
            {
                return Err(LambdaError::validation(
                    field.to_string(),
                    format!("At most {} supported", kind.max_count()),
                ));
            }
        }
        if self.site.num_hps == Some(0) {
            return Err(invalid("site.num_hps", "At least one heat pump is required"));
        }

        if self.modbus.timeout_ms == 0 {
            return Err(invalid("modbus.timeout_ms", "Must be greater than 0"));
        }
        if self.modbus.retry.max_retries == 0 {
            return Err(invalid("modbus.retry.max_retries", "Must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.modbus.retry.jitter) {
            return Err(invalid("modbus.retry.jitter", "Must be within [0, 1)"));
        }
        if self.polling.max_batch_size == 0 || self.polling.max_batch_size > 125 {
            return Err(invalid("polling.max_batch_size", "Must be within 1..=125"));
        }
        if self.polling.batch_failure_threshold == 0 {
            return Err(invalid(
                "polling.batch_failure_threshold",
                "Must be greater than 0",
            ));
        }

        let tz = self.timezone.trim();
        if !tz.eq_ignore_ascii_case("local") && tz.parse::<chrono_tz::Tz>().is_err() {
            return Err(LambdaError::validation(
                "timezone".to_string(),
                format!("Unknown timezone: {}", self.timezone),
            ));
        }

        crate::logging::parse_log_level(&self.logging.level)
            .map_err(|e| LambdaError::validation("logging.level".to_string(), e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site.port, 502);
        assert_eq!(config.site.slave_id, 1);
        assert_eq!(config.site.update_interval, 30);
        assert_eq!(config.site.write_interval, 9);
        assert_eq!(config.site.pv_surplus_mode, PvSurplusMode::Pos);
        assert_eq!(config.modbus.register_timeouts_ms.get(&0), Some(&2000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.site.host = String::new();
        assert!(config.validate().is_err());

        config = Config::default();
        config.site.port = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.site.num_hc = Some(13);
        assert!(config.validate().is_err());

        config = Config::default();
        config.site.firmware_version = "V1.2.3".to_string();
        assert!(config.validate().is_err());

        config = Config::default();
        config.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_room_temperature_entities_from_flat_keys() {
        let yaml = r#"
site:
  host: 10.0.0.5
  num_hc: 2
  room_temperature_entity_1: sensor.living_room
  room_temperature_entity_2: ""
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.site.room_temperature_entity(1).as_deref(),
            Some("sensor.living_room")
        );
        assert_eq!(config.site.room_temperature_entity(2), None);
        assert_eq!(config.site.num_hc, Some(2));
        assert!(!config.site.counts_configured());
    }

    #[test]
    fn test_shape_from_counts() {
        let mut config = Config::default();
        config.site.num_hps = Some(2);
        config.site.num_hc = Some(3);
        let disabled: BTreeSet<u16> = [1004].into_iter().collect();
        let shape = config.site.shape(&disabled).unwrap();
        assert_eq!(shape.num_hp, 2);
        assert_eq!(shape.num_boil, 1);
        assert_eq!(shape.num_hc, 3);
        assert_eq!(shape.firmware, 6);
        assert!(shape.is_disabled(1004));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.site.port, deserialized.site.port);
        assert_eq!(
            config.heating_curve.points,
            deserialized.heating_curve.points
        );
    }
}
