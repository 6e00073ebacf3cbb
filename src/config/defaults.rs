use super::*;
use crate::registers::DEFAULT_FIRMWARE;

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            id: "lambda".to_string(),
            name_prefix: "eu08l".to_string(),
            host: "192.168.1.100".to_string(),
            port: 502,
            slave_id: 1,
            update_interval: 30,
            write_interval: 9,
            firmware_version: DEFAULT_FIRMWARE.to_string(),
            num_hps: None,
            num_boil: None,
            num_buff: None,
            num_sol: None,
            num_hc: None,
            room_thermostat_control: false,
            pv_surplus: false,
            pv_surplus_mode: PvSurplusMode::Pos,
            pv_power_sensor_entity: None,
            use_legacy_modbus_names: true,
            int32_word_order: WordOrder::HighFirst,
            overrides_file: None,
            extra: BTreeMap::new(),
        }
    }
}

impl Default for ModbusConfig {
    fn default() -> Self {
        let mut register_timeouts_ms = BTreeMap::new();
        // Register 0 is known to answer slowly on several firmwares
        register_timeouts_ms.insert(0, 2000);
        Self {
            timeout_ms: 3000,
            connect_timeout_ms: 5000,
            register_timeouts_ms,
            health_check_every: 10,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 5.0,
            max_delay_secs: 30.0,
            jitter: 0.2,
            min_delay_secs: 1.0,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout_secs: 30,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 120,
            individual_read_registers: vec![0],
            batch_failure_threshold: 3,
            register_timeout_threshold: 3,
            register_failure_threshold: 5,
            offline_max_secs: 300,
            jitter_secs: 0,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: 3,
            retry_delay_secs: 5,
            background_delay_secs: 38,
            writer_grace_secs: 3,
        }
    }
}

impl Default for CurvePoints {
    fn default() -> Self {
        Self {
            cold_outside: -22.0,
            mid_outside: 0.0,
            warm_outside: 22.0,
            cold_flow: 35.0,
            mid_flow: 28.0,
            warm_flow: 24.0,
        }
    }
}

impl Default for HeatingCurveConfig {
    fn default() -> Self {
        Self {
            points: CurvePoints::default(),
            room_thermostat_offset: 0.0,
            room_thermostat_factor: 1.0,
            precision: 1,
            circuits: BTreeMap::new(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            file: "/data/lambda_heatpump/cycle_energy_persist.json".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/lambda_heatpump.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            modbus: ModbusConfig::default(),
            polling: PollingConfig::default(),
            detection: DetectionConfig::default(),
            heating_curve: HeatingCurveConfig::default(),
            persistence: PersistenceConfig::default(),
            logging: LoggingConfig::default(),
            timezone: "local".to_string(),
        }
    }
}
