use lambda_heatpump::config::{Config, PvSurplusMode};
use lambda_heatpump::modbus::WordOrder;
use std::fs;

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = Config::default();
    cfg.site.host = "10.0.0.5".to_string();
    cfg.site.num_hps = Some(2);
    cfg.site.pv_surplus_mode = PvSurplusMode::Neg;
    cfg.site.int32_word_order = WordOrder::LowFirst;
    cfg.logging.file = path.with_extension("log").to_string_lossy().to_string();

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.site.host, "10.0.0.5");
    assert_eq!(loaded.site.num_hps, Some(2));
    assert_eq!(loaded.site.num_boil, None);
    assert_eq!(loaded.site.pv_surplus_mode, PvSurplusMode::Neg);
    assert_eq!(loaded.site.int32_word_order, WordOrder::LowFirst);
    assert_eq!(loaded.logging.file, cfg.logging.file);
    assert!(loaded.validate().is_ok());
}

#[test]
fn partial_yaml_fills_defaults() {
    let yaml = r#"
site:
  host: heatpump.local
  pv_surplus: true
  pv_surplus_mode: neg
  pv_power_sensor_entity: sensor.pv_surplus
  int32_word_order: little
  room_temperature_entity_1: sensor.living_room
timezone: Europe/Vienna
"#;
    let cfg: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.site.host, "heatpump.local");
    assert_eq!(cfg.site.port, 502);
    assert_eq!(cfg.site.update_interval, 30);
    assert_eq!(cfg.site.pv_surplus_mode, PvSurplusMode::Neg);
    assert_eq!(cfg.site.int32_word_order, WordOrder::LowFirst);
    assert_eq!(
        cfg.site.room_temperature_entity(1).as_deref(),
        Some("sensor.living_room")
    );
    assert_eq!(cfg.polling.max_batch_size, 120);
    assert_eq!(cfg.polling.offline_max_secs, 300);
    assert_eq!(cfg.detection.background_delay_secs, 38);
    assert_eq!(cfg.modbus.retry.max_retries, 3);
    assert!(cfg.validate().is_ok());
}

#[test]
fn config_validation_errors() {
    let mut cfg = Config::default();
    cfg.site.slave_id = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.site.update_interval = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.site.num_hps = Some(0);
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.polling.max_batch_size = 126;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.modbus.retry.jitter = 1.5;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.logging.level = "LOUD".to_string();
    let err = cfg.validate().unwrap_err();
    assert!(format!("{}", err).contains("logging.level"));
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), b"site: [unclosed").unwrap();
    let err = Config::from_file(tmp.path()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Serialization error"));
}

#[test]
fn from_missing_file_fails_with_io_error() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let err = Config::from_file(tmp_dir.path().join("absent.yaml")).unwrap_err();
    assert!(format!("{}", err).contains("I/O error"));
}
