use lambda_heatpump::config::Overrides;
use std::fs;

const DOCUMENT: &str = r#"
disabled_registers:
  - 2004
  - "5007"
sensors_names_override:
  - id: hp1_flow_line_temperature
    override_name: Vorlauf
  - id: missing_name
cycling_offsets:
  hp1:
    heating_cycling_total: 1500
    hot_water_cycling_total: 12.6
energy_consumption_offsets:
  hp1:
    heating_energy_total: 250.5
    cooling_energy_total: lots
energy_consumption_sensors:
  hp1:
    sensor_entity_id: sensor.hp1_meter
  hp2: sensor.hp2_meter
thermal_consumption_sensors:
  hp1:
    sensor_entity_id: sensor.hp1_heat_meter
"#;

#[test]
fn full_document_is_parsed() {
    let o = Overrides::from_yaml_str(DOCUMENT);
    assert!(o.disabled_registers.contains(&2004));
    assert!(o.disabled_registers.contains(&5007));
    assert_eq!(o.display_name("hp1_flow_line_temperature"), Some("Vorlauf"));
    assert_eq!(o.display_name("missing_name"), None);
    assert_eq!(o.cycling_offset(1, "heating_cycling_total"), 1500);
    assert_eq!(o.cycling_offset(1, "hot_water_cycling_total"), 13);
    assert_eq!(o.cycling_offset(2, "heating_cycling_total"), 0);
    assert!((o.energy_offset(1, "heating_energy_total") - 250.5).abs() < 1e-9);
    // Non-numeric values fall back to zero
    assert_eq!(o.energy_offset(1, "cooling_energy_total"), 0.0);
    assert_eq!(o.energy_sensor_for(1), Some("sensor.hp1_meter"));
    assert_eq!(o.energy_sensor_for(2), Some("sensor.hp2_meter"));
    assert_eq!(o.thermal_sensor_for(1), Some("sensor.hp1_heat_meter"));
    assert_eq!(o.thermal_sensor_for(2), None);
}

#[test]
fn malformed_section_does_not_fail_the_rest() {
    let yaml = r#"
disabled_registers: not-a-list
cycling_offsets:
  hp1:
    heating_cycling_total: 7
"#;
    let o = Overrides::from_yaml_str(yaml);
    assert!(o.disabled_registers.is_empty());
    assert_eq!(o.cycling_offset(1, "heating_cycling_total"), 7);
}

#[test]
fn bad_register_entry_drops_the_section() {
    let o = Overrides::from_yaml_str("disabled_registers: [1000, oops]\n");
    assert!(o.disabled_registers.is_empty());
}

#[test]
fn missing_or_broken_files_yield_defaults() {
    let tmp_dir = tempfile::tempdir().unwrap();
    assert_eq!(
        Overrides::from_file(tmp_dir.path().join("lambda_wp_config.yaml")),
        Overrides::default()
    );

    let path = tmp_dir.path().join("broken.yaml");
    fs::write(&path, "disabled_registers: [1000\n").unwrap();
    assert_eq!(Overrides::from_file(&path), Overrides::default());

    let path = tmp_dir.path().join("good.yaml");
    fs::write(&path, DOCUMENT).unwrap();
    assert_eq!(Overrides::from_file(&path).disabled_registers.len(), 2);
}
