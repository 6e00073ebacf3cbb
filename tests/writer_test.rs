use lambda_heatpump::config::{PvSurplusMode, SiteConfig};
use lambda_heatpump::external::StaticStateSource;
use lambda_heatpump::modbus::{SimFault, SimulatedTransport};
use lambda_heatpump::retry::{RetryPolicy, RobustReader, TimeoutTable};
use lambda_heatpump::writer::{PV_POWER_REGISTER, Writer, room_temperature_register};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

fn reader() -> RobustReader {
    RobustReader::new(
        RetryPolicy::default(),
        TimeoutTable::new(Duration::from_secs(3), &BTreeMap::new()),
        None,
        Arc::new(AtomicBool::new(false)),
    )
}

fn site() -> SiteConfig {
    let mut site = SiteConfig::default();
    site.room_thermostat_control = true;
    site.pv_surplus = true;
    site.pv_surplus_mode = PvSurplusMode::Pos;
    site.pv_power_sensor_entity = Some("sensor.pv_power".to_string());
    site.extra.insert(
        "room_temperature_entity_1".to_string(),
        serde_yaml::Value::String("sensor.living_room".to_string()),
    );
    site.extra.insert(
        "room_temperature_entity_2".to_string(),
        serde_yaml::Value::String("sensor.bedroom".to_string()),
    );
    site
}

#[tokio::test]
async fn writes_room_temperatures_and_pv_power() {
    let mut sim = SimulatedTransport::new();
    let states = StaticStateSource::new();
    states.set("sensor.living_room", 21.46, Some("°C"));
    states.set("sensor.pv_power", 1.2, Some("kW"));

    let mut writer = Writer::new(&site(), 2);
    let written = writer
        .run_once(&mut sim, &mut reader(), &states)
        .await
        .unwrap();

    // The bedroom entity has no state and is skipped
    assert_eq!(written, 2);
    assert_eq!(room_temperature_register(1), 5004);
    assert_eq!(sim.register(5004), Some(215));
    assert_eq!(sim.register(room_temperature_register(2)), None);
    assert_eq!(sim.register(PV_POWER_REGISTER), Some(1200));
}

#[tokio::test]
async fn positive_mode_clamps_export() {
    let mut sim = SimulatedTransport::new();
    let states = StaticStateSource::new();
    states.set("sensor.pv_power", -300.0, Some("W"));

    let mut writer = Writer::new(&site(), 1);
    writer
        .run_once(&mut sim, &mut reader(), &states)
        .await
        .unwrap();
    assert_eq!(sim.register(PV_POWER_REGISTER), Some(0));

    writer.set_num_hc(0);
    states.set("sensor.living_room", 19.0, None);
    sim.clear_log();
    writer
        .run_once(&mut sim, &mut reader(), &states)
        .await
        .unwrap();
    assert_eq!(sim.writes(), vec![(1, PV_POWER_REGISTER, vec![0])]);
}

#[tokio::test]
async fn dropped_connection_aborts_the_round() {
    let mut sim = SimulatedTransport::new();
    let states = StaticStateSource::new();
    states.set("sensor.living_room", 20.0, None);
    states.set("sensor.pv_power", 500.0, Some("W"));
    sim.inject(SimFault::DropConnection { times: 1 });

    let mut writer = Writer::new(&site(), 1);
    let err = writer
        .run_once(&mut sim, &mut reader(), &states)
        .await
        .unwrap_err();
    assert!(err.is_connection());
    assert_eq!(sim.writes().len(), 1);
    assert_eq!(sim.register(PV_POWER_REGISTER), None);
}
