use lambda_heatpump::config::DetectionConfig;
use lambda_heatpump::detect::AutoDetector;
use lambda_heatpump::modbus::{ModbusTransport, SimFault, SimulatedTransport};
use lambda_heatpump::registers::{SubunitKind, SystemShape};
use lambda_heatpump::retry::{RetryPolicy, RobustReader, TimeoutTable};
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

/// Bank answering only for the given probe registers
fn bank(present: &[(u16, u16)]) -> SimulatedTransport {
    let sim = SimulatedTransport::new();
    sim.set_missing_is_error(true);
    for (address, value) in present {
        sim.set_register(*address, *value);
    }
    sim
}

#[tokio::test]
async fn full_installation() {
    let mut sim = bank(&[
        (1003, 1),
        (1103, 0),
        (1203, 3),
        (2001, 0),
        (3001, 2),
        (3101, 0),
        (4001, 1),
        (5001, 1),
        (5101, 0),
        (5201, 0),
        // Sentinel stops the scan
        (5301, 0xFFFF),
        (5401, 1),
    ]);
    let detector = AutoDetector::new(&DetectionConfig::default(), 1);
    let counts = detector.detect(&mut sim, &mut reader()).await.unwrap();

    assert_eq!(counts.get(SubunitKind::Hp), 3);
    assert_eq!(counts.get(SubunitKind::Boil), 1);
    assert_eq!(counts.get(SubunitKind::Buff), 2);
    assert_eq!(counts.get(SubunitKind::Sol), 1);
    assert_eq!(counts.get(SubunitKind::Hc), 3);
    // Three HPs is the maximum, so 1303 is never probed
    assert!(!sim.reads().iter().any(|r| r.1 == 1303));

    let mut shape = SystemShape::default();
    assert!(counts.apply(&mut shape));
    assert_eq!(shape.count(SubunitKind::Hc), 3);
    assert_eq!(shape.count(SubunitKind::Buff), 2);
}

#[tokio::test(start_paused = true)]
async fn refused_connection_is_retried() {
    let mut sim = bank(&[(1003, 0)]);
    sim.inject(SimFault::RefuseConnect { times: 1 });
    let config = DetectionConfig {
        attempts: 2,
        ..DetectionConfig::default()
    };
    let detector = AutoDetector::new(&config, 1);
    let counts = detector.detect(&mut sim, &mut reader()).await.unwrap();
    assert!(sim.is_connected());
    assert_eq!(counts.get(SubunitKind::Hp), 1);
    assert_eq!(counts.get(SubunitKind::Hc), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_heat_pump_is_an_error() {
    let mut sim = bank(&[(1003, 0x7FFF), (5001, 1)]);
    let config = DetectionConfig {
        attempts: 1,
        ..DetectionConfig::default()
    };
    let detector = AutoDetector::new(&config, 1);
    assert!(detector.detect(&mut sim, &mut reader()).await.is_err());
}
