#![allow(dead_code)]

use chrono::Utc;
use lambda_heatpump::config::Config;
use lambda_heatpump::modbus::WordOrder;
use lambda_heatpump::polling::{PlannedRegister, RawSnapshot, decode_register};
use lambda_heatpump::registers::resolve_sensor_id;
use std::path::Path;

/// Raw snapshot holding the given scaled values
pub fn raw_snapshot(values: &[(&str, f64)]) -> RawSnapshot {
    let mut raw = RawSnapshot::default();
    for (id, value) in values {
        let (template, index) = resolve_sensor_id(id).unwrap();
        let reg = PlannedRegister {
            template,
            index,
            address: template.absolute_address(index),
            sensor_id: id.to_string(),
        };
        let words = vec![0; template.data_type.word_count() as usize];
        let mut v = decode_register(&reg, &words, WordOrder::HighFirst, Utc::now()).unwrap();
        v.value = *value;
        raw.values.insert(id.to_string(), v);
    }
    raw
}

/// Single HP, one boiler, one HC; no detection, one second ticks
pub fn site_config(persist_dir: &Path) -> Config {
    let mut config = Config::default();
    config.site.num_hps = Some(1);
    config.site.num_boil = Some(1);
    config.site.num_buff = Some(0);
    config.site.num_sol = Some(0);
    config.site.num_hc = Some(1);
    config.site.update_interval = 1;
    config.site.write_interval = 1;
    config.detection.enabled = false;
    config.detection.writer_grace_secs = 0;
    config.persistence.file = persist_dir
        .join("cycle_energy_persist.json")
        .to_string_lossy()
        .into_owned();
    config
}
