//! Polling engine
//!
//! Materializes the full register snapshot each tick. Registers are read in
//! batches planned by [`ReadPlan`]; misbehaving batches and registers are
//! demoted to individual reads by the [`FaultTracker`]. Single register
//! failures are dropped from the snapshot, transport failures are returned
//! to the caller.

use crate::config::{PollingConfig, PvSurplusMode};
use crate::error::{LambdaError, Result};
use crate::logging::get_logger;
use crate::modbus::{ModbusTransport, WordOrder};
use crate::registers::{DataType, SystemShape};
use crate::retry::RobustReader;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

mod decode;
mod faults;
mod plan;

pub use decode::{RegisterValue, decode_register, decode_register_as, raw_integer, round_to};
pub use faults::FaultTracker;
pub use plan::{Batch, PlannedRegister, ReadPlan};

/// Decoded registers of one poll cycle keyed by sensor id
#[derive(Debug, Clone, Default)]
pub struct RawSnapshot {
    pub values: BTreeMap<String, RegisterValue>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawSnapshot {
    pub fn get(&self, sensor_id: &str) -> Option<&RegisterValue> {
        self.values.get(sensor_id)
    }

    /// Full-precision value of a sensor
    pub fn value(&self, sensor_id: &str) -> Option<f64> {
        self.values.get(sensor_id).map(|v| v.value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

const PV_POWER_SENSOR: &str = "emgr_actual_power";

/// Errors that abort the whole tick rather than a single register
fn is_fatal(err: &LambdaError) -> bool {
    matches!(
        err,
        LambdaError::Connection { .. } | LambdaError::Shutdown | LambdaError::CircuitOpen { .. }
    )
}

pub struct PollingEngine {
    slave_id: u8,
    word_order: WordOrder,
    max_batch_size: u16,
    /// Type `emgr_actual_power` is read with, following the PV surplus mode
    pv_power_type: DataType,
    plan: ReadPlan,
    faults: FaultTracker,
    logger: crate::logging::StructuredLogger,
}

impl PollingEngine {
    pub fn new(
        shape: &SystemShape,
        config: &PollingConfig,
        slave_id: u8,
        word_order: WordOrder,
    ) -> Self {
        let plan = ReadPlan::build(shape, config.max_batch_size);
        let logger = get_logger("polling");
        logger.info(&format!(
            "Planned {} registers in {} batches",
            plan.registers.len(),
            plan.batches.len()
        ));
        Self {
            slave_id,
            word_order,
            max_batch_size: config.max_batch_size,
            pv_power_type: PvSurplusMode::default().data_type(),
            plan,
            faults: FaultTracker::new(config),
            logger,
        }
    }

    /// Rebuild the read plan after the shape changed; fault state is kept
    pub fn replan(&mut self, shape: &SystemShape) {
        self.plan = ReadPlan::build(shape, self.max_batch_size);
        self.logger.info(&format!(
            "Re-planned {} registers in {} batches",
            self.plan.registers.len(),
            self.plan.batches.len()
        ));
    }

    /// Read the PV power register with the signedness the writer uses
    pub fn with_pv_surplus_mode(mut self, mode: PvSurplusMode) -> Self {
        self.pv_power_type = mode.data_type();
        self
    }

    fn data_type_of(&self, reg: &PlannedRegister) -> DataType {
        if reg.template.name == PV_POWER_SENSOR {
            self.pv_power_type
        } else {
            reg.template.data_type
        }
    }

    pub fn plan(&self) -> &ReadPlan {
        &self.plan
    }

    pub fn faults(&self) -> &FaultTracker {
        &self.faults
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    /// Read every planned batch in address order
    pub async fn poll(
        &mut self,
        transport: &mut dyn ModbusTransport,
        reader: &mut RobustReader,
    ) -> Result<RawSnapshot> {
        let now = Utc::now();
        let mut snapshot = RawSnapshot {
            values: BTreeMap::new(),
            timestamp: Some(now),
        };
        let mut last_error: Option<LambdaError> = None;

        for bi in 0..self.plan.batches.len() {
            let batch = &self.plan.batches[bi];
            let key = batch.key();
            let individual = batch.entries.len() == 1
                || self.faults.is_sticky(key)
                || self
                    .plan
                    .batch_entries(batch)
                    .any(|r| self.faults.needs_individual(r.address));

            if !individual {
                match reader.read(transport, self.slave_id, batch.start, batch.count).await {
                    Ok(words) => {
                        self.faults.record_batch_success(key);
                        self.accept_batch(bi, &words, now, &mut snapshot);
                        continue;
                    }
                    Err(e) if is_fatal(&e) => return Err(e),
                    Err(e) => {
                        self.logger.debug(&format!(
                            "Batch read of {} registers at {} failed: {}",
                            key.1, key.0, e
                        ));
                        self.faults.record_batch_failure(key, &e);
                    }
                }
            }

            self.read_individually(bi, transport, reader, now, &mut snapshot, &mut last_error)
                .await?;
        }

        if snapshot.is_empty() && !self.plan.registers.is_empty() {
            return Err(last_error.unwrap_or_else(|| LambdaError::timeout("No register answered")));
        }
        Ok(snapshot)
    }

    fn accept_batch(
        &mut self,
        bi: usize,
        words: &[u16],
        now: DateTime<Utc>,
        snapshot: &mut RawSnapshot,
    ) {
        let batch = &self.plan.batches[bi];
        let mut offset = 0usize;
        for &ri in &batch.entries {
            let reg = &self.plan.registers[ri];
            let n = reg.word_count() as usize;
            let slice = words.get(offset..offset + n).unwrap_or(&[]);
            offset += n;
            match decode_register_as(reg, self.data_type_of(reg), slice, self.word_order, now) {
                Ok(v) => {
                    self.faults.record_register_success(reg.address);
                    snapshot.values.insert(reg.sensor_id.clone(), v);
                }
                Err(e) => self.logger.debug(&format!("Dropping {}: {}", reg.sensor_id, e)),
            }
        }
    }

    async fn read_individually(
        &mut self,
        bi: usize,
        transport: &mut dyn ModbusTransport,
        reader: &mut RobustReader,
        now: DateTime<Utc>,
        snapshot: &mut RawSnapshot,
        last_error: &mut Option<LambdaError>,
    ) -> Result<()> {
        let entries = self.plan.batches[bi].entries.clone();
        for ri in entries {
            let (address, count) = {
                let reg = &self.plan.registers[ri];
                (reg.address, reg.word_count())
            };
            match reader.read(transport, self.slave_id, address, count).await {
                Ok(words) => {
                    let reg = &self.plan.registers[ri];
                    match decode_register_as(reg, self.data_type_of(reg), &words, self.word_order, now) {
                        Ok(v) => {
                            self.faults.record_register_success(address);
                            snapshot.values.insert(reg.sensor_id.clone(), v);
                        }
                        Err(e) => self.logger.debug(&format!("Dropping {}: {}", reg.sensor_id, e)),
                    }
                }
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    self.logger.debug(&format!(
                        "Read of {} failed: {}",
                        self.plan.registers[ri].sensor_id, e
                    ));
                    self.faults.record_register_failure(address, &e);
                    *last_error = Some(e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::{SimFault, SimulatedTransport};
    use crate::retry::{RetryPolicy, TimeoutTable};
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

    #[tokio::test]
    async fn test_pv_power_follows_surplus_mode() {
        let sim = SimulatedTransport::demo();
        sim.set_register(102, 40_000);
        sim.set_int16(103, -100);
        let mut t = sim.clone();
        t.connect().await.unwrap();
        let shape = SystemShape::default();

        let mut pos = PollingEngine::new(&shape, &PollingConfig::default(), 1, WordOrder::HighFirst)
            .with_pv_surplus_mode(PvSurplusMode::Pos);
        let raw = pos.poll(&mut t, &mut reader()).await.unwrap();
        assert_eq!(raw.value("emgr_actual_power"), Some(40_000.0));
        // Neighbours in the same batch keep their template type
        assert_eq!(raw.value("emgr_actual_power_consumption"), Some(-100.0));

        sim.set_int16(102, -750);
        let mut neg = PollingEngine::new(&shape, &PollingConfig::default(), 1, WordOrder::HighFirst)
            .with_pv_surplus_mode(PvSurplusMode::Neg);
        let raw = neg.poll(&mut t, &mut reader()).await.unwrap();
        assert_eq!(raw.value("emgr_actual_power"), Some(-750.0));
    }

    #[tokio::test]
    async fn test_batch_and_individual_reads_agree() {
        let sim = SimulatedTransport::demo();
        let mut t = sim.clone();
        t.connect().await.unwrap();
        let shape = SystemShape::default();
        let mut engine = PollingEngine::new(&shape, &PollingConfig::default(), 1, WordOrder::HighFirst);
        let batched = engine.poll(&mut t, &mut reader()).await.unwrap();

        let config = PollingConfig {
            max_batch_size: 1,
            ..PollingConfig::default()
        };
        let mut single = PollingEngine::new(&shape, &config, 1, WordOrder::HighFirst);
        let individual = single.poll(&mut t, &mut reader()).await.unwrap();

        assert_eq!(batched.len(), individual.len());
        for (id, v) in &batched.values {
            assert_eq!(individual.value(id), Some(v.value), "{}", id);
        }
        assert!((batched.value("hp1_flow_line_temperature").unwrap() - 35.12).abs() < 1e-9);
        assert_eq!(
            batched.value("hp1_compressor_power_consumption_accumulated"),
            Some(4_250_000.0)
        );
    }

    #[tokio::test]
    async fn test_connection_loss_aborts_the_tick() {
        let sim = SimulatedTransport::demo();
        let mut t = sim.clone();
        t.connect().await.unwrap();
        sim.inject(SimFault::RefuseConnect { times: 10 });
        sim.inject(SimFault::DropConnection { times: 1 });
        let mut engine = PollingEngine::new(
            &SystemShape::default(),
            &PollingConfig::default(),
            1,
            WordOrder::HighFirst,
        );
        let mut r = RobustReader::new(
            RetryPolicy {
                max_retries: 1,
                ..RetryPolicy::default()
            },
            TimeoutTable::new(Duration::from_secs(3), &BTreeMap::new()),
            None,
            Arc::new(AtomicBool::new(false)),
        );
        assert!(engine.poll(&mut t, &mut r).await.unwrap_err().is_connection());
    }

    #[tokio::test]
    async fn test_failed_register_is_dropped_others_kept() {
        let sim = SimulatedTransport::demo();
        let mut t = sim.clone();
        t.connect().await.unwrap();
        let mut engine = PollingEngine::new(
            &SystemShape::default(),
            &PollingConfig::default(),
            1,
            WordOrder::HighFirst,
        );
        // Batch 1004..1009 fails as a whole and for 1006 individually
        sim.inject(SimFault::Exception {
            start: 1004,
            count: 6,
            times: None,
        });
        sim.inject(SimFault::Exception {
            start: 1006,
            count: 1,
            times: None,
        });
        let snap = engine.poll(&mut t, &mut reader()).await.unwrap();
        assert!(snap.get("hp1_volume_flow_heat_sink").is_none());
        assert!(snap.get("hp1_flow_line_temperature").is_some());
        assert!(snap.get("hp1_return_line_temperature").is_some());
        assert_eq!(engine.faults().batch_failures((1004, 6)), 1);
    }
}
