//! In-memory register bank implementing [`ModbusTransport`]

use super::{ModbusTransport, WordOrder};
use crate::error::{LambdaError, Result};
use crate::registers::SubunitKind;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Fault injected into the simulated bank
#[derive(Debug, Clone, PartialEq)]
pub enum SimFault {
    /// Exception response for a read of exactly `(start, count)`;
    /// `times: None` keeps failing forever
    Exception {
        start: u16,
        count: u16,
        times: Option<u32>,
    },
    /// Any read touching `address` times out
    Timeout { address: u16 },
    /// The next `times` requests fail with a dropped connection
    DropConnection { times: u32 },
    /// The next `times` connection attempts are refused
    RefuseConnect { times: u32 },
}

#[derive(Debug, Default)]
struct Bank {
    registers: HashMap<u16, u16>,
    faults: Vec<SimFault>,
    missing_is_error: bool,
    connected: bool,
    reads: Vec<(u8, u16, u16)>,
    writes: Vec<(u8, u16, Vec<u16>)>,
    demo_tick: u64,
}

/// Simulated heat pump; clones share the same bank
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransport {
    bank: Arc<Mutex<Bank>>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn bank(&self) -> MutexGuard<'_, Bank> {
        self.bank.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.bank().registers.insert(address, value);
    }

    pub fn set_registers(&self, start: u16, values: &[u16]) {
        let mut bank = self.bank();
        for (i, v) in values.iter().enumerate() {
            bank.registers.insert(start + i as u16, *v);
        }
    }

    pub fn set_int16(&self, address: u16, value: i16) {
        self.set_register(address, value as u16);
    }

    pub fn set_int32(&self, address: u16, value: i32, order: WordOrder) {
        let raw = value as u32;
        let (high, low) = ((raw >> 16) as u16, (raw & 0xFFFF) as u16);
        match order {
            WordOrder::HighFirst => self.set_registers(address, &[high, low]),
            WordOrder::LowFirst => self.set_registers(address, &[low, high]),
        }
    }

    pub fn register(&self, address: u16) -> Option<u16> {
        self.bank().registers.get(&address).copied()
    }

    pub fn remove_register(&self, address: u16) {
        self.bank().registers.remove(&address);
    }

    pub fn inject(&self, fault: SimFault) {
        self.bank().faults.push(fault);
    }

    pub fn clear_faults(&self) {
        self.bank().faults.clear();
    }

    /// Unknown addresses answer with an illegal data address exception
    pub fn set_missing_is_error(&self, enabled: bool) {
        self.bank().missing_is_error = enabled;
    }

    /// Recorded `(slave, address, count)` read requests
    pub fn reads(&self) -> Vec<(u8, u16, u16)> {
        self.bank().reads.clone()
    }

    /// Recorded `(slave, address, values)` write requests
    pub fn writes(&self) -> Vec<(u8, u16, Vec<u16>)> {
        self.bank().writes.clone()
    }

    pub fn clear_log(&self) {
        let mut bank = self.bank();
        bank.reads.clear();
        bank.writes.clear();
    }

    /// A bank resembling a single-HP installation with one boiler and one
    /// heating circuit, used by `--simulate`
    pub fn demo() -> Self {
        let sim = Self::new();
        sim.set_int16(2, 54); // ambient 5.4 °C
        sim.set_int16(3, 48);
        sim.set_int16(4, 50);
        sim.set_register(1, 1);
        sim.set_register(101, 1);
        // HP1
        sim.set_register(1002, 7);
        sim.set_register(1003, 1);
        sim.set_int16(1004, 3512);
        sim.set_int16(1005, 2987);
        sim.set_int16(1007, 612);
        sim.set_int16(1008, 288);
        sim.set_int16(1011, 62);
        sim.set_int16(1012, 1450);
        sim.set_int16(1013, 412);
        sim.set_int32(1020, 4_250_000, WordOrder::HighFirst);
        sim.set_int32(1022, 17_100_000, WordOrder::HighFirst);
        // Boiler 1
        sim.set_register(2001, 0);
        sim.set_int16(2002, 512);
        sim.set_int16(2003, 488);
        sim.set_int16(2050, 520);
        // HC1
        sim.set_register(5001, 0);
        sim.set_int16(5002, 348);
        sim.set_int16(5003, 296);
        sim.set_int16(5004, 212);
        sim.set_int16(5005, 350);
        sim.set_register(5006, 2);
        sim.set_int16(5050, 0);
        sim.set_int16(5051, 215);
        {
            let mut bank = sim.bank();
            let installed = [
                (SubunitKind::Main, 1),
                (SubunitKind::Hp, 1),
                (SubunitKind::Boil, 1),
                (SubunitKind::Hc, 1),
            ];
            for (kind, count) in installed {
                for index in 1..=count {
                    for t in kind.templates() {
                        for w in 0..t.data_type.word_count() {
                            bank.registers.entry(t.absolute_address(index) + w).or_insert(0);
                        }
                    }
                }
            }
            // Uninstalled modules answer with an exception, as the real firmware does
            bank.missing_is_error = true;
        }
        sim
    }

    /// Advance the demo bank: accumulate energy and cycle the operating state
    pub fn advance_demo(&self) {
        let tick = {
            let mut bank = self.bank();
            bank.demo_tick += 1;
            bank.demo_tick
        };
        let read_i32 = |addr: u16| -> i32 {
            let high = self.register(addr).unwrap_or(0) as u32;
            let low = self.register(addr + 1).unwrap_or(0) as u32;
            ((high << 16) | low) as i32
        };
        // Ten minutes of heating, two of hot water
        let state = if tick % 12 >= 10 { 2 } else { 1 };
        self.set_register(1003, state);
        self.set_int32(1020, read_i32(1020) + 120, WordOrder::HighFirst);
        self.set_int32(1022, read_i32(1022) + 480, WordOrder::HighFirst);
    }

    fn take_fault<F>(bank: &mut Bank, mut matches: F) -> Option<SimFault>
    where
        F: FnMut(&SimFault) -> bool,
    {
        let pos = bank.faults.iter().position(&mut matches)?;
        let fault = bank.faults[pos].clone();
        let exhausted = match &mut bank.faults[pos] {
            SimFault::Exception { times: Some(n), .. }
            | SimFault::DropConnection { times: n }
            | SimFault::RefuseConnect { times: n } => {
                *n = n.saturating_sub(1);
                *n == 0
            }
            _ => false,
        };
        if exhausted {
            bank.faults.remove(pos);
        }
        Some(fault)
    }
}

#[async_trait::async_trait]
impl ModbusTransport for SimulatedTransport {
    async fn connect(&mut self) -> Result<()> {
        let mut bank = self.bank();
        if Self::take_fault(&mut bank, |f| matches!(f, SimFault::RefuseConnect { .. })).is_some() {
            bank.connected = false;
            return Err(LambdaError::connection("Connection refused (simulated)"));
        }
        bank.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.bank().connected
    }

    async fn close(&mut self) {
        self.bank().connected = false;
    }

    async fn read_holding_registers(
        &mut self,
        slave_id: u8,
        address: u16,
        count: u16,
        _deadline: Duration,
    ) -> Result<Vec<u16>> {
        let mut bank = self.bank();
        bank.reads.push((slave_id, address, count));
        if !bank.connected {
            return Err(LambdaError::connection("Not connected (simulated)"));
        }
        if Self::take_fault(&mut bank, |f| matches!(f, SimFault::DropConnection { .. })).is_some() {
            bank.connected = false;
            return Err(LambdaError::connection("Connection reset (simulated)"));
        }
        let end = address.saturating_add(count);
        let touches_timeout = bank.faults.iter().any(|f| {
            matches!(f, SimFault::Timeout { address: a } if (address..end).contains(a))
        });
        if touches_timeout {
            return Err(LambdaError::timeout(format!(
                "Read at {} timed out (simulated)",
                address
            )));
        }
        let exception = Self::take_fault(&mut bank, |f| {
            matches!(f, SimFault::Exception { start, count: c, .. } if *start == address && *c == count)
        });
        if exception.is_some() {
            return Err(LambdaError::protocol(address, "Illegal data address (simulated)"));
        }

        let mut words = Vec::with_capacity(count as usize);
        for addr in address..end {
            match bank.registers.get(&addr) {
                Some(v) => words.push(*v),
                None if bank.missing_is_error => {
                    return Err(LambdaError::protocol(addr, "Illegal data address (simulated)"));
                }
                None => words.push(0),
            }
        }
        Ok(words)
    }

    async fn write_multiple_registers(
        &mut self,
        slave_id: u8,
        address: u16,
        values: &[u16],
        _deadline: Duration,
    ) -> Result<()> {
        let mut bank = self.bank();
        bank.writes.push((slave_id, address, values.to_vec()));
        if !bank.connected {
            return Err(LambdaError::connection("Not connected (simulated)"));
        }
        if Self::take_fault(&mut bank, |f| matches!(f, SimFault::DropConnection { .. })).is_some() {
            bank.connected = false;
            return Err(LambdaError::connection("Connection reset (simulated)"));
        }
        for (i, v) in values.iter().enumerate() {
            bank.registers.insert(address + i as u16, *v);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_reads_and_writes_share_the_bank() {
        let sim = SimulatedTransport::new();
        sim.set_registers(1000, &[1, 2, 3]);
        let mut transport = sim.clone();
        transport.connect().await.unwrap();
        assert_eq!(
            transport.read_holding_registers(1, 1000, 3, T).await.unwrap(),
            vec![1, 2, 3]
        );
        transport
            .write_multiple_registers(1, 102, &[0xFD12], T)
            .await
            .unwrap();
        assert_eq!(sim.register(102), Some(0xFD12));
        assert_eq!(sim.writes(), vec![(1, 102, vec![0xFD12])]);
        assert_eq!(sim.reads(), vec![(1, 1000, 3)]);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let mut sim = SimulatedTransport::new();
        sim.set_registers(1050, &[0; 5]);
        sim.inject(SimFault::Exception {
            start: 1050,
            count: 5,
            times: Some(1),
        });
        sim.inject(SimFault::Timeout { address: 1052 });
        sim.connect().await.unwrap();

        let err = sim.read_holding_registers(1, 1050, 5, T).await.unwrap_err();
        assert!(err.is_timeout());
        sim.clear_faults();
        sim.inject(SimFault::Exception {
            start: 1050,
            count: 5,
            times: Some(1),
        });
        assert!(sim.read_holding_registers(1, 1050, 5, T).await.unwrap_err().is_protocol());
        assert!(sim.read_holding_registers(1, 1050, 5, T).await.is_ok());
        assert!(sim.read_holding_registers(1, 1051, 1, T).await.is_ok());

        sim.inject(SimFault::DropConnection { times: 1 });
        assert!(sim.read_holding_registers(1, 1050, 1, T).await.unwrap_err().is_connection());
        assert!(!sim.is_connected());
    }

    #[tokio::test]
    async fn test_missing_registers() {
        let mut sim = SimulatedTransport::new();
        sim.connect().await.unwrap();
        assert_eq!(sim.read_holding_registers(1, 1103, 1, T).await.unwrap(), vec![0]);
        sim.set_missing_is_error(true);
        assert!(sim.read_holding_registers(1, 1103, 1, T).await.unwrap_err().is_protocol());
    }

    #[test]
    fn test_demo_bank_advances() {
        let sim = SimulatedTransport::demo();
        let before = sim.register(1021).unwrap();
        sim.advance_demo();
        assert_ne!(sim.register(1021).unwrap(), before);
        assert_eq!(sim.register(1003), Some(1));
    }
}
