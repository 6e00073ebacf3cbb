//! Modbus TCP transport for Lambda heat pumps
//!
//! [`ModbusTransport`] is the seam between the engine and the wire. The
//! production implementation, [`ModbusClient`], wraps a `tokio-modbus`
//! context; [`SimulatedTransport`] serves an in-memory register bank for
//! tests and `--simulate`.

use crate::error::{LambdaError, Result};
use crate::logging::get_logger;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::tcp;
use tokio_modbus::prelude::*;

mod sim;

pub use sim::{SimFault, SimulatedTransport};

/// Holding-register transport used by the polling engine, detector and writer
#[async_trait::async_trait]
pub trait ModbusTransport: Send {
    /// Establish the connection; a no-op when already connected
    async fn connect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Drop the connection
    async fn close(&mut self);

    /// Function code 3
    async fn read_holding_registers(
        &mut self,
        slave_id: u8,
        address: u16,
        count: u16,
        deadline: Duration,
    ) -> Result<Vec<u16>>;

    /// Function code 16
    async fn write_multiple_registers(
        &mut self,
        slave_id: u8,
        address: u16,
        values: &[u16],
        deadline: Duration,
    ) -> Result<()>;
}

/// Modbus TCP client backed by `tokio-modbus`
pub struct ModbusClient {
    client: Option<tokio_modbus::client::Context>,
    host: String,
    port: u16,
    connection_timeout: Duration,
    logger: crate::logging::StructuredLogger,
}

impl ModbusClient {
    pub fn new(host: &str, port: u16, connection_timeout: Duration) -> Self {
        Self {
            client: None,
            host: host.to_string(),
            port,
            connection_timeout,
            logger: get_logger("modbus"),
        }
    }

    /// Takes the owned `host:port` so the future does not borrow the client
    async fn resolve(address: String) -> Result<SocketAddr> {
        if let Ok(addr) = address.parse::<SocketAddr>() {
            return Ok(addr);
        }
        tokio::net::lookup_host(&address)
            .await
            .map_err(|e| LambdaError::connection(format!("Cannot resolve {}: {}", address, e)))?
            .next()
            .ok_or_else(|| LambdaError::connection(format!("No address for {}", address)))
    }

    /// Get client reference or error if not connected
    fn get_client(&mut self, slave_id: u8) -> Result<&mut tokio_modbus::client::Context> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| LambdaError::connection("Not connected to Modbus server"))?;
        client.set_slave(Slave(slave_id));
        Ok(client)
    }

    /// Map the nested `tokio-modbus` result onto the engine's error classes.
    /// Transport failures drop the connection so the next tick reconnects.
    fn classify<T>(
        &mut self,
        outcome: std::result::Result<tokio_modbus::Result<T>, tokio::time::error::Elapsed>,
        address: u16,
        op: &str,
    ) -> Result<T> {
        match outcome {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(exception))) => Err(LambdaError::protocol(
                address,
                format!("{} rejected: {:?}", op, exception),
            )),
            Ok(Err(e)) => {
                self.client = None;
                let message = format!("{} at {} failed: {}", op, address, e);
                self.logger.warn(&message);
                Err(LambdaError::connection(message))
            }
            Err(_) => Err(LambdaError::timeout(format!(
                "{} at {} timed out",
                op, address
            ))),
        }
    }
}

#[async_trait::async_trait]
impl ModbusTransport for ModbusClient {
    async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let socket_addr = Self::resolve(format!("{}:{}", self.host, self.port)).await?;
        self.logger
            .info(&format!("Connecting to Modbus server at {}", socket_addr));

        match timeout(self.connection_timeout, tcp::connect(socket_addr)).await {
            Ok(Ok(client)) => {
                self.client = Some(client);
                self.logger.info("Successfully connected to Modbus server");
                Ok(())
            }
            Ok(Err(e)) => {
                let error_msg = format!("Failed to connect to Modbus server: {}", e);
                self.logger.error(&error_msg);
                Err(LambdaError::connection(error_msg))
            }
            Err(_) => {
                let error_msg = format!("Connection to {} timed out", socket_addr);
                self.logger.error(&error_msg);
                Err(LambdaError::timeout(error_msg))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn close(&mut self) {
        if self.client.take().is_some() {
            self.logger.info("Disconnecting from Modbus server");
        }
    }

    async fn read_holding_registers(
        &mut self,
        slave_id: u8,
        address: u16,
        count: u16,
        deadline: Duration,
    ) -> Result<Vec<u16>> {
        self.logger.trace(&format!(
            "Reading {} registers from address {} on slave {}",
            count, address, slave_id
        ));
        let client = self.get_client(slave_id)?;
        let outcome = timeout(deadline, client.read_holding_registers(address, count)).await;
        let words = self.classify(outcome, address, "Read")?;
        if words.len() != count as usize {
            return Err(LambdaError::decode(
                address,
                format!("expected {} registers, got {}", count, words.len()),
            ));
        }
        Ok(words)
    }

    async fn write_multiple_registers(
        &mut self,
        slave_id: u8,
        address: u16,
        values: &[u16],
        deadline: Duration,
    ) -> Result<()> {
        self.logger.debug(&format!(
            "Writing {:?} to registers starting at {} on slave {}",
            values, address, slave_id
        ));
        let client = self.get_client(slave_id)?;
        let outcome = timeout(deadline, client.write_multiple_registers(address, values)).await;
        self.classify(outcome, address, "Write")
    }
}

/// Order of the two words of an int32 register pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WordOrder {
    /// High word at the lower address
    #[default]
    #[serde(rename = "big")]
    HighFirst,
    /// Low word at the lower address
    #[serde(rename = "little")]
    LowFirst,
}

/// Reinterpret a register as two's-complement int16
pub fn decode_int16(raw: u16) -> i16 {
    raw as i16
}

/// Combine an int32 register pair into a signed value
pub fn decode_int32(words: [u16; 2], order: WordOrder) -> i32 {
    let (high, low) = match order {
        WordOrder::HighFirst => (words[0], words[1]),
        WordOrder::LowFirst => (words[1], words[0]),
    };
    (((high as u32) << 16) | low as u32) as i32
}

/// Clamp to the int16 range and encode as a two's-complement word.
/// The flag reports whether clamping happened.
pub fn encode_int16(value: i64) -> (u16, bool) {
    let clamped = value.clamp(i16::MIN as i64, i16::MAX as i64);
    ((clamped as i16) as u16, clamped != value)
}

/// Clamp to the uint16 range
pub fn encode_uint16(value: i64) -> (u16, bool) {
    let clamped = value.clamp(0, u16::MAX as i64);
    (clamped as u16, clamped != value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int16_sign_extension() {
        assert_eq!(decode_int16(0xFFFF), -1);
        assert_eq!(decode_int16(0x8000), i16::MIN);
        assert_eq!(decode_int16(0x7FFF), i16::MAX);
        assert_eq!(decode_int16(0xFD12), -750);
    }

    #[test]
    fn test_int16_encoding_clamps() {
        assert_eq!(encode_int16(-750), (0xFD12, false));
        assert_eq!(encode_int16(40_000), (0x7FFF, true));
        assert_eq!(encode_int16(-40_000), (0x8000, true));
        for v in [i16::MIN, -1, 0, 1, 215, i16::MAX] {
            let (word, clamped) = encode_int16(v as i64);
            assert!(!clamped);
            assert_eq!(decode_int16(word), v);
        }
    }

    #[test]
    fn test_uint16_encoding_clamps() {
        assert_eq!(encode_uint16(-5), (0, true));
        assert_eq!(encode_uint16(70_000), (u16::MAX, true));
        assert_eq!(encode_uint16(1200), (1200, false));
    }

    #[test]
    fn test_int32_word_order() {
        assert_eq!(decode_int32([0x0001, 0x86A0], WordOrder::HighFirst), 100_000);
        assert_eq!(decode_int32([0x86A0, 0x0001], WordOrder::LowFirst), 100_000);
        assert_eq!(decode_int32([0xFFFF, 0xFFFE], WordOrder::HighFirst), -2);
    }

    #[test]
    fn test_word_order_names() {
        let order: WordOrder = serde_yaml::from_str("big").unwrap();
        assert_eq!(order, WordOrder::HighFirst);
        let order: WordOrder = serde_yaml::from_str("little").unwrap();
        assert_eq!(order, WordOrder::LowFirst);
    }

    #[test]
    fn test_modbus_client_creation() {
        let client = ModbusClient::new("127.0.0.1", 502, Duration::from_secs(1));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_connect_runs_on_spawned_task() {
        let addr = ModbusClient::resolve("127.0.0.1:502".to_string()).await.unwrap();
        assert_eq!(addr.port(), 502);

        // Port 1 on loopback refuses; the connect future has to be Send to spawn
        let mut client = ModbusClient::new("127.0.0.1", 1, Duration::from_millis(500));
        let result = tokio::spawn(async move {
            let outcome = client.connect().await;
            (outcome, client.is_connected())
        })
        .await
        .unwrap();
        assert!(result.0.is_err());
        assert!(!result.1);
    }
}
