//! # lambda-heatpump - Modbus-TCP engine for Lambda heat pumps
//!
//! Polls a Lambda Eu-series heat pump over Modbus TCP, decodes its
//! register map into scaled values, derives cycle counters, energy
//! integrals, CoP and heating-curve set points, and pushes room
//! temperatures and PV surplus power back into the device.
//!
//! ## Architecture
//!
//! - `config`: YAML configuration, validation and the overrides document
//! - `logging`: Structured logging and tracing
//! - `registers`: Register schema per subunit kind and the system shape
//! - `modbus`: Transport trait, `tokio-modbus` client, codecs, simulated bank
//! - `retry` / `circuit_breaker`: Robust read helper around the transport
//! - `polling`: Read planning, batch/individual execution, decoding
//! - `detect`: Module auto-detection
//! - `derived`: Cycles, energy, CoP, heating curve, period arithmetic
//! - `persistence`: Counter document with atomic writes
//! - `scheduler`: Wall-clock aligned period resets
//! - `writer`: Room temperature and PV surplus writes
//! - `offline`: Last-known data while the device is unreachable
//! - `coordinator`: Per-site tick loop, commands and observers

pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod derived;
pub mod detect;
pub mod error;
pub mod external;
pub mod logging;
pub mod modbus;
pub mod naming;
pub mod offline;
pub mod persistence;
pub mod polling;
pub mod registers;
pub mod retry;
pub mod scheduler;
pub mod writer;

// Re-export commonly used types
pub use config::{Config, Overrides};
pub use coordinator::{
    Coordinator, CoordinatorCommand, CoordinatorHandle, CoordinatorState, EngineEvent, Observer,
    Snapshot,
};
pub use derived::Period;
pub use error::{LambdaError, Result};
pub use external::{SensorReading, StateSource, StaticStateSource};
pub use modbus::{ModbusClient, ModbusTransport, SimulatedTransport};
