//! Error types and handling for the heat pump engine
//!
//! This module defines the error types used throughout the crate. The
//! variants follow the recovery classes of the engine: transport problems
//! are retried or trigger a reconnect, per-register problems are dropped
//! locally, configuration problems fall back to defaults.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, LambdaError>;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum LambdaError {
    /// Configuration-related errors (malformed config or overrides document)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Modbus request did not complete within its timeout
    #[error("Modbus timeout: {message}")]
    Timeout { message: String },

    /// Socket closed, reset or never established
    #[error("Modbus connection error: {message}")]
    Connection { message: String },

    /// The device answered with a Modbus exception response
    #[error("Modbus exception at register {address}: {message}")]
    Protocol { address: u16, message: String },

    /// Register payload does not fit its template
    #[error("Decode error at register {address}: {message}")]
    Decode { address: u16, message: String },

    /// Register is listed in `disabled_registers`
    #[error("Register {address} is disabled")]
    RegisterDisabled { address: u16 },

    /// Template requires a newer firmware than installed
    #[error("Register {name} requires firmware {required}, installed {installed}")]
    FirmwareUnsupported {
        name: String,
        required: u8,
        installed: u8,
    },

    /// Circuit breaker refused the call
    #[error("Circuit breaker open: {message}")]
    CircuitOpen { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Persist document could not be read or written
    #[error("Persistence error: {message}")]
    Persist { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Host is stopping; operation was short-circuited
    #[error("Shutdown in progress")]
    Shutdown,

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl LambdaError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        LambdaError::Config {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        LambdaError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        LambdaError::Connection {
            message: message.into(),
        }
    }

    /// Create a new Modbus exception error
    pub fn protocol<S: Into<String>>(address: u16, message: S) -> Self {
        LambdaError::Protocol {
            address,
            message: message.into(),
        }
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(address: u16, message: S) -> Self {
        LambdaError::Decode {
            address,
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        LambdaError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new circuit breaker error
    pub fn circuit_open<S: Into<String>>(message: S) -> Self {
        LambdaError::CircuitOpen {
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persist<S: Into<String>>(message: S) -> Self {
        LambdaError::Persist {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        LambdaError::Io {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        LambdaError::Generic {
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LambdaError::Timeout { .. })
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, LambdaError::Connection { .. })
    }

    /// Timeout or connection failure, i.e. anything retry-worthy on the wire
    pub fn is_transport(&self) -> bool {
        self.is_timeout() || self.is_connection()
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, LambdaError::Protocol { .. })
    }
}

impl From<std::io::Error> for LambdaError {
    fn from(err: std::io::Error) -> Self {
        LambdaError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for LambdaError {
    fn from(err: serde_yaml::Error) -> Self {
        LambdaError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for LambdaError {
    fn from(err: serde_json::Error) -> Self {
        LambdaError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for LambdaError {
    fn from(err: chrono::ParseError) -> Self {
        LambdaError::validation("datetime".to_string(), err.to_string())
    }
}

impl From<tokio::task::JoinError> for LambdaError {
    fn from(err: tokio::task::JoinError) -> Self {
        LambdaError::generic(format!("Background task failed: {}", err))
    }
}
