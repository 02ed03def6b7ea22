//! Error handling for the flow-counter gateway service
//!
//! Protocol-level problems (bad frames, unknown slaves, stale data) are
//! resolved locally into Modbus exception responses and never surface here;
//! this type covers the service-level failures that callers must handle.

use thiserror::Error;

/// Gateway service error type
#[derive(Error, Debug, Clone)]
pub enum FlowSrvError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(String),

    /// Protocol communication errors (Modbus framing, CRC, exceptions)
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Connection establishment and maintenance errors
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Data handling errors (serialization, parsing, conversion)
    #[error("Data error: {0}")]
    DataError(String),

    /// Operation timeout errors
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// State and synchronization errors
    #[error("State error: {0}")]
    StateError(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the gateway service
pub type Result<T> = std::result::Result<T, FlowSrvError>;

impl FlowSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        FlowSrvError::ConfigError(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        FlowSrvError::IoError(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        FlowSrvError::ProtocolError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        FlowSrvError::ConnectionError(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        FlowSrvError::DataError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        FlowSrvError::TimeoutError(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        FlowSrvError::StateError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        FlowSrvError::InternalError(msg.into())
    }
}

impl From<std::io::Error> for FlowSrvError {
    fn from(err: std::io::Error) -> Self {
        FlowSrvError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for FlowSrvError {
    fn from(err: serde_json::Error) -> Self {
        FlowSrvError::DataError(format!("JSON: {err}"))
    }
}

impl From<figment::Error> for FlowSrvError {
    fn from(err: figment::Error) -> Self {
        FlowSrvError::ConfigError(err.to_string())
    }
}

/// Extension trait for adding context to errors
pub trait ErrorExt<T> {
    fn config_error(self, msg: &str) -> Result<T>;
}

impl<T, E> ErrorExt<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn config_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| FlowSrvError::ConfigError(format!("{msg}: {e}")))
    }
}
