//! flowsrv: flow-counter polling service and Modbus TCP gateway
//!
//! Polls up to twelve flow counters over a shared RS-485 bus and serves
//! their data to Modbus TCP clients from an in-memory cache. The two
//! halves are decoupled: the poll engine is the only writer, the gateway
//! only reads, and TCP traffic never reaches the serial bus.

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod poll;
pub mod protocol;
pub mod rtu;

pub use cache::{CounterData, FlowCache, LinkState, PortIndex, MAX_PORTS};
pub use config::{AppConfig, SharedConfig};
pub use error::{FlowSrvError, Result};
pub use gateway::GatewayServer;
pub use poll::{EngineCommand, PollEngine};
