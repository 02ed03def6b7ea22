//! TCP gateway
//!
//! Modbus TCP front end answering register reads from the shared cache.

pub mod framing;
pub mod register_map;
pub mod server;

pub use framing::{FrameDecoder, FrameEvent, MbapRequest};
pub use server::GatewayServer;
