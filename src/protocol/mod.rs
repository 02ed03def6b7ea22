//! Modbus wire format: constants, register codec, and PDU buffer

pub mod codec;
pub mod constants;
pub mod pdu;

pub use constants::ExceptionCode;
pub use pdu::{ModbusPdu, PduBuilder};
