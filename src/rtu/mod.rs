//! RTU transaction queue
//!
//! The serial bus is half duplex, so only one transaction may be in flight
//! at a time. The poll engine submits reads through [`RtuTransactionQueue`]
//! and receives [`RtuCompletion`] messages asynchronously on a channel
//! instead of blocking on the wire.

use async_trait::async_trait;

use crate::cache::PortIndex;
use crate::error::Result;

pub mod serial;

pub use serial::SerialRtuQueue;

/// A holding-register read request destined for one flow counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtuRead {
    pub port: PortIndex,
    pub slave_id: u8,
    pub start_address: u16,
    pub quantity: u16,
}

/// Result of one RTU transaction, delivered on the completion channel
#[derive(Debug)]
pub struct RtuCompletion {
    pub port: PortIndex,
    pub result: Result<Vec<u16>>,
}

/// Submission side of the single-slot transaction queue.
///
/// `try_submit` never waits for the bus: it returns `false` when a
/// transaction is already outstanding and the read is not performed.
#[async_trait]
pub trait RtuTransactionQueue: Send + Sync {
    async fn try_submit(&self, request: RtuRead) -> Result<bool>;
}
