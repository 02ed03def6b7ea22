//! Serial RTU transport
//!
//! Minimal FC 0x03 master over a tokio-serial stream. A single worker task
//! owns the port and drains a one-slot request channel, which enforces
//! the one-transaction-at-a-time bus rule by construction.

use async_trait::async_trait;
use crc::{Crc, CRC_16_MODBUS};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::SerialConfig;
use crate::error::{FlowSrvError, Result};
use crate::protocol::constants::FC_READ_HOLDING;

use super::{RtuCompletion, RtuRead, RtuTransactionQueue};

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Serial-backed transaction queue with a single outstanding slot
pub struct SerialRtuQueue {
    request_tx: mpsc::Sender<RtuRead>,
}

impl SerialRtuQueue {
    /// Open the serial port and spawn the bus worker. Completions are
    /// delivered on `completion_tx`.
    pub fn spawn(
        config: &SerialConfig,
        completion_tx: mpsc::Sender<RtuCompletion>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let builder = tokio_serial::new(&config.device, config.baud_rate)
            .data_bits(config.data_bits()?)
            .stop_bits(config.stop_bits()?)
            .parity(config.parity()?);
        let stream = builder.open_native_async().map_err(|e| {
            FlowSrvError::ConnectionError(format!(
                "failed to open serial port {}: {e}",
                config.device
            ))
        })?;

        let (request_tx, request_rx) = mpsc::channel(1);
        let response_timeout = Duration::from_millis(config.response_timeout_ms);
        tokio::spawn(bus_worker(
            stream,
            request_rx,
            completion_tx,
            response_timeout,
            cancel,
        ));

        Ok(Self { request_tx })
    }
}

#[async_trait]
impl RtuTransactionQueue for SerialRtuQueue {
    async fn try_submit(&self, request: RtuRead) -> Result<bool> {
        match self.request_tx.try_send(request) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(FlowSrvError::state("bus worker has stopped"))
            }
        }
    }
}

async fn bus_worker(
    mut stream: SerialStream,
    mut request_rx: mpsc::Receiver<RtuRead>,
    completion_tx: mpsc::Sender<RtuCompletion>,
    response_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("bus worker shutting down");
                return;
            }
            request = request_rx.recv() => match request {
                Some(r) => r,
                None => return,
            },
        };

        let result = execute_read(&mut stream, &request, response_timeout).await;
        if let Err(e) = &result {
            warn!(port = %request.port, slave = request.slave_id, "read failed: {e}");
        }
        let completion = RtuCompletion {
            port: request.port,
            result,
        };
        if completion_tx.send(completion).await.is_err() {
            error!("completion channel closed, stopping bus worker");
            return;
        }
    }
}

async fn execute_read(
    stream: &mut SerialStream,
    request: &RtuRead,
    response_timeout: Duration,
) -> Result<Vec<u16>> {
    // A slave that answers after the timeout leaves its late response in
    // the input buffer, where the next transaction would read it as its
    // own reply. Discard anything pending before transmitting.
    stream
        .clear(ClearBuffer::Input)
        .map_err(|e| FlowSrvError::IoError(format!("failed to clear input buffer: {e}")))?;

    let frame = build_read_frame(request);
    stream.write_all(&frame).await?;
    stream.flush().await?;

    timeout(response_timeout, read_response(stream, request))
        .await
        .map_err(|_| {
            FlowSrvError::TimeoutError(format!(
                "slave {} did not respond within {:?}",
                request.slave_id, response_timeout
            ))
        })?
}

fn build_read_frame(request: &RtuRead) -> [u8; 8] {
    let mut frame = [0u8; 8];
    frame[0] = request.slave_id;
    frame[1] = FC_READ_HOLDING;
    frame[2..4].copy_from_slice(&request.start_address.to_be_bytes());
    frame[4..6].copy_from_slice(&request.quantity.to_be_bytes());
    let crc = CRC_MODBUS.checksum(&frame[..6]);
    frame[6..8].copy_from_slice(&crc.to_le_bytes());
    frame
}

async fn read_response(stream: &mut SerialStream, request: &RtuRead) -> Result<Vec<u16>> {
    let mut buf = Vec::with_capacity(5 + request.quantity as usize * 2);
    let mut chunk = [0u8; 64];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(FlowSrvError::connection("serial stream closed"));
        }
        buf.extend_from_slice(&chunk[..n]);
        discard_stale_prefix(&mut buf, request.slave_id);

        if let Some(expected) = expected_frame_len(&buf) {
            if buf.len() >= expected {
                return parse_response(&buf[..expected], request);
            }
        }
    }
}

/// Drop leading bytes that cannot start a response from the addressed
/// slave. Catches stale frames from other slaves that slip in between the
/// input clear and the reply.
fn discard_stale_prefix(buf: &mut Vec<u8>, slave_id: u8) {
    match buf.iter().position(|&b| b == slave_id) {
        Some(0) => {}
        Some(pos) => {
            buf.drain(..pos);
        }
        None => buf.clear(),
    }
}

/// Total frame length once enough of the header has arrived
fn expected_frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 3 {
        return None;
    }
    if buf[1] & 0x80 != 0 {
        // slave, fc|0x80, code, crc
        Some(5)
    } else {
        // slave, fc, byte count, data, crc
        Some(5 + buf[2] as usize)
    }
}

fn parse_response(frame: &[u8], request: &RtuRead) -> Result<Vec<u16>> {
    let (body, crc_bytes) = frame.split_at(frame.len() - 2);
    let crc = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    if CRC_MODBUS.checksum(body) != crc {
        return Err(FlowSrvError::protocol("CRC mismatch in response"));
    }
    if body[0] != request.slave_id {
        return Err(FlowSrvError::ProtocolError(format!(
            "response from slave {} while expecting {}",
            body[0], request.slave_id
        )));
    }
    if body[1] & 0x80 != 0 {
        return Err(FlowSrvError::ProtocolError(format!(
            "slave {} returned exception 0x{:02X}",
            request.slave_id, body[2]
        )));
    }
    if body[1] != FC_READ_HOLDING {
        return Err(FlowSrvError::ProtocolError(format!(
            "unexpected function code 0x{:02X}",
            body[1]
        )));
    }

    let byte_count = body[2] as usize;
    let data = &body[3..];
    if data.len() != byte_count || byte_count != request.quantity as usize * 2 {
        return Err(FlowSrvError::protocol("response length mismatch"));
    }

    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}
