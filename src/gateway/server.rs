//! Modbus TCP gateway
//!
//! Serves register reads straight from the cache, so TCP clients never
//! touch the RS-485 bus. A fixed pool of client slots is enforced at
//! accept time and idle connections are reclaimed after the configured
//! timeout.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::FlowCache;
use crate::config::SharedConfig;
use crate::error::{FlowSrvError, Result};
use crate::protocol::constants::{ExceptionCode, FC_READ_HOLDING, FC_READ_INPUT};
use crate::protocol::{ModbusPdu, PduBuilder};

use super::framing::{FrameDecoder, FrameEvent, MbapRequest};
use super::register_map::{self, MapError};

/// Unit ids reserved for TCP-local addressing, never forwarded
const UNIT_ID_BROADCAST: u8 = 0;
const UNIT_ID_TCP_LOCAL: u8 = 0xFF;

pub struct GatewayServer {
    cache: Arc<FlowCache>,
    config: SharedConfig,
    listener: TcpListener,
}

impl GatewayServer {
    /// Bind the listener using the configured address and port
    pub async fn bind(cache: Arc<FlowCache>, config: SharedConfig) -> Result<Self> {
        let (address, port) = {
            let config = config.read().await;
            (config.gateway.bind_address.clone(), config.gateway.port)
        };
        let listener = TcpListener::bind((address.as_str(), port))
            .await
            .map_err(|e| {
                FlowSrvError::ConnectionError(format!("failed to bind {address}:{port}: {e}"))
            })?;
        info!(address = %listener.local_addr()?, "gateway listening");
        Ok(Self {
            cache,
            config,
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let (max_clients, idle_timeout) = {
            let config = self.config.read().await;
            (
                config.gateway.max_clients,
                Duration::from_secs(config.gateway.idle_timeout_secs),
            )
        };
        let slots = Arc::new(Semaphore::new(max_clients));

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("gateway stopping");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            };

            let Ok(permit) = slots.clone().try_acquire_owned() else {
                warn!(%peer, "client pool full, refusing connection");
                drop(stream);
                continue;
            };

            debug!(%peer, "client connected");
            let cache = self.cache.clone();
            let config = self.config.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_client(stream, cache, config, idle_timeout, cancel).await {
                    debug!(%peer, "client closed: {e}");
                } else {
                    debug!(%peer, "client disconnected");
                }
                drop(permit);
            });
        }
    }
}

async fn serve_client(
    mut stream: TcpStream,
    cache: Arc<FlowCache>,
    config: SharedConfig,
    idle_timeout: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 512];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = timeout(idle_timeout, stream.read(&mut buf)) => read,
        };
        let n = match read {
            Ok(Ok(0)) => return Ok(()),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(FlowSrvError::timeout("idle timeout, reclaiming slot")),
        };

        decoder.extend(&buf[..n]);
        while let Some(event) = decoder.next_frame()? {
            let response = match event {
                FrameEvent::Request(request) => {
                    handle_request(&cache, &config, &request).await
                }
                FrameEvent::BadHeader {
                    transaction_id,
                    unit_id,
                } => exception_frame(
                    transaction_id,
                    unit_id,
                    0,
                    ExceptionCode::DeviceFailure,
                ),
            };
            stream.write_all(&response).await?;
        }
    }
}

/// Answer one well-framed request from the cache
async fn handle_request(
    cache: &FlowCache,
    config: &SharedConfig,
    request: &MbapRequest,
) -> Vec<u8> {
    let function_code = request.pdu[0];

    // Broadcast and TCP-local unit ids are never served
    if request.unit_id == UNIT_ID_BROADCAST || request.unit_id == UNIT_ID_TCP_LOCAL {
        return exception_frame(
            request.transaction_id,
            request.unit_id,
            function_code,
            ExceptionCode::IllegalFunction,
        );
    }

    if function_code != FC_READ_HOLDING && function_code != FC_READ_INPUT {
        return exception_frame(
            request.transaction_id,
            request.unit_id,
            function_code,
            ExceptionCode::IllegalFunction,
        );
    }

    // Read request PDU: fc, start hi/lo, quantity hi/lo
    if request.pdu.len() < 5 {
        return exception_frame(
            request.transaction_id,
            request.unit_id,
            function_code,
            ExceptionCode::IllegalDataValue,
        );
    }
    let start_address = u16::from_be_bytes([request.pdu[1], request.pdu[2]]);
    let quantity = u16::from_be_bytes([request.pdu[3], request.pdu[4]]);

    let port = { config.read().await.port_for_slave(request.unit_id) };
    let entry = match port.and_then(crate::cache::PortIndex::new) {
        Some(port) => cache.read(port).await,
        None => {
            return exception_frame(
                request.transaction_id,
                request.unit_id,
                function_code,
                ExceptionCode::DeviceFailure,
            );
        }
    };
    if !entry.data_valid {
        return exception_frame(
            request.transaction_id,
            request.unit_id,
            function_code,
            ExceptionCode::DeviceFailure,
        );
    }

    match register_map::read_registers(&entry, start_address, quantity) {
        Ok(data) => match build_read_response(function_code, &data) {
            Ok(pdu) => response_frame(request.transaction_id, request.unit_id, pdu.as_slice()),
            Err(_) => exception_frame(
                request.transaction_id,
                request.unit_id,
                function_code,
                ExceptionCode::DeviceFailure,
            ),
        },
        Err(MapError::BadQuantity) => exception_frame(
            request.transaction_id,
            request.unit_id,
            function_code,
            ExceptionCode::IllegalDataValue,
        ),
        Err(MapError::OutOfRange) => exception_frame(
            request.transaction_id,
            request.unit_id,
            function_code,
            ExceptionCode::IllegalDataAddress,
        ),
    }
}

/// Response PDU for a successful register read
fn build_read_response(function_code: u8, data: &[u8]) -> Result<ModbusPdu> {
    Ok(PduBuilder::new()
        .function_code(function_code)?
        .byte(data.len() as u8)?
        .data(data)?
        .build())
}

/// Wrap a response PDU in an MBAP header
fn response_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(7 + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    frame
}

/// Full 9-byte exception frame, exception code byte included
fn exception_frame(
    transaction_id: u16,
    unit_id: u8,
    function_code: u8,
    code: ExceptionCode,
) -> Vec<u8> {
    response_frame(
        transaction_id,
        unit_id,
        &[function_code | 0x80, code.code()],
    )
}
