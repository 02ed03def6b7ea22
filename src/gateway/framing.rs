//! MBAP framing
//!
//! Incremental decoder for Modbus TCP request frames. Bytes arrive in
//! arbitrary chunks; the decoder buffers them and yields one event per
//! complete frame. Frames with a bad protocol identifier or an oversize
//! declared length still surface their transaction id so the server can
//! answer, and their declared body is skipped to keep the stream in sync.

use bytes::{Buf, BytesMut};

use crate::error::{FlowSrvError, Result};
use crate::protocol::constants::{MAX_PDU_SIZE, MBAP_HEADER_LEN, PROTOCOL_ID_TCP};

/// A complete, well-formed request frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbapRequest {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub pdu: Vec<u8>,
}

/// One decoded frame, valid or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Request(MbapRequest),
    /// Protocol id was nonzero, the declared length was oversize, or the
    /// frame carried no function code. The peer gets a device failure.
    BadHeader { transaction_id: u16, unit_id: u8 },
}

#[derive(Debug)]
enum DecodeState {
    Header,
    Body {
        transaction_id: u16,
        unit_id: u8,
        body_len: usize,
    },
    Skip {
        remaining: usize,
    },
}

/// Stateful request-frame decoder for one connection
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    state: DecodeState,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(512),
            state: DecodeState::Header,
        }
    }

    /// Append freshly received bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pull the next complete frame, if any.
    ///
    /// Errors are unrecoverable for the connection: a declared length of
    /// zero leaves no way to find the next frame boundary.
    pub fn next_frame(&mut self) -> Result<Option<FrameEvent>> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if self.buf.len() < MBAP_HEADER_LEN {
                        return Ok(None);
                    }
                    let transaction_id = u16::from_be_bytes([self.buf[0], self.buf[1]]);
                    let protocol_id = u16::from_be_bytes([self.buf[2], self.buf[3]]);
                    let length = u16::from_be_bytes([self.buf[4], self.buf[5]]);
                    let unit_id = self.buf[6];
                    self.buf.advance(MBAP_HEADER_LEN);

                    if length == 0 {
                        return Err(FlowSrvError::protocol(
                            "MBAP length of zero, stream cannot be resynchronised",
                        ));
                    }
                    // Length counts the unit id byte already consumed
                    let body_len = length as usize - 1;
                    if protocol_id != PROTOCOL_ID_TCP || body_len > MAX_PDU_SIZE || body_len == 0 {
                        self.state = DecodeState::Skip {
                            remaining: body_len,
                        };
                        return Ok(Some(FrameEvent::BadHeader {
                            transaction_id,
                            unit_id,
                        }));
                    }
                    self.state = DecodeState::Body {
                        transaction_id,
                        unit_id,
                        body_len,
                    };
                }
                DecodeState::Body {
                    transaction_id,
                    unit_id,
                    body_len,
                } => {
                    if self.buf.len() < body_len {
                        return Ok(None);
                    }
                    let pdu = self.buf.split_to(body_len).to_vec();
                    self.state = DecodeState::Header;
                    return Ok(Some(FrameEvent::Request(MbapRequest {
                        transaction_id,
                        unit_id,
                        pdu,
                    })));
                }
                DecodeState::Skip { remaining } => {
                    let drop = remaining.min(self.buf.len());
                    self.buf.advance(drop);
                    if drop < remaining {
                        self.state = DecodeState::Skip {
                            remaining: remaining - drop,
                        };
                        return Ok(None);
                    }
                    self.state = DecodeState::Header;
                }
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
