//! Decoded WebSocket package.

use bytes::{Bytes, BytesMut};

use crate::close::CloseStatus;
use crate::opcode::{header, OpCode};

/// A complete WebSocket message, assembled from one or more frames.
///
/// The pipeline filter only surfaces a package once a frame with the FIN bit
/// finishes the message, so consumers never observe partial fragments. For
/// text messages the payload is decoded into [`message`](Self::message); for
/// every other opcode the raw bytes are available through
/// [`data`](Self::data).
#[derive(Debug, Clone, Default)]
pub struct WebSocketPackage {
    pub(crate) op_code: OpCode,
    pub(crate) op_byte: u8,
    pub(crate) payload_length: u64,
    pub(crate) has_mask: bool,
    pub(crate) mask_key: [u8; 4],
    pub(crate) fragments: Vec<Bytes>,
    pub(crate) data: Bytes,
    pub(crate) message: Option<String>,
}

impl WebSocketPackage {
    /// Creates a text package ready for encoding.
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            op_code: OpCode::Text,
            op_byte: header::FIN_BIT | OpCode::Text.value(),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Creates a binary package ready for encoding.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            op_code: OpCode::Binary,
            op_byte: header::FIN_BIT | OpCode::Binary.value(),
            data: data.into(),
            ..Default::default()
        }
    }

    /// Creates a close package carrying the given status.
    pub fn close(status: &CloseStatus) -> Self {
        Self {
            op_code: OpCode::Close,
            op_byte: header::FIN_BIT | OpCode::Close.value(),
            data: status.to_payload(),
            ..Default::default()
        }
    }

    /// Creates a ping package.
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self {
            op_code: OpCode::Ping,
            op_byte: header::FIN_BIT | OpCode::Ping.value(),
            data: data.into(),
            ..Default::default()
        }
    }

    /// Creates a pong package, usually echoing a ping payload.
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self {
            op_code: OpCode::Pong,
            op_byte: header::FIN_BIT | OpCode::Pong.value(),
            data: data.into(),
            ..Default::default()
        }
    }

    /// Returns the message opcode.
    ///
    /// For fragmented messages this is the opcode of the first frame; the
    /// continuation frames that follow never overwrite it.
    pub fn op_code(&self) -> OpCode {
        self.op_code
    }

    /// Returns the FIN bit of the most recently decoded frame header.
    pub fn fin(&self) -> bool {
        self.op_byte & header::FIN_BIT != 0
    }

    /// Returns the RSV1 bit, used by extensions such as permessage-deflate.
    pub fn rsv1(&self) -> bool {
        self.op_byte & header::RSV1_BIT != 0
    }

    /// Returns the RSV2 bit.
    pub fn rsv2(&self) -> bool {
        self.op_byte & header::RSV2_BIT != 0
    }

    /// Returns the RSV3 bit.
    pub fn rsv3(&self) -> bool {
        self.op_byte & header::RSV3_BIT != 0
    }

    /// Sets the RSV1 bit. Extensions mark transformed payloads with it.
    pub fn set_rsv1(&mut self, value: bool) {
        if value {
            self.op_byte |= header::RSV1_BIT;
        } else {
            self.op_byte &= !header::RSV1_BIT;
        }
    }

    /// Returns the masking key of the last frame, if the frame was masked.
    pub fn mask_key(&self) -> Option<[u8; 4]> {
        self.has_mask.then_some(self.mask_key)
    }

    /// Returns the assembled payload bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Consumes the package, returning the assembled payload bytes.
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Replaces the payload bytes. Extension hooks use this to rewrite the
    /// payload in place.
    pub fn set_data(&mut self, data: Bytes) {
        self.data = data;
    }

    /// Returns the decoded text message, if this is a text package.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Consumes the package, returning the decoded text message.
    pub fn into_message(self) -> Option<String> {
        self.message
    }

    /// Parses the close status out of a close package payload.
    ///
    /// Returns `None` when the package is not a close frame.
    pub fn close_status(&self) -> Option<CloseStatus> {
        if self.op_code != OpCode::Close {
            return None;
        }
        Some(CloseStatus::from_payload(&self.data))
    }

    /// Appends an unmasked frame payload to the fragment list.
    pub(crate) fn push_fragment(&mut self, fragment: Bytes) {
        self.fragments.push(fragment);
    }

    /// Concatenates the accumulated fragments into a single buffer.
    ///
    /// A single-fragment message hands its buffer over without copying.
    pub(crate) fn take_assembled(&mut self) -> Bytes {
        match self.fragments.len() {
            0 => Bytes::new(),
            1 => self.fragments.remove(0),
            _ => {
                let total = self.fragments.iter().map(|f| f.len()).sum();
                let mut buf = BytesMut::with_capacity(total);
                for fragment in self.fragments.drain(..) {
                    buf.extend_from_slice(&fragment);
                }
                buf.freeze()
            }
        }
    }
}
