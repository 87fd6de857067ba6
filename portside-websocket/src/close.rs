//! Close handshake status codes.

use bytes::{BufMut, Bytes, BytesMut};

/// WebSocket close status code as defined in RFC 6455 section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatusCode {
    /// 1000: normal closure.
    NormalClosure,
    /// 1001: endpoint is going away.
    GoingAway,
    /// 1002: protocol error.
    ProtocolError,
    /// 1003: received a data type it cannot accept.
    NotAcceptableData,
    /// 1005: no status code was present in the close frame.
    NoStatusCode,
    /// 1007: payload was not consistent with the message type.
    InvalidUtf8,
    /// 1008: message violates the endpoint policy.
    ViolatePolicy,
    /// 1009: message is too large to process.
    TooLargeFrame,
    /// 1010: expected extension was not negotiated.
    ExtensionNotMatch,
    /// 1011: unexpected condition prevented fulfilling the request.
    UnexpectedCondition,
    /// Any other status code, including registered and application codes.
    Other(u16),
}

impl CloseStatusCode {
    /// Converts a wire status code into a `CloseStatusCode`.
    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseStatusCode::NormalClosure,
            1001 => CloseStatusCode::GoingAway,
            1002 => CloseStatusCode::ProtocolError,
            1003 => CloseStatusCode::NotAcceptableData,
            1005 => CloseStatusCode::NoStatusCode,
            1007 => CloseStatusCode::InvalidUtf8,
            1008 => CloseStatusCode::ViolatePolicy,
            1009 => CloseStatusCode::TooLargeFrame,
            1010 => CloseStatusCode::ExtensionNotMatch,
            1011 => CloseStatusCode::UnexpectedCondition,
            other => CloseStatusCode::Other(other),
        }
    }

    /// Returns the wire value of the status code.
    pub fn value(&self) -> u16 {
        match self {
            CloseStatusCode::NormalClosure => 1000,
            CloseStatusCode::GoingAway => 1001,
            CloseStatusCode::ProtocolError => 1002,
            CloseStatusCode::NotAcceptableData => 1003,
            CloseStatusCode::NoStatusCode => 1005,
            CloseStatusCode::InvalidUtf8 => 1007,
            CloseStatusCode::ViolatePolicy => 1008,
            CloseStatusCode::TooLargeFrame => 1009,
            CloseStatusCode::ExtensionNotMatch => 1010,
            CloseStatusCode::UnexpectedCondition => 1011,
            CloseStatusCode::Other(code) => *code,
        }
    }
}

/// Parsed close handshake status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    /// Status code carried by the close frame.
    pub code: CloseStatusCode,
    /// Optional human readable reason.
    pub reason: String,
    /// Whether the remote endpoint initiated the close handshake.
    pub remote_initiated: bool,
}

impl CloseStatus {
    /// Creates a locally initiated close status.
    pub fn new(code: CloseStatusCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            remote_initiated: false,
        }
    }

    /// Parses a close status from a close frame payload.
    ///
    /// An empty payload means the peer sent no status code (1005).
    pub fn from_payload(payload: &[u8]) -> Self {
        if payload.len() < 2 {
            return Self {
                code: CloseStatusCode::NoStatusCode,
                reason: String::new(),
                remote_initiated: true,
            };
        }
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        Self {
            code: CloseStatusCode::from_u16(code),
            reason: String::from_utf8_lossy(&payload[2..]).into_owned(),
            remote_initiated: true,
        }
    }

    /// Builds the close frame payload for this status.
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.reason.len());
        buf.put_u16(self.code.value());
        buf.put_slice(self.reason.as_bytes());
        buf.freeze()
    }
}
