//! WebSocket opcodes and frame header bits.

/// WebSocket frame opcode as defined in RFC 6455 section 5.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Continuation frame of a fragmented message.
    Continuation,
    /// Text frame (UTF-8 payload).
    Text,
    /// Binary frame.
    Binary,
    /// Connection close control frame.
    Close,
    /// Ping control frame.
    Ping,
    /// Pong control frame.
    Pong,
}

impl OpCode {
    /// Parses an opcode from the low nibble of the first frame byte.
    ///
    /// Returns `None` for reserved opcode values.
    pub fn from(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    /// Returns the wire value of the opcode.
    pub fn value(&self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    /// Returns true for control frame opcodes (Close, Ping, Pong).
    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Returns true for data frame opcodes (Text, Binary).
    pub fn is_data(&self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary)
    }
}

impl Default for OpCode {
    fn default() -> Self {
        OpCode::Continuation
    }
}

/// Frame header bit masks and marker values.
pub mod header {
    /// FIN bit in the first frame byte.
    pub const FIN_BIT: u8 = 0x80;
    /// RSV1 bit in the first frame byte.
    pub const RSV1_BIT: u8 = 0x40;
    /// RSV2 bit in the first frame byte.
    pub const RSV2_BIT: u8 = 0x20;
    /// RSV3 bit in the first frame byte.
    pub const RSV3_BIT: u8 = 0x10;
    /// Opcode mask in the first frame byte.
    pub const OPCODE_MASK: u8 = 0x0F;
    /// Mask bit in the second frame byte.
    pub const MASK_BIT: u8 = 0x80;
    /// Payload length mask in the second frame byte.
    pub const PAYLOAD_LEN_MASK: u8 = 0x7F;
    /// Length marker for a 16-bit extended payload length.
    pub const PAYLOAD_LEN_16: u8 = 126;
    /// Length marker for a 64-bit extended payload length.
    pub const PAYLOAD_LEN_64: u8 = 127;
    /// Masking key length in bytes.
    pub const MASKING_KEY_LEN: usize = 4;
}
