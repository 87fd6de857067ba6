//! WebSocket frame encoder.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use portside_core::{PackageEncoder, ProtocolError};

use crate::extension::WebSocketExtension;
use crate::opcode::{header, OpCode};
use crate::package::WebSocketPackage;
use crate::part::apply_mask;

/// Encodes [`WebSocketPackage`]s into wire frames.
///
/// Server-side encoders send unmasked frames; enable masking for the client
/// role, which generates a fresh random key per frame. A fragment size can
/// be set to split large data messages into continuation frames.
pub struct WebSocketEncoder {
    masking: bool,
    fragment_size: Option<usize>,
    extensions: Vec<Box<dyn WebSocketExtension>>,
}

impl WebSocketEncoder {
    /// Creates a server-side encoder: unmasked frames, no fragmentation.
    pub fn new() -> Self {
        Self {
            masking: false,
            fragment_size: None,
            extensions: Vec::new(),
        }
    }

    /// Enables or disables payload masking.
    pub fn with_masking(mut self, enabled: bool) -> Self {
        self.masking = enabled;
        self
    }

    /// Splits data messages larger than `size` into continuation frames.
    ///
    /// Control frames are never fragmented. A size of zero disables
    /// fragmentation.
    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = (size > 0).then_some(size);
        self
    }

    /// Registers an extension.
    ///
    /// Encode hooks run in reverse registration order, inverting the
    /// decode chain applied by the filter.
    pub fn add_extension(&mut self, extension: Box<dyn WebSocketExtension>) {
        self.extensions.push(extension);
    }

    fn write_frame(
        &self,
        dst: &mut BytesMut,
        fin: bool,
        rsv1: bool,
        op_code: OpCode,
        payload: &[u8],
    ) -> usize {
        let mask_key = self.masking.then(rand::random::<[u8; 4]>);
        encode_frame(dst, fin, rsv1, op_code, mask_key, payload)
    }
}

impl Default for WebSocketEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WebSocketEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketEncoder")
            .field("masking", &self.masking)
            .field("fragment_size", &self.fragment_size)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

impl PackageEncoder for WebSocketEncoder {
    type Package = WebSocketPackage;

    fn encode(
        &self,
        dst: &mut BytesMut,
        package: &WebSocketPackage,
    ) -> Result<usize, ProtocolError> {
        let mut work = package.clone();
        if let Some(message) = work.message.take() {
            work.data = Bytes::from(message.into_bytes());
        }

        for extension in self.extensions.iter().rev() {
            extension.encode(&mut work).map_err(|error| ProtocolError::Extension {
                name: extension.name().to_string(),
                message: error.to_string(),
            })?;
        }

        let op_code = work.op_code;
        let rsv1 = work.rsv1();
        let payload = work.data;

        match self.fragment_size {
            Some(size) if payload.len() > size && !op_code.is_control() => {
                let mut written = 0;
                let mut offset = 0;
                let mut first = true;
                while offset < payload.len() {
                    let end = (offset + size).min(payload.len());
                    let fin = end == payload.len();
                    let frame_op = if first { op_code } else { OpCode::Continuation };
                    // RSV1 marks the first frame of a transformed message only.
                    let frame_rsv1 = first && rsv1;
                    written +=
                        self.write_frame(dst, fin, frame_rsv1, frame_op, &payload[offset..end]);
                    offset = end;
                    first = false;
                }
                Ok(written)
            }
            _ => Ok(self.write_frame(dst, true, rsv1, op_code, &payload)),
        }
    }
}

/// Writes a single frame with the given header bits and payload.
///
/// When a mask key is supplied the payload is masked while it is copied
/// into `dst`. Returns the number of bytes written.
pub fn encode_frame(
    dst: &mut BytesMut,
    fin: bool,
    rsv1: bool,
    op_code: OpCode,
    mask_key: Option<[u8; 4]>,
    payload: &[u8],
) -> usize {
    let start = dst.len();

    let mut first = op_code.value();
    if fin {
        first |= header::FIN_BIT;
    }
    if rsv1 {
        first |= header::RSV1_BIT;
    }
    dst.put_u8(first);

    let mask_bit = if mask_key.is_some() { header::MASK_BIT } else { 0 };
    let len = payload.len();
    if len < usize::from(header::PAYLOAD_LEN_16) {
        dst.put_u8(mask_bit | len as u8);
    } else if len <= usize::from(u16::MAX) {
        dst.put_u8(mask_bit | header::PAYLOAD_LEN_16);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(mask_bit | header::PAYLOAD_LEN_64);
        dst.put_u64(len as u64);
    }

    match mask_key {
        Some(key) => {
            dst.put_slice(&key);
            let payload_start = dst.len();
            dst.put_slice(payload);
            apply_mask(&mut dst[payload_start..], &key);
        }
        None => dst.put_slice(payload),
    }

    dst.len() - start
}
