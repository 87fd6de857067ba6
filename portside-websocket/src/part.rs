//! Incremental frame header state machine.
//!
//! A frame is decoded part by part: the two fixed header bytes, the optional
//! extended length, the optional masking key and finally the payload. Each
//! part consumes nothing until its full length is buffered, so a partial
//! header survives any split point in the byte stream.

use std::mem;

use bytes::{Buf, BytesMut};
use portside_core::ProtocolError;

use crate::extension::WebSocketExtension;
use crate::opcode::{header, OpCode};
use crate::package::WebSocketPackage;

/// The frame part the decoder is currently waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FramePart {
    /// The two fixed header bytes.
    FixPart,
    /// The 2 or 8 byte extended payload length.
    ExtendedLength,
    /// The 4 byte masking key.
    MaskKey,
    /// The payload itself.
    PayloadData,
}

/// Outcome of processing one frame part.
pub(crate) enum PartOutcome {
    /// The part is not fully buffered yet; nothing was consumed.
    NeedMoreData,
    /// The part was consumed; continue with the given part.
    Next(FramePart),
    /// A final frame completed the package.
    Complete,
}

impl FramePart {
    pub(crate) fn process(
        self,
        package: &mut WebSocketPackage,
        extensions: &[Box<dyn WebSocketExtension>],
        src: &mut BytesMut,
    ) -> Result<PartOutcome, ProtocolError> {
        match self {
            FramePart::FixPart => fix_part(package, extensions, src),
            FramePart::ExtendedLength => extended_length(package, extensions, src),
            FramePart::MaskKey => mask_key(package, extensions, src),
            FramePart::PayloadData => payload_data(package, extensions, src),
        }
    }
}

fn fix_part(
    package: &mut WebSocketPackage,
    extensions: &[Box<dyn WebSocketExtension>],
    src: &mut BytesMut,
) -> Result<PartOutcome, ProtocolError> {
    if src.len() < 2 {
        return Ok(PartOutcome::NeedMoreData);
    }

    let first = src[0];
    let second = src[1];
    src.advance(2);

    let opcode_bits = first & header::OPCODE_MASK;
    if opcode_bits != OpCode::Continuation.value() {
        // A continuation frame keeps the opcode of the first fragment.
        package.op_code =
            OpCode::from(opcode_bits).ok_or(ProtocolError::UnknownOpCode(opcode_bits))?;
    }
    package.op_byte = first;

    package.has_mask = second & header::MASK_BIT != 0;
    package.payload_length = u64::from(second & header::PAYLOAD_LEN_MASK);

    if package.payload_length >= u64::from(header::PAYLOAD_LEN_16) {
        Ok(PartOutcome::Next(FramePart::ExtendedLength))
    } else if package.has_mask {
        Ok(PartOutcome::Next(FramePart::MaskKey))
    } else if finalize_if_empty(package, extensions)? {
        Ok(PartOutcome::Complete)
    } else {
        Ok(PartOutcome::Next(FramePart::PayloadData))
    }
}

fn extended_length(
    package: &mut WebSocketPackage,
    extensions: &[Box<dyn WebSocketExtension>],
    src: &mut BytesMut,
) -> Result<PartOutcome, ProtocolError> {
    let required = if package.payload_length == u64::from(header::PAYLOAD_LEN_16) {
        2
    } else {
        8
    };
    if src.len() < required {
        return Ok(PartOutcome::NeedMoreData);
    }

    package.payload_length = if required == 2 {
        u64::from(src.get_u16())
    } else {
        src.get_u64()
    };

    if package.has_mask {
        Ok(PartOutcome::Next(FramePart::MaskKey))
    } else if finalize_if_empty(package, extensions)? {
        Ok(PartOutcome::Complete)
    } else {
        Ok(PartOutcome::Next(FramePart::PayloadData))
    }
}

fn mask_key(
    package: &mut WebSocketPackage,
    extensions: &[Box<dyn WebSocketExtension>],
    src: &mut BytesMut,
) -> Result<PartOutcome, ProtocolError> {
    if src.len() < header::MASKING_KEY_LEN {
        return Ok(PartOutcome::NeedMoreData);
    }

    let mut key = [0u8; 4];
    src.copy_to_slice(&mut key);
    package.mask_key = key;

    if finalize_if_empty(package, extensions)? {
        Ok(PartOutcome::Complete)
    } else {
        Ok(PartOutcome::Next(FramePart::PayloadData))
    }
}

fn payload_data(
    package: &mut WebSocketPackage,
    extensions: &[Box<dyn WebSocketExtension>],
    src: &mut BytesMut,
) -> Result<PartOutcome, ProtocolError> {
    let length = package.payload_length as usize;
    if src.len() < length {
        return Ok(PartOutcome::NeedMoreData);
    }

    let mut payload = src.split_to(length);
    if package.has_mask {
        apply_mask(&mut payload, &package.mask_key);
    }
    package.push_fragment(payload.freeze());

    if package.fin() {
        finalize(package, extensions)?;
        Ok(PartOutcome::Complete)
    } else {
        Ok(PartOutcome::Next(FramePart::FixPart))
    }
}

/// Completes the package when the current frame carries no payload.
///
/// The payload part never runs for a zero length frame, so the package has
/// to be finalized here. An empty final continuation still completes the
/// fragments accumulated so far.
fn finalize_if_empty(
    package: &mut WebSocketPackage,
    extensions: &[Box<dyn WebSocketExtension>],
) -> Result<bool, ProtocolError> {
    if package.payload_length != 0 {
        return Ok(false);
    }
    if package.fragments.is_empty() {
        if package.op_code == OpCode::Text {
            package.message = Some(String::new());
        }
        return Ok(true);
    }
    finalize(package, extensions)?;
    Ok(true)
}

/// Assembles the fragments, runs extension decode hooks in registration
/// order and decodes text payloads into a UTF-8 message.
fn finalize(
    package: &mut WebSocketPackage,
    extensions: &[Box<dyn WebSocketExtension>],
) -> Result<(), ProtocolError> {
    package.data = package.take_assembled();

    for extension in extensions {
        extension.decode(package).map_err(|error| ProtocolError::Extension {
            name: extension.name().to_string(),
            message: error.to_string(),
        })?;
    }

    if package.op_code == OpCode::Text {
        let data = mem::take(&mut package.data);
        package.message =
            Some(String::from_utf8(Vec::from(data)).map_err(|_| ProtocolError::InvalidUtf8)?);
    }

    Ok(())
}

/// XORs a payload with a masking key, keyed by byte position.
///
/// Masking is an involution, so the same call masks and unmasks.
pub(crate) fn apply_mask(data: &mut [u8], key: &[u8; 4]) {
    for (index, byte) in data.iter_mut().enumerate() {
        *byte ^= key[index % 4];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn mask_uses_byte_position_modulo_four() {
        let key = [0x01, 0x02, 0x04, 0x08];
        let mut data = vec![0u8; 6];
        apply_mask(&mut data, &key);
        assert_eq!(data, vec![0x01, 0x02, 0x04, 0x08, 0x01, 0x02]);
    }

    #[test]
    fn mask_known_vector() {
        // "Hello" masked with 0x37 0xfa 0x21 0x3d, from RFC 6455 section 5.7.
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let mut data = vec![0x7f, 0x9f, 0x4d, 0x51, 0x58];
        apply_mask(&mut data, &key);
        assert_eq!(&data, b"Hello");
    }

    proptest! {
        #[test]
        fn masking_twice_restores_the_payload(
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            key in any::<[u8; 4]>(),
        ) {
            let mut masked = payload.clone();
            apply_mask(&mut masked, &key);
            apply_mask(&mut masked, &key);
            prop_assert_eq!(masked, payload);
        }
    }
}
