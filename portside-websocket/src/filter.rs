//! WebSocket pipeline filter.

use std::fmt;
use std::mem;

use bytes::BytesMut;
use portside_core::{PipelineFilter, ProtocolError};

use crate::extension::WebSocketExtension;
use crate::package::WebSocketPackage;
use crate::part::{FramePart, PartOutcome};

/// Incremental WebSocket frame decoder.
///
/// Decodes the byte stream frame part by frame part and surfaces a
/// [`WebSocketPackage`] only once a frame with the FIN bit completes the
/// message. Fragmented messages are accumulated internally; the opcode of
/// the first fragment is kept for the whole message.
pub struct WebSocketPipelineFilter {
    part: FramePart,
    package: WebSocketPackage,
    extensions: Vec<Box<dyn WebSocketExtension>>,
}

impl WebSocketPipelineFilter {
    /// Creates a filter with no extensions registered.
    pub fn new() -> Self {
        Self {
            part: FramePart::FixPart,
            package: WebSocketPackage::default(),
            extensions: Vec::new(),
        }
    }

    /// Registers an extension. Decode hooks run in registration order.
    pub fn add_extension(&mut self, extension: Box<dyn WebSocketExtension>) {
        self.extensions.push(extension);
    }

    /// Creates a filter with the given extensions registered.
    pub fn with_extensions(extensions: Vec<Box<dyn WebSocketExtension>>) -> Self {
        Self {
            part: FramePart::FixPart,
            package: WebSocketPackage::default(),
            extensions,
        }
    }
}

impl Default for WebSocketPipelineFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WebSocketPipelineFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketPipelineFilter")
            .field("part", &self.part)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

impl PipelineFilter for WebSocketPipelineFilter {
    type Package = WebSocketPackage;

    fn filter(&mut self, src: &mut BytesMut) -> Result<Option<WebSocketPackage>, ProtocolError> {
        loop {
            match self.part.process(&mut self.package, &self.extensions, src)? {
                PartOutcome::NeedMoreData => return Ok(None),
                PartOutcome::Next(next) => self.part = next,
                PartOutcome::Complete => {
                    self.part = FramePart::FixPart;
                    return Ok(Some(mem::take(&mut self.package)));
                }
            }
        }
    }

    fn reset(&mut self) {
        self.part = FramePart::FixPart;
        self.package = WebSocketPackage::default();
    }
}
