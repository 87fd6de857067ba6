//! WebSocket extension hooks.
//!
//! Extensions transform the payload of a package after decoding and before
//! encoding. The pipeline filter runs [`decode`](WebSocketExtension::decode)
//! hooks in registration order once a final frame completes a message; the
//! encoder runs [`encode`](WebSocketExtension::encode) hooks in reverse
//! registration order, inverting the decode chain.

use portside_core::Result;

use crate::package::WebSocketPackage;

/// A payload transform applied around framing, such as permessage-deflate.
pub trait WebSocketExtension: Send + Sync {
    /// Extension name, used in error reports.
    fn name(&self) -> &str;

    /// Transforms an outgoing payload before it is framed.
    fn encode(&self, package: &mut WebSocketPackage) -> Result<()>;

    /// Transforms an incoming payload after the message completed.
    fn decode(&self, package: &mut WebSocketPackage) -> Result<()>;
}

#[cfg(feature = "compression")]
mod deflate {
    use std::io::{Read, Write};

    use bytes::Bytes;
    use flate2::read::DeflateDecoder;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use portside_core::Result;

    use crate::package::WebSocketPackage;

    use super::WebSocketExtension;

    /// Per-message deflate compression.
    ///
    /// Compressed payloads are marked with the RSV1 bit, so uncompressed
    /// messages pass through untouched on decode. Control frames and empty
    /// payloads are never compressed.
    #[derive(Debug, Clone)]
    pub struct DeflateExtension {
        level: Compression,
    }

    impl DeflateExtension {
        /// Creates a deflate extension with the default compression level.
        pub fn new() -> Self {
            Self {
                level: Compression::new(6),
            }
        }

        /// Creates a deflate extension with an explicit compression level.
        pub fn with_level(level: u32) -> Self {
            Self {
                level: Compression::new(level),
            }
        }
    }

    impl Default for DeflateExtension {
        fn default() -> Self {
            Self::new()
        }
    }

    impl WebSocketExtension for DeflateExtension {
        fn name(&self) -> &str {
            "permessage-deflate"
        }

        fn encode(&self, package: &mut WebSocketPackage) -> Result<()> {
            if !package.op_code().is_data() || package.data().is_empty() {
                return Ok(());
            }

            let mut encoder = DeflateEncoder::new(Vec::new(), self.level);
            encoder.write_all(package.data())?;
            let compressed = encoder.finish()?;

            package.set_data(Bytes::from(compressed));
            package.set_rsv1(true);
            Ok(())
        }

        fn decode(&self, package: &mut WebSocketPackage) -> Result<()> {
            if !package.rsv1() || !package.op_code().is_data() {
                return Ok(());
            }

            let mut decoder = DeflateDecoder::new(&package.data()[..]);
            let mut decompressed = Vec::new();
            decoder.read_to_end(&mut decompressed)?;

            package.set_data(Bytes::from(decompressed));
            package.set_rsv1(false);
            Ok(())
        }
    }

}

#[cfg(feature = "compression")]
pub use deflate::DeflateExtension;
