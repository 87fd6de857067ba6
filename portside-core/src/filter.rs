//! Incremental decoding and encoding contracts
//!
//! A pipeline filter turns a byte stream that arrives in arbitrary,
//! non-aligned chunks into whole protocol packages. The connection layer
//! appends every received chunk to one growing buffer and re-invokes the
//! filter until it reports that it needs more data; the filter consumes
//! what it recognizes from the front of that buffer and leaves the rest.

use bytes::{Buf, BytesMut};

use crate::error::ProtocolError;

/// Incremental byte-stream decoder producing whole packages.
///
/// Each [`filter`](PipelineFilter::filter) call must do exactly one of:
///
/// - return `Ok(None)` without consuming anything: not enough buffered
///   bytes yet, call again once more arrive;
/// - consume some bytes and return `Ok(None)`: an internal stage boundary
///   was crossed but the package is still incomplete;
/// - consume some bytes and return `Ok(Some(package))`: at most one
///   completed package per call.
///
/// A filter must never hold references into `src` across calls: the buffer
/// is reclaimed as it is consumed, so anything worth keeping has to be
/// copied (or split off) explicitly. Packages whose payload is empty must be
/// finalized while parsing the header, because no payload bytes will ever
/// arrive to trigger another call.
pub trait PipelineFilter: Send + 'static {
    /// The package type this filter produces.
    type Package: Send + 'static;

    /// Attempt to decode one package from the front of `src`.
    fn filter(&mut self, src: &mut BytesMut) -> Result<Option<Self::Package>, ProtocolError>;

    /// Successor filter to switch to after the current package, if any.
    ///
    /// Checked by the connection after every completed package; protocols
    /// that upgrade mid-stream hand over to the next filter here.
    fn next_filter(&mut self) -> Option<Box<dyn PipelineFilter<Package = Self::Package>>> {
        None
    }

    /// Drop any partially decoded state and return to the initial stage.
    fn reset(&mut self) {}
}

/// Outbound mirror of [`PipelineFilter`]: turns a package into wire bytes.
pub trait PackageEncoder {
    /// The package type this encoder consumes.
    type Package;

    /// Append the encoded package to `dst`, returning the number of bytes
    /// written.
    ///
    /// Encoders that transform the payload on the way out (compression,
    /// re-encoding) report failures here instead of sending a broken frame.
    fn encode(
        &self,
        dst: &mut BytesMut,
        package: &Self::Package,
    ) -> Result<usize, ProtocolError>;
}

/// CRLF-terminated line filter yielding UTF-8 [`String`] packages.
///
/// The terminator is not part of the package. Useful on its own for
/// line-oriented protocols and as the reference implementation of the
/// filter contract.
#[derive(Debug, Default)]
pub struct LinePipelineFilter {
    // Bytes already scanned for a terminator, to avoid rescanning on re-entry.
    searched: usize,
}

impl LinePipelineFilter {
    /// Create a line filter positioned at the start of a line.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineFilter for LinePipelineFilter {
    type Package = String;

    fn filter(&mut self, src: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        // Back up one byte in case the previous chunk ended mid-terminator.
        let start = self.searched.saturating_sub(1);
        if let Some(pos) = find_crlf(&src[start..]) {
            let line = src.split_to(start + pos);
            src.advance(2);
            self.searched = 0;
            return match String::from_utf8(line.to_vec()) {
                Ok(line) => Ok(Some(line)),
                Err(_) => Err(ProtocolError::InvalidUtf8),
            };
        }
        self.searched = src.len();
        Ok(None)
    }

    fn reset(&mut self) {
        self.searched = 0;
    }
}

/// Encoder pairing [`LinePipelineFilter`]: appends the line plus CRLF.
#[derive(Debug, Default)]
pub struct LinePackageEncoder;

impl PackageEncoder for LinePackageEncoder {
    type Package = String;

    fn encode(&self, dst: &mut BytesMut, package: &String) -> Result<usize, ProtocolError> {
        dst.extend_from_slice(package.as_bytes());
        dst.extend_from_slice(b"\r\n");
        Ok(package.len() + 2)
    }
}

fn find_crlf(haystack: &[u8]) -> Option<usize> {
    haystack.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(filter: &mut LinePipelineFilter, src: &mut BytesMut, bytes: &[u8]) -> Option<String> {
        src.extend_from_slice(bytes);
        filter.filter(src).unwrap()
    }

    #[test]
    fn whole_line_in_one_chunk() {
        let mut filter = LinePipelineFilter::new();
        let mut src = BytesMut::new();
        assert_eq!(
            feed(&mut filter, &mut src, b"hello\r\n"),
            Some("hello".to_string())
        );
        assert!(src.is_empty());
    }

    #[test]
    fn line_split_across_chunks() {
        let mut filter = LinePipelineFilter::new();
        let mut src = BytesMut::new();
        assert_eq!(feed(&mut filter, &mut src, b"hel"), None);
        assert_eq!(feed(&mut filter, &mut src, b"lo"), None);
        assert_eq!(
            feed(&mut filter, &mut src, b"\r\nrest"),
            Some("hello".to_string())
        );
        assert_eq!(&src[..], b"rest");
    }

    #[test]
    fn terminator_split_across_chunks() {
        let mut filter = LinePipelineFilter::new();
        let mut src = BytesMut::new();
        assert_eq!(feed(&mut filter, &mut src, b"hello\r"), None);
        assert_eq!(
            feed(&mut filter, &mut src, b"\nworld\r\n"),
            Some("hello".to_string())
        );
        assert_eq!(filter.filter(&mut src).unwrap(), Some("world".to_string()));
        assert!(src.is_empty());
    }

    #[test]
    fn at_most_one_package_per_call() {
        let mut filter = LinePipelineFilter::new();
        let mut src = BytesMut::new();
        src.extend_from_slice(b"one\r\ntwo\r\n");
        assert_eq!(filter.filter(&mut src).unwrap(), Some("one".to_string()));
        assert_eq!(filter.filter(&mut src).unwrap(), Some("two".to_string()));
        assert_eq!(filter.filter(&mut src).unwrap(), None);
    }

    #[test]
    fn empty_line_is_a_package() {
        let mut filter = LinePipelineFilter::new();
        let mut src = BytesMut::new();
        assert_eq!(
            feed(&mut filter, &mut src, b"\r\n"),
            Some(String::new())
        );
    }

    #[test]
    fn invalid_utf8_is_a_protocol_error() {
        let mut filter = LinePipelineFilter::new();
        let mut src = BytesMut::new();
        src.extend_from_slice(&[0xff, 0xfe, b'\r', b'\n']);
        assert_eq!(
            filter.filter(&mut src).unwrap_err(),
            ProtocolError::InvalidUtf8
        );
    }

    #[test]
    fn encoder_round_trips_through_filter() {
        let encoder = LinePackageEncoder;
        let mut dst = BytesMut::new();
        let written = encoder.encode(&mut dst, &"status ok".to_string()).unwrap();
        assert_eq!(written, 11);

        let mut filter = LinePipelineFilter::new();
        assert_eq!(
            filter.filter(&mut dst).unwrap(),
            Some("status ok".to_string())
        );
    }
}
