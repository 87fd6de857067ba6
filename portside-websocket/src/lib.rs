//! WebSocket framing for Portside.
//!
//! This crate decodes and encodes WebSocket data frames (RFC 6455) on top of
//! the [`portside_core`] pipeline contract. The decoder is an incremental
//! state machine that walks the frame header part by part, accumulates
//! fragmented messages, unmasks payloads in place and only surfaces a
//! [`WebSocketPackage`] once a final frame completes the message.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use portside_core::PipelineFilter;
//! use portside_websocket::WebSocketPipelineFilter;
//!
//! let mut filter = WebSocketPipelineFilter::new();
//! let mut buffer = BytesMut::from(&[0x81, 0x05, b'H', b'e', b'l', b'l', b'o'][..]);
//!
//! let package = filter.filter(&mut buffer).unwrap().unwrap();
//! assert_eq!(package.message(), Some("Hello"));
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/portside-websocket/")]

pub mod close;
pub mod encoder;
pub mod extension;
pub mod filter;
pub mod opcode;
pub mod package;
pub mod prelude;

mod part;

pub use close::{CloseStatus, CloseStatusCode};
pub use encoder::WebSocketEncoder;
pub use extension::WebSocketExtension;
pub use filter::WebSocketPipelineFilter;
pub use opcode::OpCode;
pub use package::WebSocketPackage;

#[cfg(feature = "compression")]
#[cfg_attr(docsrs, doc(cfg(feature = "compression")))]
pub use extension::DeflateExtension;
