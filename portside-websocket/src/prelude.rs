//! Convenience re-exports for working with WebSocket framing.
//!
//! ```
//! use portside_websocket::prelude::*;
//! ```

pub use crate::close::{CloseStatus, CloseStatusCode};
pub use crate::encoder::{encode_frame, WebSocketEncoder};
pub use crate::extension::WebSocketExtension;
pub use crate::filter::WebSocketPipelineFilter;
pub use crate::opcode::{header, OpCode};
pub use crate::package::WebSocketPackage;

#[cfg(feature = "compression")]
pub use crate::extension::DeflateExtension;

pub use portside_core::prelude::*;
