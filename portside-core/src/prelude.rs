//! Prelude module for Portside Core
//!
//! This module re-exports commonly used types and traits to make them
//! easily accessible for users of the library.

pub use crate::error::{ConfigError, Error, ProtocolError, Result};
pub use crate::filter::{LinePackageEncoder, LinePipelineFilter, PackageEncoder, PipelineFilter};
pub use crate::queue::BatchQueue;
pub use crate::transport::DuplexTransport;

// Re-export commonly used external dependencies
pub use bytes::{Buf, BufMut, Bytes, BytesMut};
pub use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
