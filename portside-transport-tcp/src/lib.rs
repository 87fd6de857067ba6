//! TCP Transport for Portside
//!
//! Binds listeners and opens outbound sockets, producing
//! [`TcpConnection`] values any Portside connection can be driven over.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/portside-transport-tcp/")]

pub mod tcp;

// Re-export TCP transport types
pub use tcp::{TcpConnection, TcpListenOptions, TcpTransport};

/// Prelude module
pub mod prelude {
    pub use crate::tcp::{TcpConnection, TcpListenOptions, TcpTransport};
    pub use portside_core::transport::DuplexTransport;
}
