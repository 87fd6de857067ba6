//! # Portside Core
//!
//! Foundation crate for the Portside socket server stack.
//!
//! This crate holds the protocol-agnostic building blocks the rest of the
//! workspace is assembled from:
//!
//! - Error types shared across the stack
//! - The incremental pipeline-filter decoding contract
//! - The outbound package encoder contract
//! - The lock-free double-buffered batch queue for outbound items
//! - The duplex transport abstraction connections are driven over

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/portside-core/")]

// Core modules
pub mod error;
pub mod filter;
pub mod queue;
pub mod transport;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use error::{ConfigError, Error, ProtocolError, Result};
pub use filter::{LinePackageEncoder, LinePipelineFilter, PackageEncoder, PipelineFilter};
pub use queue::BatchQueue;
pub use transport::DuplexTransport;
