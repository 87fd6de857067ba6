//! Portside server layer.
//!
//! Wires a [`portside_core::DuplexTransport`] into a full serving pipeline:
//! a [`Connection`] with one receive loop and batched sends, a
//! [`Session`] identity around it, and package scheduling that dispatches
//! decoded packages into application handlers either serially or
//! concurrently.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use portside_core::LinePipelineFilter;
//! use portside_server::prelude::*;
//!
//! async fn serve(transport: Box<dyn portside_core::DuplexTransport>) {
//!     let mut connection = Connection::new(transport, ConnectionOptions::default());
//!     let stream = connection.run(LinePipelineFilter::new()).unwrap();
//!     let session = Session::new(connection);
//!
//!     let scheduler = SerialPackageScheduler::new(SchedulerCore::new(handler_fn(
//!         |session: Arc<Session>, line: String, _token| async move {
//!             println!("session {}: {line}", session.id());
//!             Ok(())
//!         },
//!     )));
//!
//!     serve_packages(session, stream, scheduler).await;
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/portside-server/")]

// Public modules
pub mod config;
pub mod connection;
pub mod handler;
pub mod logging;
pub mod scheduler;
pub mod session;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use config::{ConnectionOptions, ServerOptions};
pub use connection::{CloseReason, Connection, ConnectionState, PackageStream};
pub use handler::{
    error_handler_fn, handler_fn, ErrorHandler, FnErrorHandler, FnHandler, LogAndContinue,
    PackageHandler,
};
pub use scheduler::{
    scheduler_from_options, ConcurrentPackageScheduler, HandlingError, PackageScheduler,
    SchedulerCore, SerialPackageScheduler,
};
pub use session::{serve_packages, Session};
