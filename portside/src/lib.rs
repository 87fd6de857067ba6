//! # Portside
//!
//! **Transport-agnostic socket server core for building protocol servers**
//!
//! Portside decodes inbound bytes into application packages through
//! incremental pipeline filters, batches outbound writes through a lock-free
//! double-buffered queue, and keeps every connection's lifecycle race-free
//! from the first byte to the close reason.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use portside::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpTransport::bind("0.0.0.0:8080".parse()?).await?;
//!
//!     loop {
//!         let transport = listener.accept().await?;
//!
//!         tokio::spawn(async move {
//!             let mut connection =
//!                 Connection::new(Box::new(transport), ConnectionOptions::default());
//!             let Ok(stream) = connection.run(WebSocketPipelineFilter::new()) else {
//!                 return;
//!             };
//!             let session = Session::new(connection);
//!
//!             let scheduler = SerialPackageScheduler::new(SchedulerCore::new(handler_fn(
//!                 |session: Arc<Session>, package: WebSocketPackage, _token| async move {
//!                     if let Some(text) = package.message() {
//!                         let reply = WebSocketPackage::text(text);
//!                         let encoder = WebSocketEncoder::new();
//!                         session.connection().send_with(&encoder, &reply).await?;
//!                     }
//!                     Ok(())
//!                 },
//!             )));
//!
//!             serve_packages(session, stream, scheduler).await;
//!         });
//!     }
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/portside/")]

// Re-export core components
pub use portside_core::*;

#[cfg(feature = "transport-tcp")]
pub use portside_transport_tcp as transport_tcp;

#[cfg(feature = "server")]
pub use portside_server as server;

#[cfg(feature = "websocket")]
pub use portside_websocket as websocket;

/// Prelude module with common imports
pub mod prelude {
    pub use portside_core::prelude::*;

    #[cfg(feature = "server")]
    pub use portside_server::prelude::*;

    #[cfg(feature = "websocket")]
    pub use portside_websocket::prelude::*;

    #[cfg(feature = "transport-tcp")]
    pub use portside_transport_tcp::prelude::*;
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_library_compiles() {
        // Basic test to ensure the library compiles correctly
        assert_eq!(env!("CARGO_PKG_NAME"), "portside");
    }
}
