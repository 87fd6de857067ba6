//! Prelude module with common imports
//!
//! This module re-exports the most commonly used types and traits
//! from the portside-server crate for ergonomic imports.

// Server types
pub use crate::config::{ConnectionOptions, ServerOptions};
pub use crate::connection::{CloseReason, Connection, ConnectionState, PackageStream};
pub use crate::handler::{
    error_handler_fn, handler_fn, ErrorHandler, LogAndContinue, PackageHandler,
};
pub use crate::scheduler::{
    scheduler_from_options, ConcurrentPackageScheduler, HandlingError, PackageScheduler,
    SchedulerCore, SerialPackageScheduler,
};
pub use crate::session::{serve_packages, Session};

// Re-export core types
pub use portside_core::prelude::*;
