//! Error types for Portside
//!
//! This module defines the error hierarchy shared across the Portside stack.
//! Transport and protocol failures are resolved locally by closing the
//! affected connection; nothing in this hierarchy ever crosses the decoded
//! package stream boundary.

#![allow(missing_docs)]

use std::io;
use thiserror::Error;

/// Result type alias for Portside operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Portside operations
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The outbound batch queue is at capacity
    #[error("Send queue is full")]
    SendQueueFull,

    /// Operation attempted on a closed or detached connection
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Application-level errors surfaced by package handlers
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Whether this error is an ignorable transport condition.
    ///
    /// Resets, aborts and timeouts are part of normal connection churn; the
    /// connection closes silently and derives its close reason from the
    /// cause instead of reporting a failure.
    pub fn is_ignorable(&self) -> bool {
        match self {
            Error::Io(e) => is_ignorable_io_kind(e.kind()),
            _ => false,
        }
    }
}

/// Whether an I/O error kind represents normal connection churn.
pub fn is_ignorable_io_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
    )
}

/// Decode-side protocol violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A package exceeded the configured maximum length
    #[error("Package of {size} bytes exceeds the maximum of {max}")]
    PackageTooLarge { size: usize, max: usize },

    /// The frame header carried an opcode outside the known set
    #[error("Unknown opcode: {0:#x}")]
    UnknownOpCode(u8),

    /// Text payload was not valid UTF-8
    #[error("Invalid UTF-8 in text payload")]
    InvalidUtf8,

    /// A frame violated the wire format
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// An extension hook failed while transforming a package
    #[error("Extension {name} failed: {message}")]
    Extension { name: String, message: String },
}

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A configuration field holds an unusable value
    #[error("Invalid value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    /// Shorthand for an invalid-field error.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignorable_io_kinds() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::TimedOut,
        ] {
            let err = Error::Io(io::Error::new(kind, "boom"));
            assert!(err.is_ignorable(), "{kind:?} should be ignorable");
        }

        let err = Error::Io(io::Error::new(io::ErrorKind::PermissionDenied, "boom"));
        assert!(!err.is_ignorable());
        assert!(!Error::SendQueueFull.is_ignorable());
    }

    #[test]
    fn protocol_error_display() {
        let err = ProtocolError::PackageTooLarge {
            size: 2048,
            max: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Package of 2048 bytes exceeds the maximum of 1024"
        );

        let err = ProtocolError::UnknownOpCode(0x0b);
        assert_eq!(err.to_string(), "Unknown opcode: 0xb");
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::invalid("max_package_length", "must be greater than zero");
        assert_eq!(
            err.to_string(),
            "Invalid value for max_package_length: must be greater than zero"
        );
    }
}
