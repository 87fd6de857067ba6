//! Server and connection configuration.

use std::time::Duration;

use portside_core::error::ConfigError;

/// Default maximum decoded package size: 1 MiB.
pub const DEFAULT_MAX_PACKAGE_LENGTH: usize = 1024 * 1024;
/// Default receive buffer growth step: 4 KiB.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 4 * 1024;
/// Default send queue capacity in packages.
pub const DEFAULT_SEND_QUEUE_SIZE: usize = 256;
/// Default per-package handling timeout: 30 seconds.
pub const DEFAULT_PACKAGE_HANDLING_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-connection tuning knobs.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Upper bound on the buffered bytes of a single package. A connection
    /// that accumulates more undecoded data than this is closed with a
    /// protocol error.
    pub max_package_length: usize,
    /// How much room to reserve in the receive buffer before each read.
    pub receive_buffer_size: usize,
    /// Capacity of the outbound batch queue, in queued sends.
    pub send_queue_size: usize,
    /// Time limit for the physical write behind a `send`. A drain that
    /// exceeds it closes the connection as timed out. `None` disables the
    /// limit.
    pub send_timeout: Option<Duration>,
    /// Whether `send` drains the queue before returning. When `false` the
    /// drain is handed to a background task and `send` returns once queued.
    pub flush_on_send: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_package_length: DEFAULT_MAX_PACKAGE_LENGTH,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            send_queue_size: DEFAULT_SEND_QUEUE_SIZE,
            send_timeout: None,
            flush_on_send: true,
        }
    }
}

impl ConnectionOptions {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_package_length == 0 {
            return Err(ConfigError::invalid(
                "max_package_length",
                "must be greater than 0",
            ));
        }
        if self.receive_buffer_size == 0 {
            return Err(ConfigError::invalid(
                "receive_buffer_size",
                "must be greater than 0",
            ));
        }
        if self.send_queue_size == 0 {
            return Err(ConfigError::invalid(
                "send_queue_size",
                "must be greater than 0",
            ));
        }
        if let Some(timeout) = self.send_timeout {
            if timeout.is_zero() {
                return Err(ConfigError::invalid(
                    "send_timeout",
                    "must be greater than zero when set",
                ));
            }
        }
        Ok(())
    }
}

/// Server-level options wrapping the per-connection settings.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Options applied to every accepted connection.
    pub connection: ConnectionOptions,
    /// Time limit for handling a single package. `None` disables the limit.
    pub package_handling_timeout: Option<Duration>,
    /// Whether packages are handled strictly in arrival order. When `false`
    /// a task is spawned per package.
    pub serial_handling: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            connection: ConnectionOptions::default(),
            package_handling_timeout: Some(DEFAULT_PACKAGE_HANDLING_TIMEOUT),
            serial_handling: true,
        }
    }
}

impl ServerOptions {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        if let Some(timeout) = self.package_handling_timeout {
            if timeout.is_zero() {
                return Err(ConfigError::invalid(
                    "package_handling_timeout",
                    "must be greater than zero when set",
                ));
            }
        }
        Ok(())
    }
}
