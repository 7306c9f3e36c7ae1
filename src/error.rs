//! Error taxonomy for the bootstrap.
//!
//! Only [`BootstrapError::PoolStartup`] is fatal to the process. Bind failures
//! are consumed by the retry controller, connection failures stay with the
//! connection that raised them.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootstrapError {
    /// A single bind attempt failed; the controller retries on the next port.
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    /// A pool could not bring up its execution contexts.
    #[error("failed to start {pool} pool: {reason}")]
    PoolStartup { pool: String, reason: String },

    /// A task was submitted after the pool started shutting down.
    #[error("{pool} pool is shut down, task rejected")]
    PoolShutDown { pool: String },

    /// The connection initializer refused a connection.
    #[error("connection initialization failed: {0}")]
    ConnectionInit(String),

    /// Reset, malformed data or any other I/O failure on one connection.
    #[error("connection I/O failed: {0}")]
    ConnectionIo(#[from] io::Error),

    /// Port 65535 failed and there is no higher port to try.
    #[error("no free port found up to {last_port}")]
    PortRangeExhausted { last_port: u16 },

    /// The configured attempt cap was reached.
    #[error("gave up after {attempts} bind attempts (last port {last_port})")]
    RetryLimitReached { attempts: u32, last_port: u16 },

    /// The acceptor pool shut down while the port search was still running.
    #[error("bind cancelled by shutdown")]
    BindCancelled,

    #[error("invalid start port {0}, expected 1-65535")]
    InvalidPort(u16),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl BootstrapError {
    /// Whether the process must abort because of this error.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::PoolStartup { .. } | Self::Config(_))
    }
}
