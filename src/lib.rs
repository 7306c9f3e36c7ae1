//! Minimal TCP server bootstrap.
//!
//! An acceptor pool binds a listening socket (moving up one port at a time
//! while the requested one is taken) and accepts connections; a worker pool
//! serves each accepted connection on one fixed worker thread through a
//! pluggable [`handler::ConnectionInitializer`].

pub mod config;
pub mod error;
pub mod handler;
pub mod logger;
pub mod server;

pub use error::BootstrapError;
