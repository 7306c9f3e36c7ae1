//! Logger module
//!
//! Provides logging utilities for the bootstrap including:
//! - Server lifecycle logging
//! - Bind attempt reporting
//! - Per-connection error logging
//! - File-based logging support

mod format;
pub mod writer;

pub use format::{LogFormat, LogLevel, LogLine};

use std::fmt::Display;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::config::{Config, LoggingConfig};

/// Initialize the logger with configuration
///
/// Should be called once at application startup.
pub fn init(config: &LoggingConfig) -> io::Result<()> {
    let level = config
        .level
        .parse::<LogLevel>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let format = config
        .format
        .parse::<LogFormat>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    writer::init(writer::LogWriter::new(
        level,
        format,
        config.log_file.as_deref(),
        config.error_log_file.as_deref(),
    )?)
}

fn write(level: LogLevel, target: &str, message: &str) {
    if let Some(w) = writer::get() {
        w.write(level, target, message);
    } else if level >= LogLevel::Warn {
        eprintln!("{}", LogLine::new(level, target, message).format(LogFormat::Text));
    } else if level >= LogLevel::Info {
        println!("{}", LogLine::new(level, target, message).format(LogFormat::Text));
    }
}

pub fn log_server_start(config: &Config) {
    write(LogLevel::Info, "server", "======================================");
    write(LogLevel::Info, "server", "TCP bootstrap starting");
    write(
        LogLevel::Info,
        "server",
        &format!("Start port: {} on {}", config.server.port, config.server.host),
    );
    write(
        LogLevel::Info,
        "server",
        &format!(
            "Acceptor threads: {}, worker threads: {}",
            config.server.acceptor_threads,
            config.worker_threads()
        ),
    );
    match config.bind.max_attempts {
        Some(max) => write(
            LogLevel::Info,
            "server",
            &format!("Bind attempts capped at {max}"),
        ),
        None => write(LogLevel::Info, "server", "Bind attempts unbounded"),
    }
    if let Some(ref path) = config.logging.log_file {
        write(LogLevel::Info, "server", &format!("Log file: {path}"));
    }
    if let Some(ref path) = config.logging.error_log_file {
        write(LogLevel::Info, "server", &format!("Error log: {path}"));
    }
    write(LogLevel::Info, "server", "======================================");
}

pub fn log_pool_started(pool: &str, size: usize) {
    write(
        LogLevel::Info,
        "pool",
        &format!("{pool} pool started with {size} thread(s)"),
    );
}

pub fn log_task_panicked(pool: &str, member: usize) {
    write(
        LogLevel::Error,
        "pool",
        &format!("task panicked on {pool}-{member}, other tasks unaffected"),
    );
}

pub fn log_shutdown_started(pool: &str, timeout: Duration) {
    write(
        LogLevel::Info,
        "pool",
        &format!("{pool} pool shutting down (timeout {}ms)", timeout.as_millis()),
    );
}

pub fn log_shutdown_report(pool: &str, completed: usize, aborted: usize) {
    let level = if aborted > 0 { LogLevel::Warn } else { LogLevel::Info };
    write(
        level,
        "pool",
        &format!("{pool} pool stopped: {completed} task(s) drained, {aborted} aborted"),
    );
}

pub fn log_bind_succeeded(addr: &SocketAddr, server_name: Option<&str>) {
    write(LogLevel::Info, "bind", &format!("bound on port {}", addr.port()));
    if let Some(name) = server_name {
        write(
            LogLevel::Info,
            "bind",
            &format!("server '{name}' listening on {addr}"),
        );
    }
}

pub fn log_bind_failed(port: u16, next_port: Option<u16>, err: &impl Display) {
    let message = match next_port {
        Some(next) => format!("failed on port {port}, retrying on {next}: {err}"),
        None => format!("failed on port {port}, giving up: {err}"),
    };
    write(LogLevel::Warn, "bind", &message);
}

pub fn log_bind_stopped(reason: &impl Display) {
    write(LogLevel::Error, "bind", &format!("port search stopped: {reason}"));
}

pub fn log_connection_accepted(id: &impl Display, peer: &SocketAddr, worker: &impl Display) {
    write(
        LogLevel::Debug,
        "conn",
        &format!("{id} accepted from {peer}, assigned to {worker}"),
    );
}

pub fn log_connection_closed(id: &impl Display, peer: &SocketAddr) {
    write(LogLevel::Debug, "conn", &format!("{id} from {peer} closed"));
}

pub fn log_connection_error(id: &impl Display, peer: &SocketAddr, err: &impl Display) {
    write(
        LogLevel::Error,
        "conn",
        &format!("{id} from {peer} failed: {err}"),
    );
}

pub fn log_init_failed(id: &impl Display, peer: &SocketAddr, err: &impl Display) {
    write(
        LogLevel::Error,
        "conn",
        &format!("{id} from {peer} rejected during initialization: {err}"),
    );
}

pub fn log_signal(name: &str) {
    write(
        LogLevel::Info,
        "signal",
        &format!("{name} received, initiating graceful shutdown"),
    );
}

pub fn log_info(target: &str, message: &str) {
    write(LogLevel::Info, target, message);
}

pub fn log_warning(target: &str, message: &str) {
    write(LogLevel::Warn, target, message);
}

pub fn log_error(target: &str, message: &str) {
    write(LogLevel::Error, target, message);
}
