// Configuration types module
// Defines all configuration-related data structures

use serde::Deserialize;
use std::collections::HashMap;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub socket: SocketConfig,
    pub bind: BindConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub attributes: AttributesConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// First port of the bind search
    pub port: u16,
    pub acceptor_threads: usize,
    /// Worker pool size, CPU cores when unset
    pub worker_threads: Option<usize>,
    /// Graceful shutdown budget in seconds
    pub shutdown_timeout: u64,
}

/// Transport options forwarded to the listening and accepted sockets
#[derive(Debug, Deserialize, Clone)]
pub struct SocketConfig {
    pub backlog: u32,
    pub keep_alive: bool,
    pub reuse_address: bool,
    pub tcp_nodelay: bool,
}

/// Port search configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BindConfig {
    /// Unset means the search only stops on success or shutdown
    pub max_attempts: Option<u32>,
    pub retry_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    /// `text` or `json`
    pub format: String,
    /// Info log file path (optional, stdout if not set)
    #[serde(default)]
    pub log_file: Option<String>,
    /// Error log file path (optional, stderr if not set)
    #[serde(default)]
    pub error_log_file: Option<String>,
}

/// Server-scoped attributes and per-connection attribute defaults
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AttributesConfig {
    #[serde(default)]
    pub server: HashMap<String, String>,
    #[serde(default)]
    pub connection: HashMap<String, String>,
}
