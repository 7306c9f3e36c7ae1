// Configuration module entry point
// Loads file/environment configuration and maps it onto the server types

mod types;

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

pub use types::{AttributesConfig, BindConfig, Config, LoggingConfig, ServerConfig, SocketConfig};

use crate::error::BootstrapError;
use crate::server::attributes::AttributeKey;
use crate::server::bind::RetryPolicy;
use crate::server::options::ServerConfiguration;

/// Default config file (without extension)
pub const DEFAULT_CONFIG_PATH: &str = "config";

impl Config {
    /// Load configuration from specified file path (without extension)
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("BOOTSTRAP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 9999)?
            .set_default("server.acceptor_threads", 1)?
            .set_default("server.shutdown_timeout", 15)?
            .set_default("socket.backlog", 1024)?
            .set_default("socket.keep_alive", true)?
            .set_default("socket.reuse_address", true)?
            .set_default("socket.tcp_nodelay", true)?
            .set_default("bind.retry_delay_ms", 0)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "text")?
            .build()?;

        settings.try_deserialize()
    }

    pub fn host_addr(&self) -> Result<IpAddr, BootstrapError> {
        self.server.host.parse().map_err(|e| {
            BootstrapError::Config(config::ConfigError::Message(format!(
                "Invalid host '{}': {e}",
                self.server.host
            )))
        })
    }

    /// Worker pool size, falling back to the number of CPU cores
    pub fn worker_threads(&self) -> usize {
        self.server.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
        })
    }

    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout)
    }

    pub fn to_server_configuration(&self) -> Result<ServerConfiguration, BootstrapError> {
        let mut builder = ServerConfiguration::builder()
            .host(self.host_addr()?)
            .backlog(self.socket.backlog)
            .keep_alive(self.socket.keep_alive)
            .reuse_address(self.socket.reuse_address)
            .low_latency(self.socket.tcp_nodelay);

        for (key, value) in &self.attributes.server {
            builder = builder.server_attribute(AttributeKey::from(key.as_str()), value.as_str());
        }
        for (key, value) in &self.attributes.connection {
            builder = builder
                .connection_attribute_default(AttributeKey::from(key.as_str()), value.as_str());
        }

        Ok(builder.build())
    }

    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.bind.max_attempts,
            delay: Duration::from_millis(self.bind.retry_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::attributes::AttributeValue;

    fn load_defaults() -> Config {
        Config::load_from("tests/does-not-exist").expect("defaults should deserialize")
    }

    #[test]
    fn test_defaults_without_file() {
        let cfg = load_defaults();
        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cfg.server.acceptor_threads, 1);
        assert_eq!(cfg.socket.backlog, 1024);
        assert!(cfg.socket.tcp_nodelay);
        assert_eq!(cfg.logging.format, "text");
        assert!(cfg.attributes.server.is_empty());
        assert!(cfg.worker_threads() >= 1);
    }

    #[test]
    fn test_retry_policy_mapping() {
        let mut cfg = load_defaults();
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());

        cfg.bind.max_attempts = Some(3);
        cfg.bind.retry_delay_ms = 250;
        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts, Some(3));
        assert_eq!(policy.delay, Duration::from_millis(250));
    }

    #[test]
    fn test_server_configuration_mapping() {
        let mut cfg = load_defaults();
        cfg.server.host = "127.0.0.1".to_string();
        cfg.attributes
            .server
            .insert("serverName".to_string(), "nettyServer".to_string());
        cfg.attributes
            .connection
            .insert("clientId".to_string(), "Secret".to_string());

        let server = cfg.to_server_configuration().expect("valid configuration");
        assert_eq!(server.host().to_string(), "127.0.0.1");
        assert!(server.reuse_address());
        assert_eq!(
            server.server_attribute(&AttributeKey::ServerName),
            Some(&AttributeValue::from("nettyServer"))
        );
        assert_eq!(
            server.connection_defaults().get(&AttributeKey::ClientId),
            Some(&AttributeValue::from("Secret"))
        );
    }

    #[test]
    fn test_invalid_host_rejected() {
        let mut cfg = load_defaults();
        cfg.server.host = "not-an-ip".to_string();
        assert!(cfg.to_server_configuration().is_err());
    }
}
