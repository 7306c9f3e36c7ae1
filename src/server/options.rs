// Server configuration module
// Immutable transport options plus server and connection attributes

use std::net::{IpAddr, Ipv4Addr};

use super::attributes::{AttributeKey, AttributeValue, Attributes};

/// Default pending-connection queue depth
pub const DEFAULT_BACKLOG: u32 = 1024;

/// Immutable bundle shared read-only by the controller and every connection.
///
/// Built once through [`ServerConfigurationBuilder`]; there are no setters,
/// so an `Arc<ServerConfiguration>` can be handed to any thread as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfiguration {
    host: IpAddr,
    backlog: u32,
    keep_alive: bool,
    reuse_address: bool,
    low_latency: bool,
    server_attributes: Attributes,
    connection_defaults: Attributes,
}

impl ServerConfiguration {
    pub fn builder() -> ServerConfigurationBuilder {
        ServerConfigurationBuilder::default()
    }

    /// Address the listening socket binds to
    pub const fn host(&self) -> IpAddr {
        self.host
    }

    pub const fn backlog(&self) -> u32 {
        self.backlog
    }

    /// `SO_KEEPALIVE` on accepted connections
    pub const fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// `SO_REUSEADDR` on the listening socket
    pub const fn reuse_address(&self) -> bool {
        self.reuse_address
    }

    /// `TCP_NODELAY` on accepted connections
    pub const fn low_latency(&self) -> bool {
        self.low_latency
    }

    pub const fn server_attributes(&self) -> &Attributes {
        &self.server_attributes
    }

    pub fn server_attribute(&self, key: &AttributeKey) -> Option<&AttributeValue> {
        self.server_attributes.get(key)
    }

    /// Seed for every connection's attribute map. Connections receive a copy.
    pub const fn connection_defaults(&self) -> &Attributes {
        &self.connection_defaults
    }
}

impl Default for ServerConfiguration {
    fn default() -> Self {
        ServerConfigurationBuilder::default().build()
    }
}

/// Order-independent builder for [`ServerConfiguration`].
#[derive(Debug, Clone)]
pub struct ServerConfigurationBuilder {
    host: IpAddr,
    backlog: u32,
    keep_alive: bool,
    reuse_address: bool,
    low_latency: bool,
    server_attributes: Attributes,
    connection_defaults: Attributes,
}

impl Default for ServerConfigurationBuilder {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            backlog: DEFAULT_BACKLOG,
            keep_alive: false,
            reuse_address: false,
            low_latency: false,
            server_attributes: Attributes::new(),
            connection_defaults: Attributes::new(),
        }
    }
}

impl ServerConfigurationBuilder {
    #[must_use]
    pub fn host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    #[must_use]
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    #[must_use]
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    #[must_use]
    pub fn reuse_address(mut self, enabled: bool) -> Self {
        self.reuse_address = enabled;
        self
    }

    #[must_use]
    pub fn low_latency(mut self, enabled: bool) -> Self {
        self.low_latency = enabled;
        self
    }

    /// Attach metadata visible through the listening endpoint.
    #[must_use]
    pub fn server_attribute(
        mut self,
        key: impl Into<AttributeKey>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.server_attributes.insert(key.into(), value);
        self
    }

    /// Seed a value into every future connection's attribute map.
    #[must_use]
    pub fn connection_attribute_default(
        mut self,
        key: impl Into<AttributeKey>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.connection_defaults.insert(key.into(), value);
        self
    }

    pub fn build(self) -> ServerConfiguration {
        ServerConfiguration {
            host: self.host,
            backlog: self.backlog,
            keep_alive: self.keep_alive,
            reuse_address: self.reuse_address,
            low_latency: self.low_latency,
            server_attributes: self.server_attributes,
            connection_defaults: self.connection_defaults,
        }
    }
}
