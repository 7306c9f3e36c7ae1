//! Per-connection state and dispatch.
//!
//! # Responsibilities
//! - Generate unique connection IDs for logging
//! - Build a [`ConnectionContext`] for every accepted socket
//! - Hand the socket to its worker and run the connection initializer there
//! - Confine initialization and I/O failures to the connection that raised them

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;

use super::attributes::{AttributeKey, AttributeValue, Attributes};
use super::listener::apply_connection_options;
use super::options::ServerConfiguration;
use super::pool::{EventLoopPool, WorkerHandle};
use crate::error::BootstrapError;
use crate::handler::ConnectionInitializer;
use crate::logger;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Runtime state owned by one connection for its whole lifetime.
///
/// The attribute map is a private copy of the configured defaults; the
/// server configuration is shared read-only.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    id: ConnectionId,
    remote_address: SocketAddr,
    local_address: SocketAddr,
    attributes: Attributes,
    server: Arc<ServerConfiguration>,
    assigned_worker: WorkerHandle,
}

impl ConnectionContext {
    pub fn new(
        remote_address: SocketAddr,
        local_address: SocketAddr,
        server: Arc<ServerConfiguration>,
        assigned_worker: WorkerHandle,
    ) -> Self {
        Self {
            id: ConnectionId::next(),
            remote_address,
            local_address,
            attributes: server.connection_defaults().clone(),
            server,
            assigned_worker,
        }
    }

    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    pub const fn remote_address(&self) -> SocketAddr {
        self.remote_address
    }

    pub const fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    /// Worker serving this connection. Set at accept time, never changes.
    pub const fn assigned_worker(&self) -> &WorkerHandle {
        &self.assigned_worker
    }

    pub fn attribute(&self, key: &AttributeKey) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn set_attribute(
        &mut self,
        key: impl Into<AttributeKey>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        self.attributes.insert(key.into(), value)
    }

    pub fn remove_attribute(&mut self, key: &AttributeKey) -> Option<AttributeValue> {
        self.attributes.remove(key)
    }

    pub fn server_attribute(&self, key: &AttributeKey) -> Option<&AttributeValue> {
        self.server.server_attribute(key)
    }
}

/// Hand an accepted stream to the next worker.
///
/// Runs on an acceptor thread and never waits on the connection itself: the
/// socket is detached from the acceptor's reactor and re-registered on the
/// worker, where the initializer and the handler run.
pub(crate) fn dispatch_connection(
    stream: TcpStream,
    peer: SocketAddr,
    server: &Arc<ServerConfiguration>,
    workers: &EventLoopPool,
    initializer: &Arc<dyn ConnectionInitializer>,
) {
    if let Err(e) = apply_connection_options(&stream, server) {
        logger::log_warning(
            "conn",
            &format!("failed to apply socket options for {peer}: {e}"),
        );
    }

    let local = match stream.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            logger::log_error("conn", &format!("dropping {peer}: {e}"));
            return;
        }
    };
    let std_stream = match stream.into_std() {
        Ok(s) => s,
        Err(e) => {
            logger::log_error("conn", &format!("dropping {peer}: {e}"));
            return;
        }
    };

    let worker = workers.next_member();
    let ctx = ConnectionContext::new(peer, local, Arc::clone(server), worker.clone());
    let id = ctx.id();
    logger::log_connection_accepted(&id, &peer, &worker);

    let initializer = Arc::clone(initializer);
    if let Err(e) = workers.spawn_on(&worker, move || serve_connection(std_stream, ctx, initializer))
    {
        logger::log_connection_error(&id, &peer, &e);
    }
}

async fn serve_connection(
    stream: std::net::TcpStream,
    mut ctx: ConnectionContext,
    initializer: Arc<dyn ConnectionInitializer>,
) {
    let id = ctx.id();
    let peer = ctx.remote_address();

    let stream = match TcpStream::from_std(stream) {
        Ok(s) => s,
        Err(e) => {
            logger::log_connection_error(&id, &peer, &e);
            return;
        }
    };

    // Dropping `stream` on any early return closes the connection.
    let handler = match initializer.initialize(&mut ctx) {
        Ok(h) => h,
        Err(e) => {
            logger::log_init_failed(&id, &peer, &e);
            return;
        }
    };

    match handler.handle(stream, ctx).await {
        Ok(()) => logger::log_connection_closed(&id, &peer),
        Err(e) => logger::log_connection_error(&id, &peer, &BootstrapError::ConnectionIo(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_pair() -> (Arc<ServerConfiguration>, ConnectionContext, ConnectionContext) {
        let server = Arc::new(
            ServerConfiguration::builder()
                .server_attribute(AttributeKey::ServerName, "nettyServer")
                .connection_attribute_default(AttributeKey::ClientId, "Secret")
                .build(),
        );
        let pool = EventLoopPool::start("ctx-test", 1).expect("pool starts");
        let worker = pool.next_member();
        let remote: SocketAddr = "127.0.0.1:50000".parse().expect("addr");
        let local: SocketAddr = "127.0.0.1:9999".parse().expect("addr");
        let a = ConnectionContext::new(remote, local, Arc::clone(&server), worker.clone());
        let b = ConnectionContext::new(remote, local, Arc::clone(&server), worker);
        (server, a, b)
    }

    #[test]
    fn test_connection_ids_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("conn-"));
    }

    #[test]
    fn test_attributes_copied_on_accept() {
        let (server, mut a, b) = context_pair();

        a.set_attribute(AttributeKey::ClientId, "changed");
        a.set_attribute("session", 42_i64);

        assert_eq!(
            a.attribute(&AttributeKey::ClientId),
            Some(&AttributeValue::from("changed"))
        );
        assert_eq!(
            b.attribute(&AttributeKey::ClientId),
            Some(&AttributeValue::from("Secret"))
        );
        assert!(b.attribute(&AttributeKey::from("session")).is_none());
        assert_eq!(
            server.connection_defaults().get(&AttributeKey::ClientId),
            Some(&AttributeValue::from("Secret"))
        );
    }

    #[test]
    fn test_server_attributes_shared() {
        let (_server, mut a, b) = context_pair();
        assert!(a.remove_attribute(&AttributeKey::ClientId).is_some());
        assert_eq!(
            a.server_attribute(&AttributeKey::ServerName),
            b.server_attribute(&AttributeKey::ServerName)
        );
        assert_ne!(a.id(), b.id());
        assert_eq!(a.assigned_worker(), b.assigned_worker());
    }
}
