//! Connection initializer contract.
//!
//! The core accepts sockets and hands each one to a [`ConnectionInitializer`],
//! which installs the protocol-specific processing as a [`ConnectionHandler`].
//! Framing, codecs and business logic live entirely behind these traits.

mod echo;

pub use echo::{EchoHandler, EchoInitializer};

use std::future::Future;
use std::io;
use std::pin::Pin;

use tokio::net::TcpStream;

use crate::error::BootstrapError;
use crate::server::connection::ConnectionContext;

/// Processing of one connection, driven on its assigned worker thread.
pub type HandlerFuture = Pin<Box<dyn Future<Output = io::Result<()>>>>;

/// The processing chain installed on a connection.
pub trait ConnectionHandler {
    /// Serve the connection until it closes. Returning `Err` closes the
    /// connection and reports the failure; other connections are unaffected.
    fn handle(self: Box<Self>, stream: TcpStream, ctx: ConnectionContext) -> HandlerFuture;
}

/// Called exactly once per accepted connection, on the worker the
/// connection is assigned to, before any byte is read from it.
///
/// `initialize` must return promptly; long setup belongs in the handler
/// future. An `Err` closes the connection without affecting its siblings.
pub trait ConnectionInitializer: Send + Sync + 'static {
    fn initialize(
        &self,
        ctx: &mut ConnectionContext,
    ) -> Result<Box<dyn ConnectionHandler>, BootstrapError>;
}

impl<F> ConnectionInitializer for F
where
    F: Fn(&mut ConnectionContext) -> Result<Box<dyn ConnectionHandler>, BootstrapError>
        + Send
        + Sync
        + 'static,
{
    fn initialize(
        &self,
        ctx: &mut ConnectionContext,
    ) -> Result<Box<dyn ConnectionHandler>, BootstrapError> {
        self(ctx)
    }
}

/// Handler built from a closure, handy for small protocols and tests.
pub struct FnHandler<F>(pub F);

impl<F, Fut> ConnectionHandler for FnHandler<F>
where
    F: FnOnce(TcpStream, ConnectionContext) -> Fut,
    Fut: Future<Output = io::Result<()>> + 'static,
{
    fn handle(self: Box<Self>, stream: TcpStream, ctx: ConnectionContext) -> HandlerFuture {
        Box::pin((self.0)(stream, ctx))
    }
}
